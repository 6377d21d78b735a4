use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, ErrorCode};

/// Default number of calls [`handle_errors`] makes before giving up on `PleaseRetry`.
pub const DEFAULT_MAX_RETRIES: u32 = 7;

const MAX_RETRY_DELAY_MS: u64 = 1000;

/// `{"Ok": T} | {"Err": E}` wrapper every MSS endpoint answers with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum Envelope<T> {
    Ok(T),
    Err(ErrorBody),
}

/// Error payload of an [`Envelope`]. Older servers send the bare code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Coded {
        #[serde(rename = "errorCode")]
        error_code: ErrorCode,
    },
    Bare(ErrorCode),
}

impl ErrorBody {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Coded { error_code } => *error_code,
            Self::Bare(code) => *code,
        }
    }
}

impl<T> Envelope<T> {
    /// Unwraps `Ok`, turning `Err` into its error code.
    pub fn into_result(self) -> Result<T, ErrorCode> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(body) => Err(body.code()),
        }
    }
}

/// Backoff before retry number `retry`: `min(10 * 2^retry, 1000)` ms.
#[must_use]
pub fn retry_delay(retry: u32) -> Duration {
    let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
    Duration::from_millis(10u64.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

/// Calls `api_call` until it yields `Ok`, retrying only on [`ErrorCode::PleaseRetry`].
///
/// `api_call` is invoked at most `max_retries` times with exponential backoff in
/// between. Transport failures and any other error code are returned at once.
///
/// # Errors
///
/// Returns [`Error::Api`] with the server's code, `PleaseRetry` once retries are
/// exhausted, or whatever error `api_call` itself produced.
pub async fn handle_errors<T, F, Fut>(mut api_call: F, max_retries: u32) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Envelope<T>, Error>>,
{
    for retry in 0..max_retries {
        match api_call().await?.into_result() {
            Ok(value) => return Ok(value),
            Err(ErrorCode::PleaseRetry) => {
                if retry + 1 < max_retries {
                    let delay = retry_delay(retry);
                    tracing::debug!(retry, delay_ms = delay.as_millis() as u64, "Server asked to retry");
                    tokio::time::sleep(delay).await;
                }
            }
            Err(code) => return Err(Error::Api(code)),
        }
    }
    tracing::warn!(max_retries, "Giving up after repeated PleaseRetry responses");
    Err(Error::Api(ErrorCode::PleaseRetry))
}

#[cfg(feature = "http")]
pub use self::http::ApiClient;

#[cfg(feature = "http")]
mod http {
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
    use reqwest::{RequestBuilder, Response, StatusCode};
    use serde::Serialize;
    use serde::de::DeserializeOwned;
    use url::Url;

    use super::{DEFAULT_MAX_RETRIES, Envelope, ErrorBody, handle_errors};
    use crate::error::{Error, ErrorCode};

    const OCTET_STREAM: &str = "application/octet-stream";

    /// JSON-over-HTTP client for one MSS server.
    #[derive(Debug, Clone)]
    pub struct ApiClient {
        http: reqwest::Client,
        base: Url,
        max_retries: u32,
    }

    impl ApiClient {
        /// Create a client for the server at `base`. A trailing slash is ignored.
        #[must_use]
        pub fn new(base: &Url) -> Self {
            Self {
                http: reqwest::Client::new(),
                base: normalize_base(base),
                max_retries: DEFAULT_MAX_RETRIES,
            }
        }

        /// Use a custom HTTP client (for connection pool reuse or testing).
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = client;
            self
        }

        #[must_use]
        pub fn with_max_retries(mut self, max_retries: u32) -> Self {
            self.max_retries = max_retries;
            self
        }

        #[must_use]
        pub fn base(&self) -> &Url {
            &self.base
        }

        pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
            self.base
                .join(path)
                .map_err(|e| Error::Config(format!("invalid endpoint path {path}: {e}")))
        }

        /// GET `path` and decode the enveloped JSON response.
        pub async fn get<T: DeserializeOwned>(
            &self,
            path: &str,
            auth: Option<&str>,
        ) -> Result<T, Error> {
            let url = self.url(path)?;
            handle_errors(
                move || self.send(with_auth(self.http.get(url.clone()), auth)),
                self.max_retries,
            )
            .await
        }

        /// POST a JSON body to `path`.
        pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
            &self,
            path: &str,
            body: &B,
            auth: Option<&str>,
        ) -> Result<T, Error> {
            let url = self.url(path)?;
            handle_errors(
                move || self.send(with_auth(self.http.post(url.clone()).json(body), auth)),
                self.max_retries,
            )
            .await
        }

        /// POST without a body.
        pub async fn post_empty<T: DeserializeOwned>(
            &self,
            path: &str,
            auth: Option<&str>,
        ) -> Result<T, Error> {
            let url = self.url(path)?;
            handle_errors(
                move || self.send(with_auth(self.http.post(url.clone()), auth)),
                self.max_retries,
            )
            .await
        }

        /// POST raw bytes as `application/octet-stream`.
        pub async fn post_bytes<T: DeserializeOwned>(
            &self,
            path: &str,
            bytes: &[u8],
            auth: Option<&str>,
        ) -> Result<T, Error> {
            let url = self.url(path)?;
            handle_errors(
                move || {
                    let request = self
                        .http
                        .post(url.clone())
                        .header(CONTENT_TYPE, OCTET_STREAM)
                        .body(bytes.to_vec());
                    self.send(with_auth(request, auth))
                },
                self.max_retries,
            )
            .await
        }

        /// GET `path`, which answers either with raw bytes or an enveloped `T`.
        pub async fn get_bytes_or<T: DeserializeOwned>(
            &self,
            path: &str,
        ) -> Result<BytesOr<T>, Error> {
            let url = self.url(path)?;
            handle_errors(
                move || {
                    let request = self.http.get(url.clone());
                    async move {
                        let response = request.send().await?;
                        if let Some(envelope) = gateway_retry(response.status()) {
                            return Ok::<_, Error>(envelope);
                        }
                        let response = response.error_for_status()?;
                        let envelope = if is_octet_stream(&response) {
                            Envelope::Ok(BytesOr::Bytes(response.bytes().await?.to_vec()))
                        } else {
                            match decode::<T>(response).await? {
                                Envelope::Ok(value) => Envelope::Ok(BytesOr::Value(value)),
                                Envelope::Err(body) => Envelope::Err(body),
                            }
                        };
                        Ok::<_, Error>(envelope)
                    }
                },
                self.max_retries,
            )
            .await
        }

        async fn send<T: DeserializeOwned>(
            &self,
            request: RequestBuilder,
        ) -> Result<Envelope<T>, Error> {
            let response = request.send().await?;
            if let Some(envelope) = gateway_retry(response.status()) {
                return Ok(envelope);
            }
            decode(response.error_for_status()?).await
        }
    }

    /// Either a raw object or an enveloped problem description.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum BytesOr<T> {
        Bytes(Vec<u8>),
        Value(T),
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>, Error> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// A proxy in front of a server that is (temporarily) down answers with a
    /// gateway error; treat it as `PleaseRetry`.
    fn gateway_retry<T>(status: StatusCode) -> Option<Envelope<T>> {
        match status {
            StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => {
                tracing::debug!(status = %status, "Server unavailable, will retry");
                Some(Envelope::Err(ErrorBody::Bare(ErrorCode::PleaseRetry)))
            }
            _ => None,
        }
    }

    fn is_octet_stream(response: &Response) -> bool {
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(OCTET_STREAM))
    }

    fn with_auth(request: RequestBuilder, auth: Option<&str>) -> RequestBuilder {
        match auth {
            Some(token) => request.header(AUTHORIZATION, token),
            None => request,
        }
    }

    /// Drops trailing slashes, then appends exactly one so `Url::join` keeps the full path.
    pub(crate) fn normalize_base(url: &Url) -> Url {
        let trimmed = url.as_str().trim_end_matches('/');
        Url::parse(&format!("{trimmed}/")).unwrap_or_else(|_| url.clone())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn base_url_keeps_path_and_drops_extra_slashes() {
            let client = ApiClient::new(&"https://phc.example.com/api//".parse().unwrap());
            assert_eq!(client.base().as_str(), "https://phc.example.com/api/");
            assert_eq!(
                client.url(".ph/user/welcome").unwrap().as_str(),
                "https://phc.example.com/api/.ph/user/welcome"
            );
        }

        #[test]
        fn gateway_errors_ask_for_a_retry() {
            for status in [
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ] {
                let envelope = gateway_retry::<()>(status).unwrap();
                assert_eq!(envelope.into_result(), Err(ErrorCode::PleaseRetry));
            }
            for status in [
                StatusCode::OK,
                StatusCode::BAD_REQUEST,
                StatusCode::INTERNAL_SERVER_ERROR,
            ] {
                assert!(gateway_retry::<()>(status).is_none());
            }
        }

        #[test]
        fn base_url_without_path() {
            let client = ApiClient::new(&"https://auths.example.com".parse().unwrap());
            assert_eq!(
                client.url(".ph/attr-keys").unwrap().as_str(),
                "https://auths.example.com/.ph/attr-keys"
            );
        }
    }
}

#[cfg(feature = "http")]
pub use self::http::BytesOr;
