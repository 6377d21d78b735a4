use serde::{Deserialize, Serialize};

use crate::types::{HubId, SealedEhpp, SealedPpp};

pub(crate) const EHPP_PATH: &str = ".ph/ehpp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EhppReq {
    pub hub_nonce: String,
    pub hub: HubId,
    pub ppp: SealedPpp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EhppResp {
    /// The ppp is stale; request a fresh one from PHC.
    RetryWithNewPpp,
    Success(SealedEhpp),
}

#[cfg(feature = "http")]
pub use self::http::Transcryptor;

#[cfg(feature = "http")]
mod http {
    use url::Url;

    use super::*;
    use crate::error::Error;
    use crate::traits::TranscryptorApi;
    use crate::transport::ApiClient;

    /// HTTP client for the Transcryptor.
    #[derive(Debug, Clone)]
    pub struct Transcryptor {
        api: ApiClient,
    }

    impl Transcryptor {
        #[must_use]
        pub fn new(transcryptor_url: &Url) -> Self {
            Self {
                api: ApiClient::new(transcryptor_url),
            }
        }

        #[must_use]
        pub fn with_api_client(api: ApiClient) -> Self {
            Self { api }
        }
    }

    impl TranscryptorApi for Transcryptor {
        async fn ehpp(&self, req: &EhppReq) -> Result<EhppResp, Error> {
            self.api.post_json(EHPP_PATH, req, None).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ehpp_wire_format() {
        let req = EhppReq {
            hub_nonce: "n".into(),
            hub: HubId::from("hub1".to_string()),
            ppp: SealedPpp::from("ppp".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"hub_nonce":"n","hub":"hub1","ppp":"ppp"}"#
        );

        let resp: EhppResp = serde_json::from_str(r#""RetryWithNewPpp""#).unwrap();
        assert_eq!(resp, EhppResp::RetryWithNewPpp);
        let resp: EhppResp = serde_json::from_str(r#"{"Success":"ehpp"}"#).unwrap();
        assert_eq!(resp, EhppResp::Success(SealedEhpp::from("ehpp".to_string())));
    }
}
