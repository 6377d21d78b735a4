//! Hub (Matrix homeserver with the PubHubs module) enter flow.

use serde::{Deserialize, Serialize};

use crate::types::SignedHhpp;

/// Path of the hub API below the hub's server URL.
pub const HUB_API_PREFIX: &str = "_synapse/client/";

pub(crate) const INFO_PATH: &str = ".ph/info";
pub(crate) const ENTER_START_PATH: &str = ".ph/enter-start";
pub(crate) const ENTER_COMPLETE_PATH: &str = ".ph/enter-complete";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResp {
    pub verifying_key: String,
    pub hub_version: String,
    pub hub_client_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterCompleteReq {
    pub state: String,
    pub hhpp: SignedHhpp,
}

/// Matrix credentials handed out by a hub on a successful enter.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubAccess {
    pub access_token: String,
    pub device_id: String,
    pub new_user: bool,
    pub mxid: String,
}

impl std::fmt::Debug for HubAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubAccess")
            .field("device_id", &self.device_id)
            .field("new_user", &self.new_user)
            .field("mxid", &self.mxid)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnterCompleteResp {
    /// The hub's nonce or state went stale; call enter-start again.
    RetryFromStart,
    Entered(HubAccess),
}

#[cfg(feature = "http")]
pub use self::http::HubClient;

#[cfg(feature = "http")]
mod http {
    use url::Url;

    use super::*;
    use crate::error::Error;
    use crate::traits::HubApi;
    use crate::transport::ApiClient;
    use crate::types::NonceStatePair;

    /// HTTP client for a single hub.
    #[derive(Debug, Clone)]
    pub struct HubClient {
        api: ApiClient,
    }

    impl HubClient {
        /// Create a client for the hub served at `hub_server_url`.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Config`] if the hub API URL cannot be formed.
        pub fn new(hub_server_url: &Url) -> Result<Self, Error> {
            let base = ApiClient::new(hub_server_url).url(HUB_API_PREFIX)?;
            Ok(Self {
                api: ApiClient::new(&base),
            })
        }

        #[must_use]
        pub fn with_api_client(api: ApiClient) -> Self {
            Self { api }
        }
    }

    impl HubApi for HubClient {
        async fn info(&self) -> Result<InfoResp, Error> {
            self.api.get(INFO_PATH, None).await
        }

        async fn enter_start(&self) -> Result<NonceStatePair, Error> {
            self.api.post_empty(ENTER_START_PATH, None).await
        }

        async fn enter_complete(&self, req: &EnterCompleteReq) -> Result<EnterCompleteResp, Error> {
            self.api.post_json(ENTER_COMPLETE_PATH, req, None).await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn hub_api_lives_below_synapse_client() {
            let hub = HubClient::new(&"https://hub1.example.com".parse().unwrap()).unwrap();
            assert_eq!(
                hub.api.url(INFO_PATH).unwrap().as_str(),
                "https://hub1.example.com/_synapse/client/.ph/info"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_complete_wire_format() {
        let resp: EnterCompleteResp = serde_json::from_str(r#""RetryFromStart""#).unwrap();
        assert_eq!(resp, EnterCompleteResp::RetryFromStart);

        let resp: EnterCompleteResp = serde_json::from_str(
            r#"{"Entered":{"access_token":"at","device_id":"DEV","new_user":false,"mxid":"@u:hub1"}}"#,
        )
        .unwrap();
        let EnterCompleteResp::Entered(access) = resp else {
            panic!("expected Entered");
        };
        assert_eq!(access.mxid, "@u:hub1");
        assert!(!format!("{access:?}").contains("access_token"));
    }
}
