//! PubHubs Central wire types and HTTP client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{AuthTokenPackage, HubId, SealedEhpp, SealedPpp, SignedHhpp};

pub(crate) const WELCOME_PATH: &str = ".ph/user/welcome";
pub(crate) const ENTER_PATH: &str = ".ph/user/enter";
pub(crate) const REFRESH_PATH: &str = ".ph/user/refresh";
pub(crate) const STATE_PATH: &str = ".ph/user/state";
pub(crate) const PPP_PATH: &str = ".ph/user/ppp";
pub(crate) const HHPP_PATH: &str = ".ph/user/hhpp";

pub(crate) fn object_by_hash_path(details: &UserObjectDetails) -> String {
    format!(".ph/user/obj/by-hash/{}/{}", details.hash, details.hmac)
}

pub(crate) fn new_object_path(handle: &str) -> String {
    format!(".ph/user/obj/by-handle/{handle}")
}

pub(crate) fn overwrite_object_path(handle: &str, overwrite_hash: &str) -> String {
    format!(".ph/user/obj/by-handle/{handle}/{overwrite_hash}")
}

/// Server topology and keys, as announced by PHC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constellation {
    pub id: String,
    pub created_at: u64,
    pub transcryptor_url: Url,
    pub transcryptor_jwt_key: String,
    pub transcryptor_enc_key: String,
    #[serde(default)]
    pub transcryptor_master_enc_key_part: Option<String>,
    pub phc_url: Url,
    pub phc_jwt_key: String,
    pub phc_enc_key: String,
    pub auths_url: Url,
    pub auths_jwt_key: String,
    pub auths_enc_key: String,
    pub master_enc_key: String,
    #[serde(default)]
    pub global_client_url: Option<Url>,
    #[serde(default)]
    pub ph_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubInformation {
    #[serde(default)]
    pub handles: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Hub server URL; the hub API lives under `_synapse/client/`.
    pub url: Url,
    pub id: HubId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeResp {
    pub constellation: Constellation,
    pub hubs: BTreeMap<String, HubInformation>,
}

/// Whether `enter` may create an account, and whether one must exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnterMode {
    Login,
    Register,
    LoginOrRegister,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterReq {
    /// Signed identifying attribute. Omitted when entering with an auth token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifying_attr: Option<String>,
    pub mode: EnterMode,
    pub add_attrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub attr_type: String,
    pub value: String,
    pub bannable: bool,
    pub not_identifying: bool,
    pub not_addable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrAddStatus {
    AlreadyThere,
    Added,
    PleaseTryAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthTokenDeniedReason {
    NoBannableAttribute,
    Banned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnterResp {
    AccountDoesNotExist,
    AttributeBanned(Attr),
    Banned,
    AttributeAlreadyTaken(Attr),
    NoBannableAttribute,
    RetryWithNewIdentifyingAttr,
    RetryWithNewAddAttr {
        index: usize,
    },
    Entered {
        new_account: bool,
        auth_token_package: Result<AuthTokenPackage, AuthTokenDeniedReason>,
        #[serde(default)]
        attr_status: Vec<(Attr, AttrAddStatus)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshResp {
    ReobtainAuthToken,
    Denied(AuthTokenDeniedReason),
    Success(AuthTokenPackage),
}

/// Location of a stored object. The hmac authorizes downloads without an auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserObjectDetails {
    pub hash: String,
    pub hmac: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub allow_login_by: Vec<String>,
    #[serde(default)]
    pub could_be_banned_by: Vec<String>,
    #[serde(default)]
    pub stored_objects: BTreeMap<String, UserObjectDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateResp {
    RetryWithNewAuthToken,
    State(UserState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GetObjectRespProblem {
    RetryWithNewHmac,
    NotFound,
}

/// Download result: the raw (encrypted) object, or why it could not be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetObjectResp {
    Object(Vec<u8>),
    Problem(GetObjectRespProblem),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotumName {
    ObjectCount,
    ObjectBytesTotal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreObjectResp {
    PleaseRetry,
    RetryWithNewAuthToken,
    /// An object exists under this handle; overwrite it instead.
    MissingHash,
    /// Nothing to overwrite under this handle.
    NotFound,
    HashDidNotMatch,
    NoChanges,
    QuotumReached(QuotumName),
    Stored {
        stored_objects: BTreeMap<String, UserObjectDetails>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PppResp {
    RetryWithNewAuthToken,
    Success(SealedPpp),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HhppReq {
    pub ehpp: SealedEhpp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HhppResp {
    RetryWithNewPpp,
    RetryWithNewAuthToken,
    Success(SignedHhpp),
}

#[cfg(feature = "http")]
pub use self::http::PhcServer;

#[cfg(feature = "http")]
mod http {
    use url::Url;

    use super::*;
    use crate::error::Error;
    use crate::traits::PhcApi;
    use crate::transport::{ApiClient, BytesOr};
    use crate::types::AuthToken;

    /// HTTP client for PubHubs Central.
    #[derive(Debug, Clone)]
    pub struct PhcServer {
        api: ApiClient,
    }

    impl PhcServer {
        #[must_use]
        pub fn new(phc_url: &Url) -> Self {
            Self {
                api: ApiClient::new(phc_url),
            }
        }

        #[must_use]
        pub fn with_api_client(api: ApiClient) -> Self {
            Self { api }
        }
    }

    impl PhcApi for PhcServer {
        async fn welcome(&self) -> Result<WelcomeResp, Error> {
            self.api.get(WELCOME_PATH, None).await
        }

        async fn enter(&self, req: &EnterReq, auth: Option<&AuthToken>) -> Result<EnterResp, Error> {
            self.api
                .post_json(ENTER_PATH, req, auth.map(AuthToken::as_str))
                .await
        }

        async fn refresh(&self, auth: &AuthToken) -> Result<RefreshResp, Error> {
            self.api.get(REFRESH_PATH, Some(auth.as_str())).await
        }

        async fn state(&self, auth: &AuthToken) -> Result<StateResp, Error> {
            self.api.get(STATE_PATH, Some(auth.as_str())).await
        }

        async fn get_object(&self, details: &UserObjectDetails) -> Result<GetObjectResp, Error> {
            let path = object_by_hash_path(details);
            Ok(match self.api.get_bytes_or(&path).await? {
                BytesOr::Bytes(bytes) => GetObjectResp::Object(bytes),
                BytesOr::Value(problem) => GetObjectResp::Problem(problem),
            })
        }

        async fn new_object(
            &self,
            handle: &str,
            data: &[u8],
            auth: &AuthToken,
        ) -> Result<StoreObjectResp, Error> {
            self.api
                .post_bytes(&new_object_path(handle), data, Some(auth.as_str()))
                .await
        }

        async fn overwrite_object(
            &self,
            handle: &str,
            overwrite_hash: &str,
            data: &[u8],
            auth: &AuthToken,
        ) -> Result<StoreObjectResp, Error> {
            let path = overwrite_object_path(handle, overwrite_hash);
            self.api.post_bytes(&path, data, Some(auth.as_str())).await
        }

        async fn ppp(&self, auth: &AuthToken) -> Result<PppResp, Error> {
            self.api.post_empty(PPP_PATH, Some(auth.as_str())).await
        }

        async fn hhpp(&self, req: &HhppReq, auth: &AuthToken) -> Result<HhppResp, Error> {
            self.api.post_json(HHPP_PATH, req, Some(auth.as_str())).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_resp_unit_and_struct_variants() {
        let resp: EnterResp = serde_json::from_str(r#""AccountDoesNotExist""#).unwrap();
        assert_eq!(resp, EnterResp::AccountDoesNotExist);

        let resp: EnterResp =
            serde_json::from_str(r#"{"RetryWithNewAddAttr":{"index":2}}"#).unwrap();
        assert_eq!(resp, EnterResp::RetryWithNewAddAttr { index: 2 });

        let resp: EnterResp = serde_json::from_str(
            r#"{"Entered":{"new_account":true,"auth_token_package":{"Ok":{"auth_token":"tok","expires":10}},"attr_status":[]}}"#,
        )
        .unwrap();
        let EnterResp::Entered {
            new_account,
            auth_token_package,
            ..
        } = resp
        else {
            panic!("expected Entered");
        };
        assert!(new_account);
        assert_eq!(auth_token_package.unwrap().expires, 10);
    }

    #[test]
    fn denied_token_package() {
        let resp: EnterResp = serde_json::from_str(
            r#"{"Entered":{"new_account":false,"auth_token_package":{"Err":"Banned"},"attr_status":[]}}"#,
        )
        .unwrap();
        assert!(matches!(
            resp,
            EnterResp::Entered {
                auth_token_package: Err(AuthTokenDeniedReason::Banned),
                ..
            }
        ));
    }

    #[test]
    fn store_object_resp_variants() {
        let resp: StoreObjectResp =
            serde_json::from_str(r#"{"QuotumReached":"ObjectBytesTotal"}"#).unwrap();
        assert_eq!(resp, StoreObjectResp::QuotumReached(QuotumName::ObjectBytesTotal));

        let resp: StoreObjectResp = serde_json::from_str(
            r#"{"Stored":{"stored_objects":{"usersecret":{"hash":"h","hmac":"m","size":3}}}}"#,
        )
        .unwrap();
        let StoreObjectResp::Stored { stored_objects } = resp else {
            panic!("expected Stored");
        };
        assert_eq!(stored_objects["usersecret"].hmac, "m");
    }

    #[test]
    fn enter_req_omits_missing_identifying_attr() {
        let req = EnterReq {
            identifying_attr: None,
            mode: EnterMode::Login,
            add_attrs: vec![],
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"mode":"Login","add_attrs":[]}"#
        );
    }

    #[test]
    fn object_paths() {
        let details = UserObjectDetails {
            hash: "abc".into(),
            hmac: "def".into(),
            size: 1,
        };
        assert_eq!(object_by_hash_path(&details), ".ph/user/obj/by-hash/abc/def");
        assert_eq!(new_object_path("usersecret"), ".ph/user/obj/by-handle/usersecret");
        assert_eq!(
            overwrite_object_path("usersecret", "abc"),
            ".ph/user/obj/by-handle/usersecret/abc"
        );
    }

    #[test]
    fn welcome_ignores_unknown_fields() {
        let json = r#"{
            "constellation": {
                "id": "c1", "created_at": 1,
                "transcryptor_url": "https://tr.example.com/",
                "transcryptor_jwt_key": "a", "transcryptor_enc_key": "b",
                "phc_url": "https://phc.example.com/", "phc_jwt_key": "c", "phc_enc_key": "d",
                "auths_url": "https://auths.example.com/", "auths_jwt_key": "e", "auths_enc_key": "f",
                "master_enc_key": "g", "something_new": 42
            },
            "hubs": {
                "hub1": {"handles": ["hub1"], "name": "Hub one", "description": "", "url": "https://hub1.example.com/", "id": "hub1-id"}
            }
        }"#;
        let welcome: WelcomeResp = serde_json::from_str(json).unwrap();
        assert_eq!(welcome.constellation.auths_url.as_str(), "https://auths.example.com/");
        assert_eq!(welcome.hubs["hub1"].id, HubId::from("hub1-id".to_string()));
    }
}
