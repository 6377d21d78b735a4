//! Authentication Server ("Auths") types, attribute validation and the
//! disclosure-based authentication flow.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::jwt;
use crate::phc::EnterMode;
use crate::types::NumericDate;
use crate::traits::{AuthServerApi, DisclosureSession};

pub(crate) const WELCOME_PATH: &str = ".ph/welcome";
pub(crate) const AUTH_START_PATH: &str = ".ph/auth/start";
pub(crate) const AUTH_COMPLETE_PATH: &str = ".ph/auth/complete";
pub(crate) const ATTR_KEYS_PATH: &str = ".ph/attr-keys";

/// Where attributes are disclosed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Yivi,
}

/// Which attributes a login requests, and which of them identifies the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginMethod {
    pub source: Source,
    pub attr_types: &'static [&'static str],
    pub identifying_attr: &'static str,
}

impl LoginMethod {
    /// Yivi login by email, with a phone number as bannable attribute.
    pub const YIVI: Self = Self {
        source: Source::Yivi,
        attr_types: &["email", "phone"],
        identifying_attr: "email",
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrSource {
    Yivi { attr_type_id: String },
}

/// Capability descriptor of an attribute type, as declared by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrType {
    pub id: String,
    /// Current handle first, followed by historical aliases.
    #[serde(default)]
    pub handles: Vec<String>,
    pub bannable: bool,
    pub identifying: bool,
    #[serde(default)]
    pub sources: Vec<AttrSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeResp {
    pub attr_types: BTreeMap<String, AttrType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStartReq {
    pub source: Source,
    pub attr_types: Vec<String>,
}

/// What the client must do to prove possession of the requested attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthTask {
    Yivi {
        disclosure_request: String,
        yivi_requestor_url: String,
    },
}

/// Opaque server state carried from `auth/start` to `auth/complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthState(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartResp {
    Success { task: AuthTask, state: AuthState },
    UnknownAttrType(String),
    SourceNotAvailableFor(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthProof {
    Yivi { disclosure: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCompleteReq {
    pub proof: AuthProof,
    pub state: AuthState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompleteResp {
    /// Disclosed attributes as signed JWTs, keyed by handle.
    Success { attrs: BTreeMap<String, String> },
    PleaseRestartAuth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrKeyReq {
    /// The signed attribute.
    pub attr: String,
    /// Timestamp of the key the user secret is currently encrypted under, if any.
    pub timestamp: Option<NumericDate>,
}

/// Attribute-key request keyed by attribute handle.
pub type AttrKeysReq = BTreeMap<String, AttrKeyReq>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrKeyResp {
    /// Base64url key and its timestamp.
    pub latest_key: (String, NumericDate),
    /// Key matching the timestamp in the request.
    pub old_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrKeysResp {
    /// An attribute was revoked or rotated; authentication must restart.
    RetryWithNewAttr(String),
    Success(BTreeMap<String, AttrKeyResp>),
}

/// Payload of a signed attribute JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrClaims {
    pub attr_type: String,
    pub value: String,
}

/// A disclosed identifying attribute, decoded for user-secret bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttr {
    pub signed_attr: String,
    /// Attribute type id.
    pub id: String,
    pub value: String,
}

/// Identifying attributes from one authentication, keyed by handle.
pub type SignedIdentifyingAttrs = BTreeMap<String, SignedAttr>;

/// Result of a completed disclosure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// Signed attribute for the login method's identifying handle.
    pub identifying_attr: String,
    pub signed_identifying_attrs: SignedIdentifyingAttrs,
    /// All other disclosed signed attributes.
    pub signed_add_attrs: Vec<String>,
}

/// Checks that `login_method` only requests supported attributes and that they
/// include an identifying one and, when registering, a bannable one.
///
/// Returns the requested handles that belong to identifying attribute types.
///
/// # Errors
///
/// Returns [`Error::InvalidAttributes`] describing the first problem found.
pub fn check_attributes(
    supported: &BTreeMap<String, AttrType>,
    login_method: &LoginMethod,
    enter_mode: EnterMode,
) -> Result<BTreeSet<String>, Error> {
    let mut by_handle: HashMap<&str, &AttrType> = HashMap::new();
    for (handle, attr) in supported {
        by_handle.insert(handle, attr);
        for alias in &attr.handles {
            by_handle.insert(alias, attr);
        }
    }

    let mut identifying = BTreeSet::new();
    // A login may lack a bannable attribute here; PHC rejects it later if the account has none.
    let mut has_bannable = enter_mode == EnterMode::Login;

    for &handle in login_method.attr_types {
        let attr = by_handle.get(handle).ok_or_else(|| {
            Error::InvalidAttributes(format!(
                "The attribute \"{handle}\" is not in the list of supported attributes."
            ))
        })?;

        if handle == login_method.identifying_attr && !attr.identifying {
            return Err(Error::InvalidAttributes(format!(
                "The attribute that is to be used as an identifying attribute ({handle}) is not an identifying attribute."
            )));
        }
        if attr.identifying {
            identifying.insert(handle.to_string());
        }
        has_bannable |= attr.bannable;
    }

    let mut missing = Vec::new();
    if identifying.is_empty() {
        missing.push("an identifying attribute");
    }
    if !has_bannable {
        missing.push("a bannable attribute");
    }
    if !missing.is_empty() {
        return Err(Error::InvalidAttributes(format!(
            "Invalid attribute list: Missing {} required for registration/login.",
            missing.join(" and ")
        )));
    }

    Ok(identifying)
}

/// Whether the disclosed handles are exactly the requested ones.
#[must_use]
pub fn response_equal_to_requested<A: AsRef<str>, B: AsRef<str>>(disclosed: &[A], requested: &[B]) -> bool {
    if disclosed.len() != requested.len() {
        return false;
    }
    let disclosed: HashSet<&str> = disclosed.iter().map(AsRef::as_ref).collect();
    let requested: HashSet<&str> = requested.iter().map(AsRef::as_ref).collect();
    disclosed == requested
}

/// Runs welcome, attribute validation, `auth/start`, the disclosure session and
/// `auth/complete`, and sorts the disclosed attributes.
///
/// # Errors
///
/// Fails on invalid login methods, negative server answers, a disclosure that
/// does not match the request, or undecodable signed attributes.
pub async fn start_authentication<A, D>(
    auths: &A,
    disclosure: &D,
    login_method: &LoginMethod,
    enter_mode: EnterMode,
) -> Result<Authenticated, Error>
where
    A: AuthServerApi,
    D: DisclosureSession,
{
    if !login_method.attr_types.contains(&login_method.identifying_attr) {
        return Err(Error::InvalidAttributes(format!(
            "The attributes {:?} do not include the identifying attribute \"{}\".",
            login_method.attr_types, login_method.identifying_attr
        )));
    }

    let welcome = auths.welcome().await?;
    let identifying_handles = check_attributes(&welcome.attr_types, login_method, enter_mode)?;

    let start_req = AuthStartReq {
        source: login_method.source,
        attr_types: login_method.attr_types.iter().map(|s| s.to_string()).collect(),
    };
    let (task, state) = match auths.auth_start(&start_req).await? {
        StartResp::Success { task, state } => (task, state),
        StartResp::UnknownAttrType(handle) => return Err(Error::UnknownAttrType(handle)),
        StartResp::SourceNotAvailableFor(handle) => return Err(Error::SourceNotAvailableFor(handle)),
    };

    let proof = match (login_method.source, &task) {
        (Source::Yivi, AuthTask::Yivi { .. }) => disclosure.disclose(&task).await?,
    };
    tracing::debug!(source = ?login_method.source, "Disclosure session completed");

    let attrs = match auths.auth_complete(&AuthCompleteReq { proof, state }).await? {
        CompleteResp::Success { attrs } => attrs,
        CompleteResp::PleaseRestartAuth => return Err(Error::PleaseRestartAuth),
    };

    let disclosed: Vec<&str> = attrs.keys().map(String::as_str).collect();
    if !response_equal_to_requested(&disclosed, login_method.attr_types) {
        tracing::warn!(?disclosed, requested = ?login_method.attr_types, "Disclosure mismatch");
        return Err(Error::DisclosureMismatch);
    }

    let mut signed_identifying_attrs = SignedIdentifyingAttrs::new();
    let mut signed_add_attrs = Vec::new();
    for (handle, signed) in &attrs {
        if identifying_handles.contains(handle) {
            let claims: AttrClaims = jwt::decode_payload(signed)?;
            signed_identifying_attrs.insert(
                handle.clone(),
                SignedAttr {
                    signed_attr: signed.clone(),
                    id: claims.attr_type,
                    value: claims.value,
                },
            );
        }
        if handle != login_method.identifying_attr {
            signed_add_attrs.push(signed.clone());
        }
    }

    let identifying_attr = attrs
        .get(login_method.identifying_attr)
        .cloned()
        .ok_or(Error::DisclosureMismatch)?;

    Ok(Authenticated {
        identifying_attr,
        signed_identifying_attrs,
        signed_add_attrs,
    })
}

#[cfg(feature = "http")]
pub use self::http::AuthServer;

#[cfg(feature = "http")]
mod http {
    use url::Url;

    use super::*;
    use crate::transport::ApiClient;

    /// HTTP client for the Authentication Server.
    #[derive(Debug, Clone)]
    pub struct AuthServer {
        api: ApiClient,
    }

    impl AuthServer {
        #[must_use]
        pub fn new(auths_url: &Url) -> Self {
            Self {
                api: ApiClient::new(auths_url),
            }
        }

        #[must_use]
        pub fn with_api_client(api: ApiClient) -> Self {
            Self { api }
        }
    }

    impl AuthServerApi for AuthServer {
        async fn welcome(&self) -> Result<WelcomeResp, Error> {
            self.api.get(WELCOME_PATH, None).await
        }

        async fn auth_start(&self, req: &AuthStartReq) -> Result<StartResp, Error> {
            self.api.post_json(AUTH_START_PATH, req, None).await
        }

        async fn auth_complete(&self, req: &AuthCompleteReq) -> Result<CompleteResp, Error> {
            self.api.post_json(AUTH_COMPLETE_PATH, req, None).await
        }

        async fn attr_keys(&self, req: &AttrKeysReq) -> Result<AttrKeysResp, Error> {
            self.api.post_json(ATTR_KEYS_PATH, req, None).await
        }
    }
}
