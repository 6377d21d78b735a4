use serde::{Deserialize, Serialize};

use crate::phc::AuthTokenDeniedReason;
use crate::single_flight::FlowKey;

/// Error codes servers return inside an `{"Err": ...}` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum ErrorCode {
    /// The server asks the client to repeat the exact same request.
    #[error("PleaseRetry")]
    PleaseRetry,
    #[error("InternalError")]
    InternalError,
    #[error("BadRequest")]
    BadRequest,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The server answered with an error envelope (after retries, for `PleaseRetry`).
    #[error("{0}")]
    Api(ErrorCode),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidAttributes(String),

    #[error("The disclosed attributes do not match the requested attributes")]
    DisclosureMismatch,

    #[error("No attribute type known with this handle: {0}")]
    UnknownAttrType(String),

    #[error("The source is not available for the attribute type with this handle: {0}")]
    SourceNotAvailableFor(String),

    #[error("Authentication must be restarted from the auth/start endpoint")]
    PleaseRestartAuth,

    #[error("Disclosure session failed: {0}")]
    Disclosure(String),

    #[error("Invalid JWT")]
    InvalidJwt,

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("User secret error: {0}")]
    UserSecret(String),

    #[error("Object store error for '{handle}': {detail}")]
    ObjectStore { handle: String, detail: String },

    #[error("Could not store the user object with handle {handle}, because the quotum is reached")]
    QuotumReached { handle: String },

    /// The session was invalidated; the user has to enter PubHubs again.
    #[error("Not logged in")]
    LoggedOut,

    #[error("Auth token denied: {0:?}")]
    AuthTokenDenied(AuthTokenDeniedReason),

    #[error("Transcryptor kept asking for a new polymorphic pseudonym package")]
    PppRetriesExhausted,

    #[error("PubHubs Central kept asking for a new polymorphic pseudonym package at the hhpp step")]
    HhppRetriesExhausted,

    #[error("Hub kept asking to restart the enter flow")]
    HubEnterRetriesExhausted,

    #[error("Flow already in progress: {0}")]
    FlowInProgress(FlowKey),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the server could not be reached at all.
    ///
    /// Callers show a "system offline" message for these instead of the raw error.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        match self {
            #[cfg(feature = "http")]
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    pub(crate) fn object_store(handle: &str, detail: impl Into<String>) -> Self {
        Self::ObjectStore {
            handle: handle.to_string(),
            detail: detail.into(),
        }
    }
}
