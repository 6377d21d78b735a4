use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Hub identifier as listed by PubHubs Central.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct HubId(pub String);

/// Sealed polymorphic pseudonym package, issued by PubHubs Central.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SealedPpp(pub String);

/// Sealed encrypted hub pseudonym package, issued by the Transcryptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SealedEhpp(pub String);

/// Hashed hub pseudonym package signed by PubHubs Central; handed to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SignedHhpp(pub String);

/// Seconds since the Unix epoch, as a JSON number.
///
/// Attribute-key timestamps use this type on the wire and in stored user secret objects.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[serde(transparent)]
pub struct NumericDate(pub u64);

/// PubHubs Central session credential. Debug output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AuthToken(pub String);

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

impl AuthToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Auth token together with its expiry (seconds since the Unix epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokenPackage {
    pub auth_token: AuthToken,
    pub expires: u64,
}

impl AuthTokenPackage {
    /// Whether the token has expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires <= now
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        self.is_expired_at(u64::try_from(now).unwrap_or(0))
    }
}

/// Nonce and state a hub hands out at the start of its enter flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceStatePair {
    pub nonce: String,
    pub state: String,
}
