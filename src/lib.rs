#![doc = include_str!("../README.md")]

pub mod auths;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod jwt;
pub mod mss;
pub mod phc;
pub mod secret_store;
pub mod single_flight;
pub mod traits;
pub mod transcryptor;
pub mod transport;
pub mod types;
pub mod user_secret;

// Re-exports for convenient access
#[cfg(feature = "http")]
pub use auths::AuthServer;
pub use auths::{LoginMethod, Source};
pub use config::MssConfig;
pub use error::{Error, ErrorCode};
#[cfg(feature = "http")]
pub use hub::HubClient;
pub use hub::HubAccess;
pub use mss::{EnterOutcome, EnterRefusal, Mss, UserObject};
pub use phc::{EnterMode, HubInformation};
#[cfg(feature = "http")]
pub use phc::PhcServer;
pub use secret_store::{FileSecretStore, MemorySecretStore, SecretStore, StoredUserSecret};
pub use single_flight::FlowKey;
pub use traits::{AuthServerApi, DisclosureSession, HubApi, PhcApi, TranscryptorApi};
#[cfg(feature = "http")]
pub use transcryptor::Transcryptor;
#[cfg(feature = "http")]
pub use transport::ApiClient;
pub use types::{AuthToken, AuthTokenPackage, HubId, NonceStatePair, NumericDate, SignedHhpp};
