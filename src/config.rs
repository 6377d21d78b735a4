//! Client configuration.

use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use crate::error::Error;
use crate::secret_store::{FileSecretStore, MemorySecretStore, SecretStore};
use crate::transport::DEFAULT_MAX_RETRIES;

/// Where to find PubHubs Central and how to talk to it.
///
/// The PHC URL is the only required setting; everything else about the
/// constellation is learned from PHC's welcome response in
/// [`connect()`](MssConfig::connect).
///
/// ```rust,ignore
/// let config = MssConfig::new("https://phc.example.com".parse()?)
///     .with_secret_file("/var/lib/app/user-secret.json");
/// let mss = config.connect().await?;
/// ```
#[derive(Clone)]
pub struct MssConfig {
    phc_url: Url,
    max_retries: u32,
    secret_store: Arc<dyn SecretStore>,
    #[cfg(feature = "http")]
    http: Option<reqwest::Client>,
}

impl std::fmt::Debug for MssConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssConfig")
            .field("phc_url", &self.phc_url.as_str())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl MssConfig {
    /// Keeps the user secret in memory only; see [`with_secret_file`](Self::with_secret_file).
    #[must_use]
    pub fn new(phc_url: Url) -> Self {
        Self {
            phc_url,
            max_retries: DEFAULT_MAX_RETRIES,
            secret_store: Arc::new(MemorySecretStore::new()),
            #[cfg(feature = "http")]
            http: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `MSS_PHC_URL`: PubHubs Central URL
    ///
    /// # Optional env vars
    /// - `MSS_MAX_RETRIES`: calls per request while servers answer `PleaseRetry` (default 7)
    /// - `MSS_SECRET_FILE`: file to keep the user secret in between runs
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `MSS_PHC_URL` is missing or a value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let phc_url = var("MSS_PHC_URL")
            .ok_or_else(|| Error::Config("MSS_PHC_URL is required".into()))?;
        let phc_url: Url = phc_url
            .parse()
            .map_err(|e| Error::Config(format!("MSS_PHC_URL: {e}")))?;

        let mut config = Self::new(phc_url);

        if let Some(retries) = var("MSS_MAX_RETRIES") {
            let retries: u32 = retries
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("MSS_MAX_RETRIES: {e}")))?;
            if retries == 0 {
                return Err(Error::Config("MSS_MAX_RETRIES must be at least 1".into()));
            }
            config = config.with_max_retries(retries);
        }
        if let Some(path) = var("MSS_SECRET_FILE") {
            config = config.with_secret_file(path);
        }

        Ok(config)
    }

    /// At least one call is always made.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    #[must_use]
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = store;
        self
    }

    /// Keep the user secret in a JSON file at `path`.
    #[must_use]
    pub fn with_secret_file(self, path: impl Into<PathBuf>) -> Self {
        self.with_secret_store(Arc::new(FileSecretStore::new(path)))
    }

    #[must_use]
    pub fn phc_url(&self) -> &Url {
        &self.phc_url
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn secret_store(&self) -> &Arc<dyn SecretStore> {
        &self.secret_store
    }
}

#[cfg(feature = "http")]
mod http {
    use std::sync::Arc;

    use url::Url;

    use super::MssConfig;
    use crate::auths::AuthServer;
    use crate::error::Error;
    use crate::hub::{HUB_API_PREFIX, HubClient};
    use crate::mss::Mss;
    use crate::phc::{HubInformation, PhcServer};
    use crate::traits::PhcApi;
    use crate::transcryptor::Transcryptor;
    use crate::transport::ApiClient;

    impl MssConfig {
        /// Share one HTTP client (and its connection pool) between all servers.
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = Some(client);
            self
        }

        fn api_client(&self, base: &Url) -> ApiClient {
            let api = ApiClient::new(base).with_max_retries(self.max_retries);
            match &self.http {
                Some(client) => api.with_http_client(client.clone()),
                None => api,
            }
        }

        /// Fetch PHC's welcome and build clients for the Authentication Server
        /// and Transcryptor it announces.
        ///
        /// # Errors
        ///
        /// Returns transport errors if PHC cannot be reached.
        pub async fn connect(&self) -> Result<Mss<AuthServer, PhcServer, Transcryptor>, Error> {
            let phc = PhcServer::with_api_client(self.api_client(&self.phc_url));
            let welcome = phc.welcome().await?;

            let constellation = &welcome.constellation;
            if constellation.phc_url.as_str().trim_end_matches('/')
                != self.phc_url.as_str().trim_end_matches('/')
            {
                tracing::warn!(
                    configured = %self.phc_url,
                    announced = %constellation.phc_url,
                    "PubHubs Central announces a different URL than configured"
                );
            }
            tracing::info!(
                constellation = %constellation.id,
                hubs = welcome.hubs.len(),
                "Connected to PubHubs Central"
            );

            let auths = AuthServer::with_api_client(self.api_client(&constellation.auths_url));
            let transcryptor =
                Transcryptor::with_api_client(self.api_client(&constellation.transcryptor_url));
            Ok(Mss::new(
                auths,
                phc,
                transcryptor,
                welcome,
                Arc::clone(&self.secret_store),
            ))
        }

        /// Client for `hub`'s enter flow, for use with [`Mss::login_to_hub`].
        ///
        /// # Errors
        ///
        /// Returns [`Error::Config`] if the hub API URL cannot be formed.
        pub fn hub_client(&self, hub: &HubInformation) -> Result<HubClient, Error> {
            let base = self.api_client(&hub.url).url(HUB_API_PREFIX)?;
            Ok(HubClient::with_api_client(self.api_client(&base)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = MssConfig::new("https://phc.example.com".parse().unwrap());
        assert_eq!(config.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(config.secret_store().load().unwrap(), None);
    }

    #[test]
    fn phc_url_is_required() {
        let err = MssConfig::from_vars(vars(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("MSS_PHC_URL")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = MssConfig::from_vars(vars(&[("MSS_PHC_URL", "not a url")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.starts_with("MSS_PHC_URL")));

        for retries in ["many", "-1", "0"] {
            let err = MssConfig::from_vars(vars(&[
                ("MSS_PHC_URL", "https://phc.example.com"),
                ("MSS_MAX_RETRIES", retries),
            ]))
            .unwrap_err();
            assert!(matches!(err, Error::Config(msg) if msg.contains("MSS_MAX_RETRIES")));
        }
    }

    #[test]
    fn optional_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        let config = MssConfig::from_vars(vars(&[
            ("MSS_PHC_URL", "https://phc.example.com/"),
            ("MSS_MAX_RETRIES", " 3 "),
            ("MSS_SECRET_FILE", path.to_str().unwrap()),
        ]))
        .unwrap();

        assert_eq!(config.phc_url().as_str(), "https://phc.example.com/");
        assert_eq!(config.max_retries(), 3);

        let secret = crate::secret_store::StoredUserSecret::new(&[1; 32], 1);
        config.secret_store().save(&secret).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn max_retries_is_at_least_one() {
        let config = MssConfig::new("https://phc.example.com".parse().unwrap()).with_max_retries(0);
        assert_eq!(config.max_retries(), 1);
    }

    #[cfg(feature = "http")]
    #[test]
    fn hub_client_uses_the_hub_url() {
        let config = MssConfig::new("https://phc.example.com".parse().unwrap());
        let hub: crate::phc::HubInformation = serde_json::from_value(serde_json::json!({
            "name": "Hub one", "url": "https://hub1.example.com/", "id": "hub1"
        }))
        .unwrap();
        assert!(config.hub_client(&hub).is_ok());
    }
}
