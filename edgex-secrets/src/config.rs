//! Secret-store settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port the secret store listens on.
pub const SECRET_STORE_PORT: u16 = 8200;

/// Port of the secret-store setup service that regenerates tokens.
pub const SECRET_STORE_SETUP_PORT: u16 = 59843;

/// Service key used when `SERVICE_HOST` is not set.
pub const DEFAULT_SERVICE_KEY: &str = "edgex-node";

/// Where the secret-store setup service drops the session token for a service.
pub fn token_file_for(service_key: &str) -> PathBuf {
    Path::new("/tmp/edgex/secrets")
        .join(service_key)
        .join("secrets-token.json")
}

/// Configuration of the secret-store integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretStoreConfig {
    /// Whether the secret store is used at all
    pub enabled: bool,
    /// Service key in secret-store paths
    pub service_key: String,
    /// Base URL of the secret store, without the `/v1` suffix
    pub secret_store_url: String,
    /// Base URL of the token regeneration service
    pub setup_url: String,
    /// Session token file
    pub token_file: PathBuf,
    /// Attempts at reading and validating the session token
    pub retry_limit: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_key: DEFAULT_SERVICE_KEY.to_string(),
            secret_store_url: format!("http://localhost:{}", SECRET_STORE_PORT),
            setup_url: format!("http://localhost:{}", SECRET_STORE_SETUP_PORT),
            token_file: token_file_for(DEFAULT_SERVICE_KEY),
            retry_limit: 5,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SecretStoreConfig {
    /// Read the configuration from the process environment.
    ///
    /// | variable | effect |
    /// |----------|--------|
    /// | `EDGEX_SECURITY_SECRET_STORE` | enabled unless unset, empty or `"false"` |
    /// | `SERVICE_HOST` | service key |
    /// | `SECRETSTORE_HOST` | secret-store host |
    /// | `SECRETSTORESETUP_HOST` | regeneration service host |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let enabled = non_empty("EDGEX_SECURITY_SECRET_STORE").is_some_and(|value| value != "false");
        let service_key =
            non_empty("SERVICE_HOST").unwrap_or_else(|| DEFAULT_SERVICE_KEY.to_string());
        let store_host = non_empty("SECRETSTORE_HOST").unwrap_or_else(|| "localhost".to_string());
        let setup_host =
            non_empty("SECRETSTORESETUP_HOST").unwrap_or_else(|| "localhost".to_string());

        Self {
            enabled,
            token_file: token_file_for(&service_key),
            service_key,
            secret_store_url: format!("http://{}:{}", store_host, SECRET_STORE_PORT),
            setup_url: format!("http://{}:{}", setup_host, SECRET_STORE_SETUP_PORT),
            ..Self::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the service key. Also points the token file at that service's
    /// default location; call [`with_token_file`](Self::with_token_file)
    /// afterwards to override it.
    pub fn with_service_key(mut self, service_key: impl Into<String>) -> Self {
        self.service_key = service_key.into();
        self.token_file = token_file_for(&self.service_key);
        self
    }

    pub fn with_secret_store_url(mut self, url: impl Into<String>) -> Self {
        self.secret_store_url = url.into();
        self
    }

    pub fn with_setup_url(mut self, url: impl Into<String>) -> Self {
        self.setup_url = url.into();
        self
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = path.into();
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Secret-store API root, e.g. `http://localhost:8200/v1`.
    pub fn api_url(&self) -> String {
        format!("{}/v1", self.secret_store_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SecretStoreConfig::from_lookup(lookup(&[]));
        assert_eq!(config, SecretStoreConfig::default());
        assert!(!config.enabled);
        assert_eq!(
            config.token_file,
            PathBuf::from("/tmp/edgex/secrets/edgex-node/secrets-token.json")
        );
        assert_eq!(config.api_url(), "http://localhost:8200/v1");
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(""), false)]
    #[case(Some("false"), false)]
    #[case(Some("true"), true)]
    #[case(Some("1"), true)]
    fn test_enabled_flag(#[case] value: Option<&str>, #[case] expected: bool) {
        let vars: Vec<(&str, &str)> = value
            .map(|v| vec![("EDGEX_SECURITY_SECRET_STORE", v)])
            .unwrap_or_default();
        assert_eq!(SecretStoreConfig::from_lookup(lookup(&vars)).enabled, expected);
    }

    #[test]
    fn test_hosts_and_service_key() {
        let config = SecretStoreConfig::from_lookup(lookup(&[
            ("SERVICE_HOST", "app-node-red"),
            ("SECRETSTORE_HOST", "edgex-secret-store"),
            ("SECRETSTORESETUP_HOST", "edgex-security-secretstore-setup"),
        ]));

        assert_eq!(config.service_key, "app-node-red");
        assert_eq!(config.secret_store_url, "http://edgex-secret-store:8200");
        assert_eq!(config.setup_url, "http://edgex-security-secretstore-setup:59843");
        assert_eq!(
            config.token_file,
            PathBuf::from("/tmp/edgex/secrets/app-node-red/secrets-token.json")
        );
    }

    #[test]
    fn test_builder_overrides() {
        let config = SecretStoreConfig::default()
            .with_service_key("svc")
            .with_token_file("/run/token.json")
            .with_secret_store_url("http://127.0.0.1:1234/")
            .with_retry_limit(2);

        assert_eq!(config.token_file, PathBuf::from("/run/token.json"));
        assert_eq!(config.api_url(), "http://127.0.0.1:1234/v1");
        assert_eq!(config.retry_limit, 2);
    }
}
