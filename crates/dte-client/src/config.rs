//! Client configuration

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use dte_core::AuthorityKeyring;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::token::DEFAULT_TOKEN_TTL_SECS;

const MAX_TOKEN_TTL_SECS: u64 = 86_400;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "DTE_CONFIG";

/// Environment variable overriding the target environment
pub const ENVIRONMENT_ENV_VAR: &str = "DTE_ENV";

/// Which authority deployment to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Certification,
    Production,
}

impl Environment {
    /// Host name prefix of the environment's servers
    pub fn server(&self) -> &'static str {
        match self {
            Environment::Certification => "maullin",
            Environment::Production => "palena",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Certification => write!(f, "certification"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "certification" | "cert" | "maullin" => Ok(Environment::Certification),
            "production" | "prod" | "palena" => Ok(Environment::Production),
            other => Err(ClientError::Config(format!("unknown environment: {}", other))),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub environment: Environment,

    /// Server host prefix overriding the environment's default
    pub server: Option<String>,

    /// RPC endpoint URL, with `{server}` and `{service}` placeholders
    pub endpoint_template: String,

    /// Upload URL, with a `{server}` placeholder
    pub upload_url_template: String,

    /// Whether to verify the server's TLS certificate
    pub verify_tls: bool,

    /// Per-request HTTP timeout (seconds)
    pub http_timeout_secs: u64,

    /// Attempts per remote call, at most 10
    pub max_retries: u32,

    /// Linear backoff step (milliseconds)
    pub backoff_step_ms: u64,

    /// Token lifetime (seconds)
    pub token_ttl_secs: u64,

    /// Directory of authority certificates named `<key id>.cer|.pem|.crt`
    pub authority_certs_dir: Option<PathBuf>,

    /// Directory for a shared on-disk token cache; in-memory when unset
    pub token_cache_dir: Option<PathBuf>,

    /// Directory for upload spool files; system temp dir when unset
    pub spool_dir: Option<PathBuf>,

    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            server: None,
            endpoint_template: "https://{server}.sii.cl/DTEWS/{service}.jws".to_string(),
            upload_url_template: "https://{server}.sii.cl/cgi_dte/UPL/DTEUpload".to_string(),
            verify_tls: true,
            http_timeout_secs: 30,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step_ms: 200,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            authority_certs_dir: None,
            token_cache_dir: None,
            spool_dir: None,
            user_agent: format!("dte-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// `$DTE_CONFIG`, else `<config dir>/dte/config.json`
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join("dte").join("config.json")))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn server(&self) -> &str {
        self.server
            .as_deref()
            .unwrap_or_else(|| self.environment.server())
    }

    /// URL of an RPC service such as `CrSeed` or `QueryEstUp`
    pub fn endpoint_url(&self, service: &str) -> String {
        self.endpoint_template
            .replace("{server}", self.server())
            .replace("{service}", service)
    }

    pub fn upload_url(&self) -> String {
        self.upload_url_template.replace("{server}", self.server())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_step_ms))
    }

    /// Token lifetime, capped at one day
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs.min(MAX_TOKEN_TTL_SECS) as i64)
    }

    /// Bundled authority keys, overridden by those in `authority_certs_dir`
    ///
    /// Files whose stem is not a key id are skipped; a file that is named
    /// like a key but cannot be decoded is an error.
    pub fn load_authority_keyring(&self) -> Result<AuthorityKeyring> {
        let mut keyring = AuthorityKeyring::bundled()?;
        let Some(dir) = &self.authority_certs_dir else {
            return Ok(keyring);
        };

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_cert = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("cer" | "pem" | "crt")
            );
            let key_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i64>().ok());
            let (true, Some(key_id)) = (is_cert, key_id) else {
                debug!(path = %path.display(), "skipping non-authority file");
                continue;
            };

            let encoded = std::fs::read(&path)?;
            keyring.insert_encoded(key_id, &encoded).map_err(|e| {
                warn!(path = %path.display(), error = %e, "unreadable authority certificate");
                ClientError::Core(e)
            })?;
        }

        debug!(keys = ?keyring.key_ids(), "authority keyring loaded");
        Ok(keyring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint_url("CrSeed"), "https://maullin.sii.cl/DTEWS/CrSeed.jws");
        assert_eq!(config.upload_url(), "https://maullin.sii.cl/cgi_dte/UPL/DTEUpload");

        let production = ClientConfig {
            environment: Environment::Production,
            ..Default::default()
        };
        assert_eq!(production.endpoint_url("QueryEstUp"), "https://palena.sii.cl/DTEWS/QueryEstUp.jws");
    }

    #[test]
    fn test_server_override() {
        let config = ClientConfig {
            server: Some("localhost".into()),
            endpoint_template: "http://{server}:8080/{service}".into(),
            ..Default::default()
        };
        assert_eq!(config.endpoint_url("CrSeed"), "http://localhost:8080/CrSeed");
    }

    #[test]
    fn test_retry_policy_is_clamped() {
        let config = ClientConfig {
            max_retries: 25,
            ..Default::default()
        };
        assert_eq!(config.retry_policy().max_retries(), 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ClientConfig {
            environment: Environment::Production,
            token_ttl_secs: 30,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"environment":"production"}"#).unwrap();
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.max_retries, 10);

        let missing = ClientConfig::load_or_default(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(missing, ClientConfig::default());
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("maullin".parse::<Environment>().unwrap(), Environment::Certification);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_keyring_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cert = include_str!("../../dte-core/tests/fixtures/authority_cert.pem");
        std::fs::write(dir.path().join("100.cer"), cert).unwrap();
        std::fs::write(dir.path().join("README.txt"), "bundled authority certificates").unwrap();

        let config = ClientConfig {
            authority_certs_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let keyring = config.load_authority_keyring().unwrap();
        let mut expected = AuthorityKeyring::new();
        expected.insert_encoded(100, cert.as_bytes()).unwrap();
        assert_eq!(keyring.get(100), expected.get(100));

        std::fs::write(dir.path().join("300.pem"), "garbage").unwrap();
        assert!(config.load_authority_keyring().is_err());
    }

    #[test]
    fn test_keyring_defaults_to_bundled() {
        let keyring = ClientConfig::default().load_authority_keyring().unwrap();
        assert_eq!(keyring.key_ids(), AuthorityKeyring::bundled().unwrap().key_ids());
    }
}
