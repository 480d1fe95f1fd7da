//! Configuration Management
//!
//! Handles persistent configuration storage for nimbula, including the
//! session cookie written back after authentication.

use crate::nimbula::error::{Error, Result};
use crate::nimbula::http::TransportOptions;
use crate::nimbula::poll::Poller;
use crate::nimbula::session::{Credentials, SessionStore};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

fn default_request_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_timeout() -> u64 {
    20 * 60
}

/// User configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend base URL, e.g. `https://nimbula.example.com`
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub ignore_cert_signature: bool,
    /// Session cookie from the last authentication
    #[serde(default)]
    pub auth_cookie: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Where this config was loaded from; saves go back there
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            account: None,
            user: None,
            secret: None,
            region_id: None,
            proxy_host: None,
            proxy_port: None,
            ignore_cert_signature: false,
            auth_cookie: None,
            request_timeout_secs: default_request_timeout(),
            poll_interval_secs: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
            path: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("account", &self.account)
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("region_id", &self.region_id)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("ignore_cert_signature", &self.ignore_cert_signature)
            .field("auth_cookie", &self.auth_cookie.as_ref().map(|_| "***"))
            .field("path", &self.path)
            .finish()
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("nimbula").join("config.json"))
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a file; a missing or unreadable file is an empty config
    pub fn load_from(path: &Path) -> Self {
        let mut config = if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config {:?}: {}", path, e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.path = Some(path.to_path_buf());
        config
    }

    /// Save configuration to the file it came from
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = self.path.clone().or_else(Self::config_path) else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write config {:?}", path))?;

        Ok(())
    }

    /// Apply `NIMBULA_*` environment overrides
    pub fn with_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(v) = var("NIMBULA_ENDPOINT") {
            self.endpoint = Some(v);
        }
        if let Some(v) = var("NIMBULA_ACCOUNT") {
            self.account = Some(v);
        }
        if let Some(v) = var("NIMBULA_USER") {
            self.user = Some(v);
        }
        if let Some(v) = var("NIMBULA_PASSWORD") {
            self.secret = Some(v);
        }
        if let Some(v) = var("NIMBULA_PROXY_HOST") {
            self.proxy_host = Some(v);
        }
        if let Some(v) = var("NIMBULA_PROXY_PORT") {
            match v.parse() {
                Ok(port) => self.proxy_port = Some(port),
                Err(_) => tracing::warn!("Invalid NIMBULA_PROXY_PORT: {}", v),
            }
        }
        if let Some(v) = var("NIMBULA_IGNORE_CERT") {
            self.ignore_cert_signature = v.eq_ignore_ascii_case("true") || v == "1";
        }
        self
    }

    pub fn endpoint(&self) -> Result<String> {
        self.endpoint
            .clone()
            .ok_or_else(|| Error::Config("no endpoint configured".to_string()))
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let account = self
            .account
            .as_deref()
            .ok_or_else(|| Error::Config("no account configured".to_string()))?;
        let user = self
            .user
            .as_deref()
            .ok_or_else(|| Error::Config("no user configured".to_string()))?;
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| Error::Config("no secret configured".to_string()))?;
        Credentials::from_bytes(account, user.as_bytes(), secret.as_bytes())
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            proxy_host: self.proxy_host.clone(),
            proxy_port: self.proxy_port,
            ignore_cert_signature: self.ignore_cert_signature,
            timeout: Some(Duration::from_secs(self.request_timeout_secs)),
        }
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            Duration::from_secs(self.poll_interval_secs.max(1)),
            Duration::from_secs(self.poll_timeout_secs),
        )
    }
}

/// Session store backed by the `auth_cookie` field of the config file
///
/// Only the cookie is written back; overrides applied in memory stay there.
/// Every store reads through to the file, so clients built from the same
/// config share one login.
pub struct ConfigSessionStore {
    path: Option<PathBuf>,
    cookie: Mutex<Option<String>>,
}

const COOKIE_KEY: &str = "auth_cookie";

/// Top-level JSON object of the config file; a missing file is empty
fn read_document(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    if !path.exists() {
        return Ok(serde_json::Map::new());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("Malformed config {:?}", path))?;
    match value {
        serde_json::Value::Object(document) => Ok(document),
        _ => anyhow::bail!("Config {:?} is not a JSON object", path),
    }
}

impl ConfigSessionStore {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.path.clone().or_else(Config::config_path),
            cookie: Mutex::new(config.auth_cookie.clone()),
        }
    }

    fn persisted(&self) -> Option<String> {
        let path = self.path.as_deref()?;
        match read_document(path) {
            Ok(document) => document.get(COOKIE_KEY)?.as_str().map(str::to_string),
            Err(e) => {
                tracing::warn!("Cannot read session cookie: {:#}", e);
                None
            }
        }
    }

    /// Rewrite only the cookie key; a file that does not parse is left alone
    fn update(&self, cookie: Option<&str>) -> anyhow::Result<()> {
        *self
            .cookie
            .lock()
            .map_err(|_| anyhow::anyhow!("session cookie lock poisoned"))? = cookie.map(str::to_string);

        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let mut document = read_document(path)?;
        match cookie {
            Some(cookie) => document.insert(COOKIE_KEY.to_string(), cookie.into()),
            None => document.remove(COOKIE_KEY),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(&serde_json::Value::Object(document))?;
        std::fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))?;
        Ok(())
    }
}

impl SessionStore for ConfigSessionStore {
    fn load(&self) -> Option<String> {
        let mut cache = self.cookie.lock().ok()?;
        if cache.is_none() {
            *cache = self.persisted();
        }
        cache.clone()
    }

    fn save(&self, cookie: &str) -> anyhow::Result<()> {
        self.update(Some(cookie))
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.update(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.poll_timeout_secs, 1200);
        assert!(!config.ignore_cert_signature);
    }

    #[test]
    fn test_missing_fields_are_config_errors() {
        let config = Config::default();
        assert!(matches!(config.endpoint(), Err(Error::Config(_))));
        assert!(matches!(config.credentials(), Err(Error::Config(_))));
    }

    #[test]
    fn test_store_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::load_from(&path);
        config.endpoint = Some("https://nimbula.example.com".to_string());
        config.save().unwrap();

        let store = ConfigSessionStore::new(&config);
        assert_eq!(store.load(), None);
        store.save("nimbula=XYZ").unwrap();
        assert_eq!(store.load().as_deref(), Some("nimbula=XYZ"));

        let reloaded = Config::load_from(&path);
        assert_eq!(reloaded.auth_cookie.as_deref(), Some("nimbula=XYZ"));
        assert_eq!(reloaded.endpoint.as_deref(), Some("https://nimbula.example.com"));

        store.clear().unwrap();
        assert_eq!(Config::load_from(&path).auth_cookie, None);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_store_does_not_persist_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::load_from(&path);
        config.secret = Some("from-the-environment".to_string());

        ConfigSessionStore::new(&config).save("nimbula=XYZ").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("from-the-environment"));
        assert!(content.contains("nimbula=XYZ"));
    }

    #[test]
    fn test_store_picks_up_cookie_written_by_another_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json"));

        let first = ConfigSessionStore::new(&config);
        let second = ConfigSessionStore::new(&config);
        assert_eq!(second.load(), None);

        first.save("nimbula=XYZ").unwrap();
        assert_eq!(second.load().as_deref(), Some("nimbula=XYZ"));
    }

    #[test]
    fn test_store_keeps_unparseable_config_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let original = r#"{"endpoint":"https://h","account":"acct1","user":"bob","proxy_port":"8080"}"#;
        std::fs::write(&path, original).unwrap();

        let config = Config::load_from(&path);
        let store = ConfigSessionStore::new(&config);
        store.save("nimbula=XYZ").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("https://h"));
        assert!(content.contains("\"proxy_port\": \"8080\""));
        assert!(content.contains("nimbula=XYZ"));
    }

    #[test]
    fn test_store_refuses_to_overwrite_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{\"endpoint\": \"https://h\",").unwrap();

        let store = ConfigSessionStore::new(&Config::load_from(&path));
        assert!(store.save("nimbula=XYZ").is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"endpoint\": \"https://h\",");
        assert_eq!(store.load().as_deref(), Some("nimbula=XYZ"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = Config {
            secret: Some("hunter2".to_string()),
            auth_cookie: Some("nimbula=XYZ".to_string()),
            ..Config::default()
        };
        let shown = format!("{:?}", config);
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("XYZ"));
    }
}
