//! Session Manager
//!
//! Owns the one reusable session cookie for a configuration scope. The cookie
//! is obtained once through the authentication handshake, replaced wholesale
//! whenever the backend rotates it, and written back to a [`SessionStore`] so
//! later clients can skip the handshake.

use super::address::{build_address, Namespace};
use super::error::{Error, Result};
use super::http::{NimbulaHttpClient, RequestDescriptor, Verb};
use super::status::{classify, Outcome};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Name the backend gives its session cookie
pub const SESSION_COOKIE: &str = "nimbula";

/// Endpoint of the authentication handshake
pub const AUTHENTICATE: &str = "authenticate";

/// Persistent home of the session cookie
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, cookie: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Session store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    cookie: std::sync::RwLock<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(cookie: impl Into<String>) -> Self {
        Self {
            cookie: std::sync::RwLock::new(Some(cookie.into())),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<String> {
        self.cookie.read().ok().and_then(|c| c.clone())
    }

    fn save(&self, cookie: &str) -> anyhow::Result<()> {
        let mut slot = self
            .cookie
            .write()
            .map_err(|_| anyhow::anyhow!("session store lock poisoned"))?;
        *slot = Some(cookie.to_string());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let mut slot = self
            .cookie
            .write()
            .map_err(|_| anyhow::anyhow!("session store lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// Identity used for the authentication handshake
#[derive(Clone)]
pub struct Credentials {
    pub namespace: Namespace,
    secret: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            namespace: Namespace::new(account, user),
            secret: secret.into(),
        }
    }

    /// Build from raw key material; user and secret must be UTF-8
    pub fn from_bytes(account: &str, user: &[u8], secret: &[u8]) -> Result<Self> {
        let user = std::str::from_utf8(user)
            .map_err(|_| Error::Config("user identity is not valid UTF-8".to_string()))?;
        let secret = std::str::from_utf8(secret)
            .map_err(|_| Error::Config("secret is not valid UTF-8".to_string()))?;
        Ok(Self::new(account, user, secret))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("namespace", &self.namespace)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    user: String,
    password: &'a str,
}

/// Pick the session cookie out of `Set-Cookie` values
///
/// Returns the `nimbula=...` pair without its attributes; the last matching
/// header wins.
pub fn session_cookie<'a, I>(set_cookies: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let prefix = format!("{}=", SESSION_COOKIE);
    set_cookies
        .into_iter()
        .filter(|v| v.starts_with(&prefix))
        .last()
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
}

/// Session cookie cache shared by every pipeline of one client
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    cookie: Arc<RwLock<Option<String>>>,
    login: Arc<Mutex<()>>,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie: Arc::new(RwLock::new(None)),
            login: Arc::new(Mutex::new(())),
        }
    }

    /// Last fully-written cookie, from memory or the store
    pub async fn current(&self) -> Option<String> {
        {
            let cache = self.cookie.read().await;
            if let Some(cookie) = cache.as_ref() {
                return Some(cookie.clone());
            }
        }

        let persisted = self
            .store
            .load()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())?;
        let mut cache = self.cookie.write().await;
        Some(cache.get_or_insert(persisted).clone())
    }

    /// Replace the cookie and write it back to the store
    pub async fn record(&self, cookie: String) {
        {
            let mut cache = self.cookie.write().await;
            if cache.as_deref() == Some(cookie.as_str()) {
                return;
            }
            *cache = Some(cookie.clone());
        }
        tracing::debug!("Session cookie updated");
        if let Err(e) = self.store.save(&cookie) {
            tracing::warn!("Failed to persist session cookie: {}", e);
        }
    }

    /// Forget the cookie; the next call authenticates again
    pub async fn reset(&self) {
        *self.cookie.write().await = None;
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear persisted session cookie: {}", e);
        }
    }

    /// Return the session cookie, authenticating if there is none yet
    pub async fn ensure(
        &self,
        http: &NimbulaHttpClient,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<String> {
        if let Some(cookie) = self.current().await {
            return Ok(cookie);
        }

        // One handshake at a time; whoever waited behind it reuses its cookie.
        let _guard = self.login.lock().await;
        if let Some(cookie) = self.current().await {
            return Ok(cookie);
        }

        let cookie = authenticate(http, endpoint, credentials).await?;
        self.record(cookie.clone()).await;
        Ok(cookie)
    }
}

/// Run the authentication handshake and return the session cookie
async fn authenticate(http: &NimbulaHttpClient, endpoint: &str, credentials: &Credentials) -> Result<String> {
    let url = format!("{}/", build_address(endpoint, Some(AUTHENTICATE), &credentials.namespace));
    tracing::info!("Authenticating {} against {}", credentials.namespace.prefix(), url);

    let body = serde_json::to_string(&AuthRequest {
        user: credentials.namespace.prefix(),
        password: &credentials.secret,
    })?;
    let response = http
        .execute(RequestDescriptor::new(Verb::Post, url).body(body).redacted())
        .await?;

    match classify(response.status, response.body.as_deref()) {
        Outcome::Success => {}
        Outcome::Absent => {
            return Err(Error::Authentication {
                status: Some(response.status),
                message: "authentication resource not found".to_string(),
            })
        }
        Outcome::Fatal(err) => {
            return Err(Error::Authentication {
                status: Some(err.status),
                message: err.message,
            })
        }
    }

    session_cookie(&response.set_cookies).ok_or_else(|| Error::Authentication {
        status: Some(response.status),
        message: "no session cookie in authentication response".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_strips_attributes() {
        let headers = vec![
            "other=1; Path=/".to_string(),
            "nimbula=XYZ; Path=/; Max-Age=1800".to_string(),
        ];
        assert_eq!(session_cookie(&headers).as_deref(), Some("nimbula=XYZ"));
    }

    #[test]
    fn test_session_cookie_last_wins() {
        let headers = vec!["nimbula=A".to_string(), "nimbula=B; Path=/".to_string()];
        assert_eq!(session_cookie(&headers).as_deref(), Some("nimbula=B"));
    }

    #[test]
    fn test_session_cookie_ignores_similar_names() {
        let headers = vec!["nimbulax=1".to_string()];
        assert_eq!(session_cookie(&headers), None);
    }

    #[test]
    fn test_credentials_from_bytes() {
        let creds = Credentials::from_bytes("acct1", b"bob", b"pw").unwrap();
        assert_eq!(creds.namespace.prefix(), "/acct1/bob");
        assert!(Credentials::from_bytes("acct1", &[0xff, 0xfe], b"pw").is_err());
        assert!(!format!("{:?}", creds).contains("pw\""));
    }

    #[tokio::test]
    async fn test_current_reads_persisted_cookie() {
        let store = Arc::new(MemorySessionStore::with_cookie("nimbula=persisted"));
        let session = Session::new(store);
        assert_eq!(session.current().await.as_deref(), Some("nimbula=persisted"));
    }

    #[tokio::test]
    async fn test_blank_persisted_cookie_is_ignored() {
        let session = Session::new(Arc::new(MemorySessionStore::with_cookie("   ")));
        assert_eq!(session.current().await, None);
    }

    #[tokio::test]
    async fn test_record_writes_back_and_reset_clears() {
        let store = Arc::new(MemorySessionStore::new());
        let session = Session::new(store.clone());

        session.record("nimbula=new".to_string()).await;
        assert_eq!(store.load().as_deref(), Some("nimbula=new"));
        assert_eq!(session.current().await.as_deref(), Some("nimbula=new"));

        session.reset().await;
        assert_eq!(store.load(), None);
        assert_eq!(session.current().await, None);
    }

    #[test]
    fn test_clones_share_one_cookie() {
        let session = Session::new(Arc::new(MemorySessionStore::new()));
        let other = session.clone();
        tokio_test::block_on(other.record("nimbula=shared".to_string()));
        assert_eq!(
            tokio_test::block_on(session.current()).as_deref(),
            Some("nimbula=shared")
        );
    }
}
