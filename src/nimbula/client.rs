//! Nimbula Client
//!
//! Configuration scope shared by every request pipeline: the transport, the
//! session, the caller's identity and the endpoint root.

use super::address::{build_address, Namespace};
use super::error::{Error, Result};
use super::http::{NimbulaHttpClient, TransportOptions};
use super::method::ResourceMethod;
use super::poll::Poller;
use super::session::{Credentials, MemorySessionStore, Session, SessionStore};
use super::status::ErrorKind;
use crate::config::{Config, ConfigSessionStore};
use crate::resource::Endpoint;
use std::sync::Arc;
use url::Url;

struct ClientContext {
    endpoint: String,
    credentials: Credentials,
    region_id: Option<String>,
    poller: Poller,
}

/// Main Nimbula client
#[derive(Clone)]
pub struct NimbulaClient {
    pub http: NimbulaHttpClient,
    pub session: Session,
    context: Arc<ClientContext>,
}

/// Builder for [`NimbulaClient`]
pub struct ClientBuilder {
    endpoint: String,
    credentials: Credentials,
    transport: TransportOptions,
    store: Option<Arc<dyn SessionStore>>,
    region_id: Option<String>,
    poller: Poller,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn region(mut self, region_id: impl Into<String>) -> Self {
        self.region_id = Some(region_id.into());
        self
    }

    pub fn poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    pub fn build(self) -> Result<NimbulaClient> {
        let parsed = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {}", self.endpoint, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "endpoint must be http or https, got '{}'",
                parsed.scheme()
            )));
        }
        let ns = &self.credentials.namespace;
        if ns.account.is_empty() || ns.account.contains('/') {
            return Err(Error::Config("account must be a single non-empty path segment".to_string()));
        }
        if ns.user.is_empty() || ns.user.contains('/') {
            return Err(Error::Config("user must be a single non-empty path segment".to_string()));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));

        Ok(NimbulaClient {
            http: NimbulaHttpClient::new(&self.transport)?,
            session: Session::new(store),
            context: Arc::new(ClientContext {
                endpoint: self.endpoint,
                credentials: self.credentials,
                region_id: self.region_id,
                poller: self.poller,
            }),
        })
    }
}

impl NimbulaClient {
    pub fn builder(endpoint: impl Into<String>, credentials: Credentials) -> ClientBuilder {
        ClientBuilder {
            endpoint: endpoint.into(),
            credentials,
            transport: TransportOptions::default(),
            store: None,
            region_id: None,
            poller: Poller::default(),
        }
    }

    /// Create a client from persisted configuration
    ///
    /// The session cookie is read from, and written back to, the config file.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder(config.endpoint()?, config.credentials()?)
            .transport(config.transport_options())
            .session_store(Arc::new(ConfigSessionStore::new(config)))
            .poller(config.poller());
        if let Some(region) = config.region_id.as_deref() {
            builder = builder.region(region);
        }
        builder.build()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.context.credentials.namespace
    }

    pub fn account(&self) -> &str {
        &self.namespace().account
    }

    pub fn region_id(&self) -> Option<&str> {
        self.context.region_id.as_deref()
    }

    pub fn poller(&self) -> &Poller {
        &self.context.poller
    }

    /// `/account/user`
    pub fn name_prefix(&self) -> String {
        self.namespace().prefix()
    }

    /// Root URL of one resource-type endpoint
    pub fn endpoint_url(&self, resource: &str) -> String {
        build_address(&self.context.endpoint, Some(resource), self.namespace())
    }

    /// New request pipeline bound to an endpoint
    pub fn method(&self, endpoint: Endpoint) -> ResourceMethod {
        ResourceMethod::new(self.clone(), endpoint.path())
    }

    /// Session cookie, authenticating first if needed
    pub async fn ensure_session(&self) -> Result<String> {
        self.session
            .ensure(&self.http, &self.context.endpoint, &self.context.credentials)
            .await
    }

    pub async fn reset_session(&self) {
        self.session.reset().await;
    }

    /// Whether these credentials may use the compute service
    pub async fn is_subscribed(&self) -> Result<bool> {
        let mut method = self.method(Endpoint::Instance);
        match method.list().await {
            Ok(_) => Ok(true),
            Err(e)
                if matches!(
                    e.kind(),
                    Some(ErrorKind::AuthenticationRequired | ErrorKind::AccessDenied)
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Account id if the credentials work, `None` otherwise
    pub async fn test_context(&self) -> Option<String> {
        match self.is_subscribed().await {
            Ok(true) => Some(self.account().to_string()),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!("Failed to test Nimbula context: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> Result<NimbulaClient> {
        NimbulaClient::builder(endpoint, Credentials::new("acct1", "bob", "pw")).build()
    }

    #[test]
    fn test_endpoint_url() {
        let c = client("https://nimbula.example.com").unwrap();
        assert_eq!(c.endpoint_url("instance"), "https://nimbula.example.com/instance");
        let c = client("https://nimbula.example.com/").unwrap();
        assert_eq!(c.endpoint_url("instance"), "https://nimbula.example.com/instance");
        assert_eq!(c.name_prefix(), "/acct1/bob");
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(matches!(client("not a url"), Err(Error::Config(_))));
        assert!(matches!(client("ftp://host"), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_empty_identity() {
        let result = NimbulaClient::builder("https://h", Credentials::new("", "bob", "pw")).build();
        assert!(matches!(result, Err(Error::Config(_))));
        let result = NimbulaClient::builder("https://h", Credentials::new("a", "b/c", "pw")).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
