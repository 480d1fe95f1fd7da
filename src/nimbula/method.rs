//! Request Pipeline
//!
//! A [`ResourceMethod`] is bound to one resource-type endpoint. Each call
//! ensures a session, resolves the target address, executes the verb,
//! captures any rotated session cookie, stores the response in a single slot
//! and classifies the status.

use super::address::{build_address, build_collection_address, build_discover_address, SEPARATOR};
use super::client::NimbulaClient;
use super::error::{Error, Result};
use super::http::{RequestDescriptor, Verb};
use super::session::session_cookie;
use super::status::{classify, Outcome};
use crate::resource::ResultSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Status and body of the most recent call
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Option<String>,
}

/// Request pipeline for one endpoint
pub struct ResourceMethod {
    client: NimbulaClient,
    url: String,
    response: Option<Response>,
}

impl ResourceMethod {
    pub fn new(client: NimbulaClient, resource: &str) -> Self {
        let url = client.endpoint_url(resource);
        Self {
            client,
            url,
            response: None,
        }
    }

    /// Root URL of the bound endpoint
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Address of an item: relative ids live under the caller's namespace
    pub fn item_address(&self, id: &str) -> String {
        let ns = self.client.namespace();
        if id.starts_with(SEPARATOR) {
            build_address(&self.url, Some(id), ns)
        } else {
            build_address(&build_address(&self.url, None, ns), Some(id), ns)
        }
    }

    /// Read one resource; 401 and 404 come back as status codes
    pub async fn get(&mut self, id: &str) -> Result<u16> {
        let target = self.item_address(id);
        let status = self.execute(Verb::Get, target, None).await?;
        if status == 401 {
            return Ok(status);
        }
        self.check()
    }

    /// List the account's collection (`{"result": [...]}`)
    pub async fn list(&mut self) -> Result<u16> {
        let target = build_collection_address(&self.url, self.client.account());
        self.execute(Verb::List, target, None).await?;
        self.check()
    }

    /// Enumerate names under `/account/[sub/]` with the directory media type
    pub async fn discover(&mut self, sub: Option<&str>) -> Result<u16> {
        let target = build_discover_address(&self.url, self.client.account(), sub);
        self.execute(Verb::Discover, target, None).await?;
        self.check()
    }

    /// Create a resource or trigger an action
    pub async fn post<B: Serialize + ?Sized>(&mut self, body: &B) -> Result<u16> {
        let target = format!("{}{}", self.url.trim_end_matches(SEPARATOR), SEPARATOR);
        let body = serde_json::to_string(body)?;
        self.execute(Verb::Post, target, Some(body)).await?;
        self.check()
    }

    /// Update a resource
    pub async fn put<B: Serialize + ?Sized>(&mut self, id: &str, body: &B) -> Result<u16> {
        let target = self.item_address(id);
        let body = serde_json::to_string(body)?;
        self.execute(Verb::Put, target, Some(body)).await?;
        self.check()
    }

    /// Delete a resource; deleting something already gone is a success
    pub async fn delete(&mut self, id: &str) -> Result<u16> {
        let target = self.item_address(id);
        self.execute(Verb::Delete, target, None).await?;
        self.check()
    }

    /// The last response, if any call has completed
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn body(&self) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.body.as_deref())
    }

    /// Last body as untyped JSON
    pub fn response_body(&self) -> Result<Value> {
        self.json()
    }

    /// Last body deserialized into a typed record
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.body().ok_or(Error::EmptyBody)?;
        Ok(serde_json::from_str(body)?)
    }

    /// Records of a `{"result": [...]}` listing
    pub fn results<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        Ok(self.json::<ResultSet<T>>()?.result)
    }

    async fn execute(&mut self, verb: Verb, target: String, body: Option<String>) -> Result<u16> {
        let cookie = self.client.ensure_session().await?;

        let mut request = RequestDescriptor::new(verb, target).cookie(Some(cookie));
        if let Some(body) = body {
            request = request.body(body);
        }
        let raw = self.client.http.execute(request).await?;

        // Rotation must stick even when the call itself fails
        if let Some(rotated) = session_cookie(&raw.set_cookies) {
            self.client.session.record(rotated).await;
        }

        self.response = Some(Response {
            status: raw.status,
            body: raw.body,
        });
        Ok(raw.status)
    }

    /// Classify the stored response; absence is a status, not an error
    fn check(&self) -> Result<u16> {
        let Some(response) = self.response.as_ref() else {
            return Err(Error::Unexpected("no request has been made".to_string()));
        };
        match classify(response.status, response.body.as_deref()) {
            Outcome::Success | Outcome::Absent => Ok(response.status),
            Outcome::Fatal(err) => Err(err.into()),
        }
    }
}
