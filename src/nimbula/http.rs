//! HTTP transport for the resource protocol

use super::error::Result;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;

/// Media type of every regular request and response
pub const MEDIA_TYPE: &str = "application/nimbula-v2+json";
/// Media type requested when enumerating a directory
pub const DIRECTORY_MEDIA_TYPE: &str = "application/nimbula-v2+directory+json";
/// Content type of PUT bodies
pub const PLAIN_JSON: &str = "application/json";

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const USER_AGENT: &str = concat!("nimbula/", env!("CARGO_PKG_VERSION"));

/// Sanitize a body for logging
/// Truncates long bodies and drops control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Protocol verbs; LIST and DISCOVER are reads with their own media types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Discover,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn method(self) -> Method {
        match self {
            Verb::Get | Verb::List | Verb::Discover => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Delete => Method::DELETE,
        }
    }

    pub fn accept(self) -> &'static str {
        match self {
            Verb::Discover => DIRECTORY_MEDIA_TYPE,
            _ => MEDIA_TYPE,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Verb::Put => PLAIN_JSON,
            _ => MEDIA_TYPE,
        }
    }
}

/// One outgoing request; not retained after execution
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub verb: Verb,
    pub url: String,
    pub body: Option<String>,
    pub cookie: Option<String>,
    /// Keep the body out of the wire log (credentials)
    pub redact_body: bool,
}

impl RequestDescriptor {
    pub fn new(verb: Verb, url: impl Into<String>) -> Self {
        Self {
            verb,
            url: url.into(),
            body: None,
            cookie: None,
            redact_body: false,
        }
    }

    pub fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn redacted(mut self) -> Self {
        self.redact_body = true;
        self
    }
}

/// Raw response as captured off the wire
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub set_cookies: Vec<String>,
    /// `None` for 204 or an empty body
    pub body: Option<String>,
}

/// Transport settings derived from configuration
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub ignore_cert_signature: bool,
    pub timeout: Option<Duration>,
}

/// HTTP client wrapper for backend calls
#[derive(Clone)]
pub struct NimbulaHttpClient {
    client: Client,
}

impl NimbulaHttpClient {
    /// Create a new HTTP client
    pub fn new(options: &TransportOptions) -> Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);

        if let Some(host) = options.proxy_host.as_deref() {
            let proxy = match options.proxy_port {
                Some(port) => format!("http://{}:{}", host, port),
                None => format!("http://{}", host),
            };
            tracing::debug!("Using proxy {}", proxy);
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        if options.ignore_cert_signature {
            tracing::warn!("Certificate validation disabled for backend connections");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Execute one request and capture status, cookies and body
    pub async fn execute(&self, request: RequestDescriptor) -> Result<RawResponse> {
        let verb = request.verb;
        tracing::debug!("{:?} {}", verb, request.url);

        let mut builder = self
            .client
            .request(verb.method(), &request.url)
            .header(ACCEPT, verb.accept());
        if let Some(cookie) = request.cookie.as_deref() {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(body) = request.body.clone() {
            if tracing::enabled!(target: "nimbula::wire", tracing::Level::TRACE) {
                let shown = if request.redact_body {
                    "[redacted]".to_string()
                } else {
                    sanitize_for_log(&body)
                };
                tracing::trace!(target: "nimbula::wire", ">>> {:?} {} {}", verb, request.url, shown);
            }
            builder = builder.header(CONTENT_TYPE, verb.content_type()).body(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("I/O error from server communications: {}", e);
            e
        })?;

        let status = response.status();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        tracing::debug!("HTTP STATUS: {}", status.as_u16());

        let body = if status == StatusCode::NO_CONTENT {
            None
        } else {
            let text = response.text().await?;
            if text.is_empty() {
                None
            } else {
                tracing::trace!(target: "nimbula::wire", "<<< {} {}", status.as_u16(), sanitize_for_log(&text));
                Some(text)
            }
        };

        if status.as_u16() >= 400 && status != StatusCode::NOT_FOUND {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!(
                "API error: {} - {}",
                status,
                body.as_deref().map(sanitize_for_log).unwrap_or_default()
            );
        }

        Ok(RawResponse {
            status: status.as_u16(),
            set_cookies,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(500);
        let out = sanitize_for_log(&long);
        assert!(out.starts_with(&"x".repeat(200)));
        assert!(out.contains("[truncated, 500 bytes total]"));
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }

    #[test]
    fn test_verb_media_types() {
        assert_eq!(Verb::Discover.accept(), DIRECTORY_MEDIA_TYPE);
        assert_eq!(Verb::List.accept(), MEDIA_TYPE);
        assert_eq!(Verb::List.method(), Method::GET);
        assert_eq!(Verb::Put.content_type(), PLAIN_JSON);
        assert_eq!(Verb::Post.content_type(), MEDIA_TYPE);
    }
}
