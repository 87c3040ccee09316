//! Request and response types
//!
//! Requests are identified by method plus normalized URL. Normalization
//! resolves relative paths against the worker scope and drops the fragment,
//! so `./index.html` and `http://host/app/index.html#top` share a key.

use reqwest::Url;

use super::errors::FetchError;

/// An outgoing request issued by a controlled client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Upper-cased HTTP method
    pub method: String,
    /// Absolute or scope-relative URL
    pub url: String,
    /// Request headers, passed through to the network unmodified
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Create a request with an explicit method
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            headers: Vec::new(),
        }
    }

    /// Create a GET request
    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Resolve this request's URL against `scope`
    pub fn resolve(&self, scope: &Url) -> Result<Self, FetchError> {
        Ok(Self {
            method: self.method.clone(),
            url: resolve_url(scope, &self.url)?,
            headers: self.headers.clone(),
        })
    }

    /// Key used by cache buckets. Only meaningful on a resolved request.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Whether a cache lookup can match this request
    pub fn is_cacheable(&self) -> bool {
        self.method == "GET"
    }
}

/// A response, either stored in a bucket or fresh from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final URL the response was produced for
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(url: &str, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Status in the 200-299 range
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a scope URL. Scopes must be absolute.
pub fn parse_scope(scope: &str) -> Result<Url, FetchError> {
    Url::parse(scope).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", scope, e)))
}

/// Resolve `raw` against `scope` and strip the fragment
pub fn resolve_url(scope: &Url, raw: &str) -> Result<String, FetchError> {
    let mut url = scope
        .join(raw)
        .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))?;
    url.set_fragment(None);
    Ok(url.to_string())
}
