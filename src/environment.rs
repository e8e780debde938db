//! Request/response abstraction consumed by tree traversal and pipelines.
//!
//! The transport layer fills in the request side; pipelines write status and
//! headers back as side effects on the same value.

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Environment {
    uri: String,
    prefix: String,
    query: Option<String>,
    method: Method,
    request_headers: HeaderMap,
    attributes: HashMap<String, String>,
    status: StatusCode,
    response_headers: HeaderMap,
}

impl Environment {
    /// Create an environment for `uri`, which may carry a `?query` suffix.
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri, None),
        };

        Self {
            uri: path,
            prefix: String::new(),
            query,
            method: Method::GET,
            request_headers: HeaderMap::new(),
            attributes: HashMap::new(),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.request_headers.append(name, value);
            }
            Err(_) => warn!(header = %name, "ignoring request header with invalid value"),
        }
        self
    }

    /// URI relative to the sitemap currently being traversed.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Prefix consumed by enclosing mounts.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full effective URI: mount prefix, path and query string.
    pub fn request_uri(&self) -> String {
        let mut full = format!("{}{}", self.prefix, self.uri);
        if let Some(query) = self.query.as_deref() {
            full.push('?');
            full.push_str(query);
        }
        full
    }

    /// Move `prefix` from the URI into the context prefix.
    ///
    /// Returns the previous `(prefix, uri)` pair for [`Environment::restore_context`],
    /// or `None` when the URI does not start with `prefix`.
    pub fn enter_context(&mut self, prefix: &str) -> Option<(String, String)> {
        let rest = self.uri.strip_prefix(prefix)?.to_string();
        let saved = (self.prefix.clone(), std::mem::replace(&mut self.uri, rest));
        self.prefix.push_str(prefix);
        Some(saved)
    }

    pub fn restore_context(&mut self, saved: (String, String)) {
        let (prefix, uri) = saved;
        self.prefix = prefix;
        self.uri = uri;
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Replace a response header. Values that are not valid header text are
    /// dropped with a warning.
    pub fn set_header(&mut self, name: HeaderName, value: impl AsRef<str>) {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.response_headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "dropping response header with invalid value"),
        }
    }

    pub fn set_content_type(&mut self, mime_type: &str) {
        self.set_header(header::CONTENT_TYPE, mime_type);
    }

    pub fn set_content_length(&mut self, length: usize) {
        self.set_header(header::CONTENT_LENGTH, length.to_string());
    }
}
