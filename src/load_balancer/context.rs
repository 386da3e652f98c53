//! Per-request data handed to a strategy.
//!
//! The host engine owns the real request; selection only needs the target
//! path and header lookups, so this is a small owned view of both.

/// Request attributes visible to selection strategies.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    path: String,
    headers: Vec<(String, String)>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Request target path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// First header value with a case-insensitive name match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
