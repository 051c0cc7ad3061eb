//! HTTP vocabulary shared by the controller and the transport adapter.
//!
//! # Design
//! These are plain data types. Header names are lowercased on the way in so
//! lookups are case-insensitive without a custom comparator, and iteration
//! order is stable (sorted by name) which keeps test expectations simple.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The verbs a request can be sent with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Verb table: shorthand name, method. `del` is kept as an alias of
    /// DELETE for callers that avoid the keyword-like name.
    pub const VERBS: [(&'static str, Method); 6] = [
        ("get", Method::Get),
        ("head", Method::Head),
        ("post", Method::Post),
        ("put", Method::Put),
        ("delete", Method::Delete),
        ("del", Method::Delete),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// GET and HEAD never carry an encoded JSON body.
    pub fn is_bodyless(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a verb name is not in `Method::VERBS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown method: {}", self.0)
    }
}

impl std::error::Error for UnknownMethod {}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Method::VERBS
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, method)| *method)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

/// Header map with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.inner.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Set `name` only if it is not present yet. Returns whether it was set.
    pub fn set_default(&mut self, name: &str, value: impl Into<String>) -> bool {
        let key = name.to_ascii_lowercase();
        if self.inner.contains_key(&key) {
            return false;
        }
        self.inner.insert(key, value.into());
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name.as_ref(), value);
        }
        headers
    }
}

/// Status line and headers of a response, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn new(status: u16, headers: Headers) -> Self {
        Self { status, headers }
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get("location")
    }
}

/// The final response as seen by the caller.
///
/// Attached to the request once the final (non-redirect) headers arrive.
/// `body` is filled in at completion when the request buffers its body; it
/// stays `None` for streamed and failed requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseView {
    pub status: u16,
    pub headers: Headers,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

impl ResponseView {
    pub(crate) fn from_head(head: ResponseHead, url: &url::Url) -> Self {
        Self {
            status: head.status,
            headers: head.headers,
            url: url.to_string(),
            body: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
