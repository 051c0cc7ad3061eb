//! The canonical request description produced by the dispatcher.
//!
//! # Design
//! Every call shape the client accepts is normalized into one
//! `RequestOptions`. Fields left as `None` fall back to `ClientConfig`
//! defaults when the dispatcher prepares the request, so a middleware can
//! tell "unset" apart from "explicitly zero".

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::http::{Headers, Method};

/// Request body supplied upfront.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Raw(Vec<u8>),
    /// Serialized with `serde_json` when `json` mode is on.
    Json(serde_json::Value),
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Raw(bytes)
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body::Raw(bytes.to_vec())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Raw(text.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Raw(text.as_bytes().to_vec())
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

/// Opaque connection-reuse handle shared between requests.
///
/// The controller never looks inside; transports downcast it to whatever
/// agent type they manage.
#[derive(Clone)]
pub struct Pool(Rc<dyn Any>);

impl Pool {
    pub fn new<T: Any>(agent: T) -> Self {
        Pool(Rc::new(agent))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Pool) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pool(..)")
    }
}

/// How the attempt asks the host to treat the connection.
#[derive(Debug, Clone, Default)]
pub enum PoolMode {
    /// Host default agent, `connection: keep-alive`.
    #[default]
    Default,
    /// A shared agent handle, `connection: keep-alive`.
    Shared(Pool),
    /// No reuse, `connection: close`.
    Disabled,
}

impl PoolMode {
    pub fn connection_header(&self) -> &'static str {
        match self {
            PoolMode::Disabled => "close",
            PoolMode::Default | PoolMode::Shared(_) => "keep-alive",
        }
    }

    pub fn pool(&self) -> Option<&Pool> {
        match self {
            PoolMode::Shared(pool) => Some(pool),
            _ => None,
        }
    }
}

/// Headers stripped from a request when it follows a redirect.
pub const DEFAULT_REDIRECT_STRIP: [&str; 2] = ["host", "expect"];

/// Canonical description of one logical request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Target as given by the caller; a missing scheme means `http://`.
    pub url: String,
    pub headers: Headers,
    pub query: Vec<(String, String)>,
    pub body: Option<Body>,
    /// Encode the body as JSON (non-GET/HEAD) and decode the response as JSON.
    pub json: bool,
    pub form: Option<Vec<(String, String)>>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub max_redirects: Option<u32>,
    pub follow_redirects: bool,
    pub redirect_strip_headers: Vec<String>,
    pub pool: PoolMode,
    pub allowed_status_codes: BTreeSet<u16>,
    pub validate_status: bool,
    /// Append a `t=<unix millis>` query parameter; `None` defers to config.
    pub bust: Option<bool>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            url: String::new(),
            headers: Headers::new(),
            query: Vec::new(),
            body: None,
            json: false,
            form: None,
            timeout: None,
            retries: None,
            max_redirects: None,
            follow_redirects: true,
            redirect_strip_headers: DEFAULT_REDIRECT_STRIP.iter().map(|h| h.to_string()).collect(),
            pool: PoolMode::Default,
            allowed_status_codes: BTreeSet::new(),
            validate_status: true,
            bust: None,
        }
    }
}

impl RequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Turn on JSON mode without a body (decode the response only).
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Turn on JSON mode and send `value` as the body.
    pub fn json_body(mut self, value: serde_json::Value) -> Self {
        self.json = true;
        self.body = Some(Body::Json(value));
        self
    }

    pub fn form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.form = Some(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Replace the headers dropped when following a redirect.
    pub fn strip_on_redirect<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.redirect_strip_headers = names.into_iter().map(|n| n.into().to_ascii_lowercase()).collect();
        self
    }

    pub fn pool(mut self, pool: PoolMode) -> Self {
        self.pool = pool;
        self
    }

    pub fn allow_status(mut self, status: u16) -> Self {
        self.allowed_status_codes.insert(status);
        self
    }

    /// Accept any status code; used when proxying raw responses.
    pub fn skip_status_validation(mut self) -> Self {
        self.validate_status = false;
        self
    }

    pub fn bust(mut self, bust: bool) -> Self {
        self.bust = Some(bust);
        self
    }
}
