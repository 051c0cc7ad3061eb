//! Client-wide defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CurlyError, Result};
use crate::http::Headers;

/// Defaults applied to every request a `Curly` client dispatches, unless the
/// call sets the field itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Request deadline in milliseconds; `None` waits forever.
    pub timeout_ms: Option<u64>,

    /// Retry budget for connection-level failures.
    pub retries: u32,

    /// Fixed delay between retries.
    pub retry_delay_ms: u64,

    /// Redirect budget.
    pub max_redirects: u32,

    /// Append a cache-busting `t=<unix millis>` query parameter.
    pub bust: bool,

    /// Headers added when the request does not set them.
    pub headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::server()
    }
}

impl ClientConfig {
    /// Server-side defaults: no deadline, no cache busting.
    pub fn server() -> Self {
        Self {
            timeout_ms: None,
            retries: 0,
            retry_delay_ms: 5_000,
            max_redirects: 20,
            bust: false,
            headers: Vec::new(),
        }
    }

    /// In-browser defaults: 3 minute deadline, cache busting on.
    pub fn browser() -> Self {
        Self {
            timeout_ms: Some(3 * 60 * 1000),
            bust: true,
            ..Self::server()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CurlyError::Decode(e.to_string()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn default_headers(&self) -> Headers {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.clone())).collect()
    }
}
