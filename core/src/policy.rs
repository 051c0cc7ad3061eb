//! Redirect, retry and status-code policy.
//!
//! Each policy is a small stateful value owned by one `Request`. They make
//! decisions only; opening attempts and scheduling timers stays with the
//! controller.

use std::collections::BTreeSet;
use std::time::Duration;

use url::Url;

use crate::error::{CurlyError, Result};
use crate::http::{Headers, Method, ResponseHead};

/// One concrete request the controller can (re)send: the template for an
/// attempt. Redirects produce a new hop, retries resend the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    /// Upfront body, replayable. Streamed bodies are never stored here.
    pub body: Option<Vec<u8>>,
}

/// A 3xx carrying a location; 304 is a cache answer, not a redirect.
pub fn is_redirect(head: &ResponseHead) -> bool {
    (300..400).contains(&head.status) && head.status != 304 && head.location().is_some()
}

#[derive(Debug, PartialEq)]
pub enum RedirectDecision {
    /// Not a redirect, or following is off: hand the response to the caller.
    Deliver,
    Follow(Hop),
}

#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    follow: bool,
    max: u32,
    remaining: u32,
    strip: Vec<String>,
    streamed: bool,
}

impl RedirectPolicy {
    pub fn new(follow: bool, max: u32, strip: Vec<String>) -> Self {
        Self {
            follow,
            max,
            remaining: max,
            strip,
            streamed: false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// The body went out in chunks and was not kept, so a 307/308 cannot
    /// replay it. Such responses are delivered instead of followed.
    pub fn body_streamed(&mut self) {
        self.streamed = true;
    }

    /// Decide what to do with a response to `current`.
    ///
    /// Following consumes one unit of budget. With the budget spent, a
    /// redirect is `TooManyRedirects`.
    pub fn evaluate(&mut self, current: &Hop, head: &ResponseHead) -> Result<RedirectDecision> {
        if !self.follow || !is_redirect(head) {
            return Ok(RedirectDecision::Deliver);
        }
        if self.streamed && matches!(head.status, 307 | 308) {
            return Ok(RedirectDecision::Deliver);
        }
        if self.remaining == 0 {
            return Err(CurlyError::TooManyRedirects { max: self.max });
        }
        let location = head.location().unwrap_or_default();
        let url = current.url.join(location)?;
        self.remaining -= 1;

        let mut headers = current.headers.clone();
        for name in &self.strip {
            headers.remove(name);
        }

        let (method, body) = match head.status {
            307 | 308 => (current.method, current.body.clone()),
            _ => {
                headers.remove("content-type");
                headers.remove("content-length");
                let method = if current.method == Method::Head {
                    Method::Head
                } else {
                    Method::Get
                };
                (method, None)
            }
        };

        Ok(RedirectDecision::Follow(Hop {
            method,
            url,
            headers,
            body,
        }))
    }
}

/// Fixed-delay retry budget for connection-level failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    remaining: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self {
            remaining: retries,
            delay,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Consume one retry for `err` if allowed, returning the backoff.
    ///
    /// `replayable` is false once the caller streams a body or destroys the
    /// request; nothing is retried then.
    pub fn next_delay(&mut self, err: &CurlyError, replayable: bool) -> Option<Duration> {
        if !replayable || !err.is_retryable() || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }

    pub fn disable(&mut self) {
        self.remaining = 0;
    }
}

/// Accepts 2xx plus any explicitly allowed codes, unless validation is off.
#[derive(Debug, Clone)]
pub struct StatusPolicy {
    validate: bool,
    allowed: BTreeSet<u16>,
}

impl StatusPolicy {
    pub fn new(validate: bool, allowed: BTreeSet<u16>) -> Self {
        Self { validate, allowed }
    }

    pub fn check(&self, status: u16) -> Result<()> {
        if !self.validate || self.allowed.contains(&status) || (200..300).contains(&status) {
            return Ok(());
        }
        Err(CurlyError::InvalidStatus { status })
    }
}
