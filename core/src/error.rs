//! Error types for the request lifecycle.
//!
//! # Design
//! `TransportError` is what the host primitive reports; it is the only kind
//! of failure the retry policy looks at. Everything the caller can observe
//! lands in `CurlyError`, which is `Clone` so the same value can be emitted
//! as a stream `Error` event and handed to the completion callback.

use std::time::Duration;

use thiserror::Error;

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, CurlyError>;

/// Coarse classification of a connection-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The socket could not be connected.
    Connect,
    /// The host name did not resolve.
    Dns,
    /// The peer reset an established connection.
    Reset,
    /// Read or write failure on an open connection.
    Io,
    Other,
}

/// A failure reported by the host transport primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The connection ended without ever producing a response.
    pub fn no_response() -> Self {
        Self::new(TransportErrorKind::Io, "network error")
    }
}

/// Errors delivered to the caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurlyError {
    /// Connection-level failure (reset, DNS, refused, no response).
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// The request did not finish before its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection closed before the response ended.
    #[error("premature close")]
    PrematureClose,

    /// The redirect budget ran out.
    #[error("too many redirects (max {max})")]
    TooManyRedirects { max: u32 },

    /// The final response carried a status outside the accepted set.
    #[error("unexpected status code {status}")]
    InvalidStatus { status: u16 },

    /// The response body did not match the declared codec.
    #[error("failed to decode response body: {0}")]
    Decode(String),

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// `destroy()` was called before any other outcome.
    #[error("aborted")]
    Aborted,

    /// `write`/`end` after the body was finalized.
    #[error("request is no longer writable")]
    NotWritable,

    /// Headers can only change until the transport is opened.
    #[error("headers already sent")]
    HeadersAlreadySent,

    /// The pipe destination rejected a chunk.
    #[error("pipe destination failed: {0}")]
    Pipe(String),
}

impl CurlyError {
    /// Only connection-level failures are eligible for retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CurlyError::Network(_))
    }

    /// The offending status code, for `InvalidStatus`.
    pub fn status(&self) -> Option<u16> {
        match self {
            CurlyError::InvalidStatus { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CurlyError {
    fn from(e: std::io::Error) -> Self {
        CurlyError::Pipe(e.to_string())
    }
}

impl From<url::ParseError> for CurlyError {
    fn from(e: url::ParseError) -> Self {
        CurlyError::InvalidUrl(e.to_string())
    }
}
