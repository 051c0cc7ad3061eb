//! Request body encoding and response body decoding.
//!
//! A JSON body that fails to parse is a request failure: `decode` returns
//! `CurlyError::Decode` even though the transport finished cleanly.

use crate::error::{CurlyError, Result};
use crate::http::{Headers, Method};
use crate::options::Body;

pub const JSON: &str = "application/json";
pub const FORM: &str = "application/x-www-form-urlencoded";

/// Decoded response body handed to the completion callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// UTF-8 text; invalid sequences are replaced.
    Text(String),
    Json(serde_json::Value),
    /// The body went to a stream consumer and was not buffered.
    Streamed,
}

impl Decoded {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Decoded::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Decoded::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Percent-encode `pairs` as `k=v&k2=v2`.
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Encode the upfront body and set the matching headers.
///
/// Returns the bytes to send, or `None` when the request has no upfront
/// body (the caller may still stream one through `write`).
pub fn encode(
    method: Method,
    headers: &mut Headers,
    body: Option<&Body>,
    json: bool,
    form: Option<&[(String, String)]>,
) -> Result<Option<Vec<u8>>> {
    let mut bytes = match body {
        Some(Body::Raw(raw)) => Some(raw.clone()),
        Some(Body::Json(value)) => Some(to_json(value)?),
        None => None,
    };

    if let Some(pairs) = form {
        headers.set("content-type", FORM);
        bytes = Some(encode_pairs(pairs).into_bytes());
    }

    if json {
        if !method.is_bodyless() && form.is_none() {
            headers.set("content-type", JSON);
        }
        headers.set_default("accept", JSON);
    }

    if let Some(bytes) = &bytes {
        headers.set("content-length", bytes.len().to_string());
    }
    Ok(bytes)
}

fn to_json(value: &serde_json::Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CurlyError::Encode(e.to_string()))
}

/// Decode a buffered response body.
pub fn decode(bytes: &[u8], json: bool) -> Result<Decoded> {
    if json {
        return serde_json::from_slice(bytes)
            .map(Decoded::Json)
            .map_err(|e| CurlyError::Decode(e.to_string()));
    }
    Ok(Decoded::Text(String::from_utf8_lossy(bytes).into_owned()))
}
