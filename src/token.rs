//! Client-side token inspection.
//!
//! Decodes the payload segment of a JWT-shaped bearer token and reads its
//! `exp` claim. Signatures are NOT verified here: any well-formed
//! three-segment token is accepted as structurally valid, and the server
//! remains the only authority on whether a token is genuine.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Result of inspecting a token locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inspection {
    /// Not three segments, or the payload is not base64-encoded JSON.
    Invalid,
    /// Structurally valid. `expired` is false when `exp` is absent.
    Valid { expired: bool },
}

impl Inspection {
    /// True when the token may be presented to the server.
    pub fn is_usable(&self) -> bool {
        matches!(self, Inspection::Valid { expired: false })
    }
}

/// Errors that can occur while decoding a token payload.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("expected 3 segments, found {0}")]
    SegmentCount(usize),
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Decode the payload (second segment) of a token into its claims map.
pub fn decode_payload(token: &str) -> Result<Map<String, Value>, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::SegmentCount(segments.len()));
    }

    // Accept both the url-safe alphabet and padded standard base64.
    let normalized: String = segments[1]
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let bytes = URL_SAFE_NO_PAD.decode(normalized)?;

    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(claims) => Ok(claims),
        _ => Err(TokenError::NotAnObject),
    }
}

/// Read the `exp` claim (epoch seconds) if present and numeric.
pub fn expiry(claims: &Map<String, Value>) -> Option<f64> {
    claims.get("exp").and_then(Value::as_f64)
}

/// Inspect a token against the current wall clock.
pub fn inspect(token: &str) -> Inspection {
    inspect_at(token, now_millis())
}

/// Inspect a token against a fixed time, in epoch milliseconds.
pub fn inspect_at(token: &str, now_ms: u64) -> Inspection {
    match decode_payload(token) {
        Ok(claims) => {
            let expired = expiry(&claims).is_some_and(|exp| exp * 1000.0 < now_ms as f64);
            Inspection::Valid { expired }
        }
        Err(e) => {
            tracing::debug!(error = %e, "Token failed local inspection");
            Inspection::Invalid
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
