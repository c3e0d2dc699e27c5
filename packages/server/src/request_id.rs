//! Request ID generation and extraction for call correlation
//!
//! Every call carries an id: HTTP requests honor an incoming `x-request-id`
//! header and echo it back, WebSocket clients use it as the `id` of their
//! `call` frame.

use http::HeaderMap;
use uuid::Uuid;

/// Standard header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a new UUID v4 request ID
#[inline]
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Extract a valid request ID from headers or generate a new one
///
/// Header lookup through `HeaderMap` is case-insensitive.
pub fn get_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| is_valid(id))
        .map(str::to_string)
        .unwrap_or_else(generate)
}

/// Validate that a request ID looks reasonable
/// (not empty, not too long, alphanumeric + hyphens)
pub fn is_valid(id: &str) -> bool {
    if id.is_empty() || id.len() > 128 {
        return false;
    }

    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
