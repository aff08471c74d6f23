// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request validation for the daemon API.
//!
//! Bodies arrive as raw JSON and are parsed here so that malformed shapes
//! and unknown fields come back as structured 400s instead of the
//! framework's default rejection.

use crate::ApiError;
use serde::de::DeserializeOwned;

/// Maximum accepted payload size in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 1_000_000;

/// Maximum accepted JSON nesting depth for payloads.
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Parse a request body into `T`, rejecting unknown fields with a 400.
pub fn parse_body<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::invalid_request(format!("invalid request body: {e}")))
}

/// Validate a payload value against size and depth guards.
pub fn check_payload(payload: &serde_json::Value) -> Result<(), ApiError> {
    let rendered = payload.to_string();
    if rendered.len() > MAX_PAYLOAD_BYTES {
        return Err(ApiError::invalid_request(format!(
            "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
        )));
    }
    if depth_of(payload) > MAX_PAYLOAD_DEPTH {
        return Err(ApiError::invalid_request(format!(
            "payload exceeds nesting depth {MAX_PAYLOAD_DEPTH}"
        )));
    }
    Ok(())
}

fn depth_of(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => {
            1 + items.iter().map(depth_of).max().unwrap_or(0)
        }
        serde_json::Value::Object(map) => {
            1 + map.values().map(depth_of).max().unwrap_or(0)
        }
        _ => 0,
    }
}
