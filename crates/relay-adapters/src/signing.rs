// SPDX-License-Identifier: MIT OR Apache-2.0
//! HMAC-SHA256 signing for webhook payloads.
//!
//! Signatures travel as lowercase hex, optionally prefixed `sha256=`.
//! Verification is constant-time via the `hmac` crate.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header webhook callers put the signature in.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Compute the hex HMAC-SHA256 signature of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature (with or without a `sha256=` prefix) over `body`.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
