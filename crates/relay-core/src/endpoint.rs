// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted subject registrations.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A registration binding a subject to a logical receiver.
///
/// Endpoints survive restarts; the registered subject is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Endpoint {
    /// Registered subject (may contain wildcards for pattern subscribers).
    pub subject: String,

    /// Stable 64-bit hash of the subject, used for budget visited-set
    /// membership without leaking subject tokens.
    pub subject_hash: u64,

    /// Instant the endpoint was first registered.
    pub registered_at: DateTime<Utc>,

    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Instant of the most recent delivery to this endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,

    /// Number of envelopes delivered to this endpoint.
    pub message_count: u64,
}

impl Endpoint {
    /// Create a fresh registration for `subject`.
    pub fn new(subject: impl Into<String>, now: DateTime<Utc>) -> Self {
        let subject = subject.into();
        let subject_hash = relay_subject::subject_hash(&subject);
        Self {
            subject,
            subject_hash,
            registered_at: now,
            description: None,
            last_activity: None,
            message_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_endpoint_hashes_subject() {
        let ep = Endpoint::new("relay.agent.a", Utc::now());
        assert_eq!(ep.subject_hash, relay_subject::subject_hash("relay.agent.a"));
        assert_eq!(ep.message_count, 0);
        assert!(ep.last_activity.is_none());
    }

    #[test]
    fn endpoint_serde_roundtrip() {
        let ep = Endpoint::new("relay.agent.>", Utc::now());
        let json = serde_json::to_string(&ep).unwrap();
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
    }
}
