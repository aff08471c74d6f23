// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dead-letter records and reason codes.

use crate::Envelope;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an envelope was rejected or failed delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The visited set reached the hop ceiling.
    HopLimit,
    /// The envelope's deadline passed before acceptance.
    TtlExpired,
    /// The envelope would revisit a subject already on its path.
    CycleDetected,
    /// A budget dimension other than hops/TTL was exhausted.
    BudgetExhausted,
    /// The destination subject failed validation downstream of the edge.
    UnknownSubject,
    /// A binding or adapter referenced an endpoint that no longer exists.
    EndpointNotFound,
    /// Subscribers existed but every delivery attempt failed.
    PublishFailed,
}

impl DeadLetterReason {
    /// Stable wire string for this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HopLimit => "hop_limit",
            Self::TtlExpired => "ttl_expired",
            Self::CycleDetected => "cycle_detected",
            Self::BudgetExhausted => "budget_exhausted",
            Self::UnknownSubject => "unknown_subject",
            Self::EndpointNotFound => "endpoint_not_found",
            Self::PublishFailed => "publish_failed",
        }
    }

    /// Parse the wire string back into a reason.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hop_limit" => Some(Self::HopLimit),
            "ttl_expired" => Some(Self::TtlExpired),
            "cycle_detected" => Some(Self::CycleDetected),
            "budget_exhausted" => Some(Self::BudgetExhausted),
            "unknown_subject" => Some(Self::UnknownSubject),
            "endpoint_not_found" => Some(Self::EndpointNotFound),
            "publish_failed" => Some(Self::PublishFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted record of a rejected or undeliverable envelope.
///
/// Exactly one record exists per dead-lettered envelope. `endpoint_hash` is
/// the target subscriber's hash where one was selected; budget rejections
/// that happen before subscriber resolution record the hash of the publish
/// subject instead.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeadLetter {
    /// Hash of the endpoint (or publish subject) the envelope was bound for.
    pub endpoint_hash: u64,
    /// Id of the dead-lettered envelope.
    pub message_id: Uuid,
    /// Why it was dead-lettered.
    pub reason: DeadLetterReason,
    /// Full envelope snapshot at the time of failure.
    pub envelope: Envelope,
    /// Instant the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_REASONS: &[DeadLetterReason] = &[
        DeadLetterReason::HopLimit,
        DeadLetterReason::TtlExpired,
        DeadLetterReason::CycleDetected,
        DeadLetterReason::BudgetExhausted,
        DeadLetterReason::UnknownSubject,
        DeadLetterReason::EndpointNotFound,
        DeadLetterReason::PublishFailed,
    ];

    #[test]
    fn reason_as_str_parse_roundtrip() {
        for reason in ALL_REASONS {
            assert_eq!(DeadLetterReason::parse(reason.as_str()), Some(*reason));
        }
        assert_eq!(DeadLetterReason::parse("nope"), None);
    }

    #[test]
    fn reason_serde_matches_as_str() {
        for reason in ALL_REASONS {
            let json = serde_json::to_string(reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn reason_count_is_stable() {
        assert_eq!(ALL_REASONS.len(), 7);
    }
}
