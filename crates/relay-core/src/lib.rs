// SPDX-License-Identifier: MIT OR Apache-2.0
//! relay-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the Relay bus: envelopes, budgets, endpoints,
//! dead letters, trace spans, adapter records, and bindings.
//!
//! If you only take one dependency, take this one.

/// Adapter manifests, config records, and live status types.
pub mod adapter;
/// Adapter-to-agent binding records.
pub mod binding;
/// Per-envelope delivery budget: hop caps, TTL, and the visited set.
pub mod budget;
/// Dead-letter records and reason codes.
pub mod dead_letter;
/// Persisted subject registrations.
pub mod endpoint;
/// Trace spans and aggregate delivery metrics.
pub mod span;
/// Envelope status state machine.
pub mod status;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use budget::{Budget, BudgetOverrides};
pub use dead_letter::{DeadLetter, DeadLetterReason};
pub use endpoint::Endpoint;
pub use span::{Span, SpanEvent, TraceMetrics};
pub use status::MessageStatus;

/// Current contract version string reported by the daemon.
pub const CONTRACT_VERSION: &str = "relay/v0.1";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The unit of transport: a subject, a payload, and delivery metadata.
///
/// Envelopes are immutable once they reach a terminal [`MessageStatus`]; the
/// only mutation the log permits is the single `new → terminal` transition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    /// Unique, time-ordered identifier (UUIDv7) assigned at publish.
    pub id: Uuid,

    /// Destination subject (dot-separated, 1–8 tokens).
    pub subject: String,

    /// Origin subject (same grammar as `subject`).
    pub from: String,

    /// Subject for responses, if the producer expects any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Arbitrary JSON payload. An empty object is legal.
    pub payload: serde_json::Value,

    /// Delivery budget carried with the envelope.
    pub budget: Budget,

    /// Current lifecycle status.
    pub status: MessageStatus,

    /// Instant the envelope was created at publish.
    pub created_at: DateTime<Utc>,

    /// Trace correlation id: equals `id` for top-level publishes, inherited
    /// by derived envelopes.
    pub trace_id: Uuid,
}

impl Envelope {
    /// Allocate a fresh envelope in the `new` state.
    ///
    /// `parent_trace_id` is `Some` for envelopes derived from a subscriber
    /// re-publish; top-level publishes use their own id as the trace id.
    pub fn assign(
        subject: impl Into<String>,
        from: impl Into<String>,
        reply_to: Option<String>,
        payload: serde_json::Value,
        budget: Budget,
        parent_trace_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            subject: subject.into(),
            from: from.into(),
            reply_to,
            payload,
            budget,
            status: MessageStatus::New,
            created_at: now,
            trace_id: parent_trace_id.unwrap_or(id),
        }
    }
}

// ---------------------------------------------------------------------------
// Publish receipt
// ---------------------------------------------------------------------------

/// What a publisher gets back: the durable message id, the trace id, and the
/// exact number of subscribers that accepted the envelope.
///
/// A budget-rejected publish is not an error at this level; it returns a
/// receipt with `delivered_to == 0` alongside a dead-letter record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PublishReceipt {
    /// Durably logged envelope id.
    pub message_id: Uuid,
    /// Trace correlation id.
    pub trace_id: Uuid,
    /// Number of subscribers that accepted the delivery.
    pub delivered_to: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_envelope_starts_new() {
        let now = Utc::now();
        let env = Envelope::assign(
            "relay.agent.a",
            "relay.human.console",
            None,
            serde_json::json!({"x": 1}),
            Budget::normalize(&BudgetOverrides::default(), now),
            None,
            now,
        );
        assert_eq!(env.status, MessageStatus::New);
        assert_eq!(env.trace_id, env.id);
        assert_eq!(env.created_at, now);
    }

    #[test]
    fn derived_envelope_inherits_trace() {
        let now = Utc::now();
        let parent = Uuid::now_v7();
        let env = Envelope::assign(
            "relay.chain.2",
            "relay.chain.1",
            None,
            serde_json::Value::Null,
            Budget::normalize(&BudgetOverrides::default(), now),
            Some(parent),
            now,
        );
        assert_eq!(env.trace_id, parent);
        assert_ne!(env.trace_id, env.id);
    }

    #[test]
    fn envelope_ids_are_time_ordered() {
        let now = Utc::now();
        let budget = Budget::normalize(&BudgetOverrides::default(), now);
        let a = Envelope::assign("a", "b", None, serde_json::Value::Null, budget.clone(), None, now);
        // UUIDv7 embeds a millisecond timestamp in its most significant
        // bits; a later millisecond always sorts after an earlier one.
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Envelope::assign("a", "b", None, serde_json::Value::Null, budget, None, now);
        assert!(a.id < b.id);
    }

    #[test]
    fn envelope_serde_roundtrip() {
        let now = Utc::now();
        let env = Envelope::assign(
            "relay.agent.a",
            "relay.human.console",
            Some("relay.human.console.reply".into()),
            serde_json::json!({"k": [1, 2, 3]}),
            Budget::normalize(&BudgetOverrides::default(), now),
            None,
            now,
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, env.id);
        assert_eq!(back.subject, env.subject);
        assert_eq!(back.reply_to, env.reply_to);
        assert_eq!(back.status, MessageStatus::New);
    }

    #[test]
    fn reply_to_omitted_when_absent() {
        let now = Utc::now();
        let env = Envelope::assign(
            "relay.agent.a",
            "relay.human.console",
            None,
            serde_json::Value::Null,
            Budget::normalize(&BudgetOverrides::default(), now),
            None,
            now,
        );
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("reply_to").is_none());
    }
}
