// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace spans and aggregate delivery metrics.
//!
//! A *span* records one event in an envelope's journey; the ordered set of
//! spans sharing a `trace_id` forms the trace. Spans are immutable appends,
//! pruned only by age.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of event a span records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpanEvent {
    /// A publish entered the engine.
    Publish,
    /// The envelope passed budget checks and was persisted.
    Accept,
    /// One subscriber accepted the envelope.
    Deliver,
    /// The budget evaluator rejected the envelope pre-persist.
    Reject,
    /// A dead-letter record was written.
    DeadLetter,
}

impl SpanEvent {
    /// Stable wire string for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Accept => "accept",
            Self::Deliver => "deliver",
            Self::Reject => "reject",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Parse the wire string back into an event type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "publish" => Some(Self::Publish),
            "accept" => Some(Self::Accept),
            "deliver" => Some(Self::Deliver),
            "reject" => Some(Self::Reject),
            "dead_letter" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpanEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event in an envelope's delivery journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Span {
    /// Trace this span belongs to.
    pub trace_id: Uuid,
    /// Envelope this span describes.
    pub message_id: Uuid,
    /// Parent envelope for derived (re-published) envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
    /// Destination subject of the envelope.
    pub subject: String,
    /// Origin subject of the envelope.
    pub from: String,
    /// Subscriber subject for `deliver` spans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_subject: Option<String>,
    /// What happened.
    pub event: SpanEvent,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Handler duration for `deliver` spans, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error detail for `reject` / failed `deliver` spans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Span {
    /// Convenience constructor with the optional fields empty.
    pub fn event(
        trace_id: Uuid,
        message_id: Uuid,
        subject: impl Into<String>,
        from: impl Into<String>,
        event: SpanEvent,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id,
            message_id,
            parent_message_id: None,
            subject: subject.into(),
            from: from.into(),
            to_subject: None,
            event,
            timestamp,
            duration_ms: None,
            error: None,
        }
    }
}

/// Aggregate delivery metrics computed over the trace store.
///
/// Latency is `last(deliver.timestamp) - accept.timestamp` per envelope;
/// undelivered envelopes contribute to the counts but not to latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct TraceMetrics {
    /// Total envelopes that produced an `accept` or `reject` span.
    pub total_messages: u64,
    /// Envelopes with at least one `deliver` span.
    pub delivered_count: u64,
    /// Envelopes finalized as failed.
    pub failed_count: u64,
    /// Dead-letter counts keyed by reason string.
    pub dead_letter_by_reason: BTreeMap<String, u64>,
    /// Mean accept→last-deliver latency in milliseconds.
    pub avg_delivery_latency_ms: f64,
    /// 95th-percentile accept→last-deliver latency in milliseconds.
    pub p95_delivery_latency_ms: f64,
}
