// SPDX-License-Identifier: MIT OR Apache-2.0
//! Read-side conversations projection.
//!
//! Reshapes the raw envelope log into a human-friendly exchange list:
//! requests (`relay.agent.*`, `relay.system.*`) joined with their response
//! chunks (`relay.human.console.*`), labelled via a pluggable subject
//! resolver, and augmented with dead-letter failure reasons. Pure function
//! on a snapshot of the log; mutates nothing.

use chrono::{DateTime, Utc};
use relay_core::{DeadLetter, DeadLetterReason, Envelope, MessageStatus};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Subject patterns that open a conversation.
const REQUEST_PATTERNS: &[&str] = &["relay.agent.*", "relay.system.*"];

/// Subject pattern of response chunks.
const RESPONSE_PATTERN: &str = "relay.human.console.*";

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves a subject to a display label.
///
/// Implemented outside the kernel by manifest and session readers; the
/// default falls back to the subject's last token.
pub trait SubjectResolver: Send + Sync {
    /// A human-readable label for `subject`, if one is known.
    fn label(&self, subject: &str) -> Option<String>;
}

/// Resolver that knows nothing; every subject falls back to its last token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

impl SubjectResolver for NullResolver {
    fn label(&self, _subject: &str) -> Option<String> {
        None
    }
}

fn fallback_label(subject: &str) -> String {
    subject.rsplit('.').next().unwrap_or(subject).to_string()
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One envelope inside a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationMessage {
    /// Envelope id.
    pub id: Uuid,
    /// Envelope subject.
    pub subject: String,
    /// Envelope payload.
    pub payload: serde_json::Value,
    /// Publish instant.
    pub created_at: DateTime<Utc>,
}

impl From<&Envelope> for ConversationMessage {
    fn from(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id,
            subject: envelope.subject.clone(),
            payload: envelope.payload.clone(),
            created_at: envelope.created_at,
        }
    }
}

/// One request/response exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    /// Trace id shared by the exchange.
    pub trace_id: Uuid,
    /// Subject of the opening request.
    pub subject: String,
    /// Display label for the request subject.
    pub label: String,
    /// Origin of the request.
    pub from: String,
    /// When the request was published.
    pub started_at: DateTime<Utc>,
    /// Status of the request envelope.
    pub status: MessageStatus,
    /// The opening request.
    pub request: ConversationMessage,
    /// Response chunks, oldest first.
    pub responses: Vec<ConversationMessage>,
    /// Dead-letter reason, if anything in the exchange failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<DeadLetterReason>,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Project the envelope log into conversations, newest first.
pub fn project(
    messages: &[Envelope],
    dead_letters: &[DeadLetter],
    resolver: &dyn SubjectResolver,
) -> Vec<Conversation> {
    let mut failures: HashMap<Uuid, DeadLetterReason> = HashMap::new();
    for dl in dead_letters {
        failures.insert(dl.envelope.trace_id, dl.reason);
    }

    let mut responses_by_trace: HashMap<Uuid, Vec<&Envelope>> = HashMap::new();
    for envelope in messages {
        if relay_subject::matches(RESPONSE_PATTERN, &envelope.subject) {
            responses_by_trace
                .entry(envelope.trace_id)
                .or_default()
                .push(envelope);
        }
    }

    let mut conversations: Vec<Conversation> = messages
        .iter()
        .filter(|e| {
            REQUEST_PATTERNS
                .iter()
                .any(|p| relay_subject::matches(p, &e.subject))
        })
        .map(|request| {
            let mut responses: Vec<ConversationMessage> = responses_by_trace
                .get(&request.trace_id)
                .map(|rs| rs.iter().map(|r| ConversationMessage::from(*r)).collect())
                .unwrap_or_default();
            responses.sort_by_key(|r| (r.created_at, r.id));

            let label = resolver
                .label(&request.subject)
                .unwrap_or_else(|| fallback_label(&request.subject));

            Conversation {
                trace_id: request.trace_id,
                subject: request.subject.clone(),
                label,
                from: request.from.clone(),
                started_at: request.created_at,
                status: request.status,
                request: ConversationMessage::from(request),
                responses,
                failure_reason: failures.get(&request.trace_id).copied(),
            }
        })
        .collect();

    conversations.sort_by(|a, b| (b.started_at, b.trace_id).cmp(&(a.started_at, a.trace_id)));
    conversations
}
