// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Relay delivery engine.
//!
//! Single entry point: [`RelayEngine::publish`]. A publish validates its
//! subjects, normalizes the budget, runs the pre-persist budget checks,
//! resolves subscribers from the endpoint registry, persists the envelope,
//! fans out through the subscription bus, and finalizes the envelope status.
//! Domain-level problems (budget rejections, zero subscribers) never throw
//! across the publish boundary; they become dead-letter records and
//! receipts with `delivered_to == 0`.
#![deny(unsafe_code)]

/// Pre-persist budget evaluation.
pub mod budget;
/// Cancellation primitive for in-flight publishes.
pub mod cancel;

pub use cancel::CancellationToken;

use chrono::Utc;
use relay_bus::{DeliveryResult, Signal, SubscriptionBus};
use relay_core::{
    Budget, BudgetOverrides, DeadLetter, DeadLetterReason, Envelope, MessageStatus,
    PublishReceipt, Span, SpanEvent,
};
use relay_store::{
    DeadLetterStore, EndpointRegistry, MessageStore, Store, StoreError, TraceStore,
};
use relay_subject::subject_hash;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a publish can raise across the API boundary.
///
/// Budget rejections are *not* here: they return a normal receipt with
/// `delivered_to == 0` plus a dead-letter record.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// A subject failed grammar validation.
    #[error("invalid subject: {0}")]
    InvalidSubject(#[from] relay_subject::SubjectError),

    /// The caller cancelled before the envelope was persisted.
    #[error("publish cancelled before persistence")]
    Cancelled,

    /// The durable store failed; the envelope was not committed.
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Link from a derived publish back to the envelope whose handler issued it.
#[derive(Debug, Clone, Copy)]
pub struct Parent {
    /// Trace the derived envelope joins.
    pub trace_id: Uuid,
    /// Envelope whose subscriber re-published.
    pub message_id: Uuid,
}

/// One publish call.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Destination subject.
    pub subject: String,
    /// Origin subject.
    pub from: String,
    /// Optional response subject.
    pub reply_to: Option<String>,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Partial budget; defaults and clamps are applied by the engine.
    pub budget: BudgetOverrides,
    /// Set for subscriber re-publishes.
    pub parent: Option<Parent>,
}

impl PublishRequest {
    /// A plain top-level publish with a default budget.
    pub fn new(
        subject: impl Into<String>,
        from: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            subject: subject.into(),
            from: from.into(),
            reply_to: None,
            payload,
            budget: BudgetOverrides::default(),
            parent: None,
        }
    }

    /// A re-publish derived from `parent` inside a subscriber handler.
    ///
    /// Inherits the trace id and the parent's budget, visited set included;
    /// the re-publisher's own subject hash joins the set when the derived
    /// envelope is accepted.
    pub fn derived(
        parent: &Envelope,
        subject: impl Into<String>,
        from: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            subject: subject.into(),
            from: from.into(),
            reply_to: None,
            payload,
            budget: BudgetOverrides::inherited(&parent.budget),
            parent: Some(Parent {
                trace_id: parent.trace_id,
                message_id: parent.id,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel metrics
// ---------------------------------------------------------------------------

/// Kernel-level counters exposed at `/metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelMetrics {
    /// Envelopes accepted and persisted.
    pub published: u64,
    /// Envelopes finalized as delivered.
    pub delivered: u64,
    /// Envelopes finalized as failed.
    pub failed: u64,
    /// Envelopes dead-lettered (budget rejections and publish failures).
    pub dead_lettered: u64,
    /// Fan-outs performed by the subscription bus.
    pub fanouts: u64,
    /// Deliveries dropped to backpressure.
    pub backpressure_drops: u64,
    /// Live subscriptions on the bus.
    pub active_subscriptions: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineInner {
    messages: MessageStore,
    endpoints: EndpointRegistry,
    dead_letters: DeadLetterStore,
    traces: TraceStore,
    bus: SubscriptionBus,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

/// The delivery engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RelayEngine {
    inner: Arc<EngineInner>,
}

impl RelayEngine {
    /// Build an engine over an opened store and a subscription bus.
    pub fn new(store: &Store, bus: SubscriptionBus) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                messages: store.messages(),
                endpoints: store.endpoints(),
                dead_letters: store.dead_letters(),
                traces: store.traces(),
                bus,
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                dead_lettered: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an envelope. See the crate docs for the pipeline.
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, PublishError> {
        self.publish_with(request, None).await
    }

    /// Publish with an optional cancellation token, honored only before the
    /// envelope is persisted.
    pub async fn publish_with(
        &self,
        request: PublishRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<PublishReceipt, PublishError> {
        // Step 1: validate all subjects.
        relay_subject::validate_subject(&request.subject)?;
        relay_subject::validate_subject(&request.from)?;
        if let Some(reply_to) = &request.reply_to {
            relay_subject::validate_subject(reply_to)?;
        }

        // Steps 2–3: normalize budget, assign the envelope.
        let now = Utc::now();
        let normalized = Budget::normalize(&request.budget, now);
        let mut envelope = Envelope::assign(
            request.subject.clone(),
            request.from.clone(),
            request.reply_to.clone(),
            request.payload.clone(),
            normalized,
            request.parent.map(|p| p.trace_id),
            now,
        );

        // Step 4: pre-persist budget checks.
        if let Some(reason) =
            budget::evaluate(&envelope.budget, &envelope.from, &envelope.subject, now)
        {
            return Ok(self.reject(envelope, reason, request.parent)?);
        }

        // Step 5: resolve subscribers. Registrations that land after this
        // snapshot are not part of the current delivery.
        let endpoints = self.inner.endpoints.find_matching(&envelope.subject)?;

        // Cancellation boundary: after this point the publish is committed.
        if let Some(token) = &cancel
            && token.is_cancelled()
        {
            return Err(PublishError::Cancelled);
        }

        // Step 6: persist. The publisher's hash joins the visited set here,
        // which is what the accepted envelope carries into fan-out.
        envelope.budget.visit(subject_hash(&envelope.from));
        self.inner.messages.append(&envelope)?;
        let mut accept = Span::event(
            envelope.trace_id,
            envelope.id,
            &envelope.subject,
            &envelope.from,
            SpanEvent::Accept,
            Utc::now(),
        );
        accept.parent_message_id = request.parent.map(|p| p.message_id);
        self.inner.traces.record_span(&accept)?;
        self.inner.published.fetch_add(1, Relaxed);
        debug!(
            message_id = %envelope.id,
            subject = %envelope.subject,
            subscribers = endpoints.len(),
            "envelope accepted"
        );

        // Step 7: fan out through the bus; each subscriber gets its own
        // envelope copy and its own deadline.
        let outcomes = self.inner.bus.publish_local(&envelope).await;

        let mut delivered_to = 0u64;
        for endpoint in &endpoints {
            let handler_outcomes: Vec<&relay_bus::DeliveryOutcome> = outcomes
                .iter()
                .filter(|o| o.pattern == endpoint.subject)
                .collect();

            // An endpoint with no live handler is served by the durable
            // inbox: the envelope is already in the log, addressed to it.
            let delivered = if handler_outcomes.is_empty() {
                Some(None)
            } else {
                handler_outcomes
                    .iter()
                    .find(|o| o.result.is_delivered())
                    .map(|o| match o.result {
                        DeliveryResult::Delivered { duration_ms } => Some(duration_ms),
                        _ => None,
                    })
            };

            if let Some(duration_ms) = delivered {
                delivered_to += 1;
                let at = Utc::now();
                let mut span = Span::event(
                    envelope.trace_id,
                    envelope.id,
                    &envelope.subject,
                    &envelope.from,
                    SpanEvent::Deliver,
                    at,
                );
                span.to_subject = Some(endpoint.subject.clone());
                span.duration_ms = duration_ms;
                self.inner.traces.record_span(&span)?;
                self.inner.endpoints.record_delivery(&endpoint.subject, at)?;
            }
        }

        // Step 8: finalize.
        if delivered_to > 0 {
            self.inner
                .messages
                .set_status(envelope.id, MessageStatus::Delivered)?;
            self.inner.delivered.fetch_add(1, Relaxed);
        } else if !endpoints.is_empty() {
            self.inner
                .messages
                .set_status(envelope.id, MessageStatus::Failed)?;
            self.inner.failed.fetch_add(1, Relaxed);
            let target_hash = endpoints
                .first()
                .map(|e| e.subject_hash)
                .unwrap_or_else(|| subject_hash(&envelope.subject));
            let mut span = Span::event(
                envelope.trace_id,
                envelope.id,
                &envelope.subject,
                &envelope.from,
                SpanEvent::DeadLetter,
                Utc::now(),
            );
            span.error = Some(DeadLetterReason::PublishFailed.as_str().to_string());
            self.inner.traces.record_span(&span)?;
            let mut failed_envelope = envelope.clone();
            failed_envelope.status = MessageStatus::Failed;
            self.record_dead_letter(&failed_envelope, DeadLetterReason::PublishFailed, target_hash)?;
            warn!(
                message_id = %envelope.id,
                subject = %envelope.subject,
                "all subscribers failed, envelope dead-lettered"
            );
        } else {
            // Accepted with zero delivery: not an error.
            self.inner
                .messages
                .set_status(envelope.id, MessageStatus::Delivered)?;
            self.inner.delivered.fetch_add(1, Relaxed);
        }

        Ok(PublishReceipt {
            message_id: envelope.id,
            trace_id: envelope.trace_id,
            delivered_to,
        })
    }

    /// Step-4 rejection: reject span, dead-letter envelope + record, signal.
    fn reject(
        &self,
        mut envelope: Envelope,
        reason: DeadLetterReason,
        parent: Option<Parent>,
    ) -> Result<PublishReceipt, StoreError> {
        let mut span = Span::event(
            envelope.trace_id,
            envelope.id,
            &envelope.subject,
            &envelope.from,
            SpanEvent::Reject,
            Utc::now(),
        );
        span.parent_message_id = parent.map(|p| p.message_id);
        span.error = Some(reason.as_str().to_string());
        self.inner.traces.record_span(&span)?;

        envelope.status = MessageStatus::DeadLetter;
        self.inner.messages.append(&envelope)?;
        self.record_dead_letter(&envelope, reason, subject_hash(&envelope.subject))?;
        info!(
            message_id = %envelope.id,
            subject = %envelope.subject,
            reason = %reason,
            "publish rejected by budget"
        );

        Ok(PublishReceipt {
            message_id: envelope.id,
            trace_id: envelope.trace_id,
            delivered_to: 0,
        })
    }

    fn record_dead_letter(
        &self,
        envelope: &Envelope,
        reason: DeadLetterReason,
        endpoint_hash: u64,
    ) -> Result<(), StoreError> {
        self.inner.dead_letters.insert(&DeadLetter {
            endpoint_hash,
            message_id: envelope.id,
            reason,
            envelope: envelope.clone(),
            failed_at: Utc::now(),
        })?;
        self.inner.dead_lettered.fetch_add(1, Relaxed);
        self.inner.bus.emit(Signal::DeadLetter {
            subject: envelope.subject.clone(),
            message_id: envelope.id,
            reason: reason.as_str().to_string(),
        });
        Ok(())
    }

    /// Kernel counters snapshot.
    pub fn metrics(&self) -> KernelMetrics {
        let bus = self.inner.bus.stats();
        KernelMetrics {
            published: self.inner.published.load(Relaxed),
            delivered: self.inner.delivered.load(Relaxed),
            failed: self.inner.failed.load(Relaxed),
            dead_lettered: self.inner.dead_lettered.load(Relaxed),
            fanouts: bus.fanouts,
            backpressure_drops: bus.backpressure_drops,
            active_subscriptions: bus.active_subscriptions,
        }
    }

    /// The subscription bus this engine fans out through.
    pub fn bus(&self) -> &SubscriptionBus {
        &self.inner.bus
    }

    /// Message log handle.
    pub fn messages(&self) -> &MessageStore {
        &self.inner.messages
    }

    /// Endpoint registry handle.
    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.inner.endpoints
    }

    /// Dead-letter store handle.
    pub fn dead_letters(&self) -> &DeadLetterStore {
        &self.inner.dead_letters
    }

    /// Trace store handle.
    pub fn traces(&self) -> &TraceStore {
        &self.inner.traces
    }

    /// Spawn the hourly trace pruner honoring `retention_days`.
    ///
    /// The first sweep runs immediately; the task runs until aborted.
    pub fn spawn_trace_pruner(&self, retention_days: u32) -> tokio::task::JoinHandle<()> {
        let traces = self.inner.traces.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tick.tick().await;
                let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
                match traces.prune_older_than(cutoff) {
                    Ok(0) => {}
                    Ok(n) => info!(pruned = n, "trace spans pruned"),
                    Err(e) => warn!(error = %e, "trace pruning failed"),
                }
            }
        })
    }
}
