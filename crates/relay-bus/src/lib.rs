// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory, pattern-indexed subscription fan-out with backpressure
//! signals.
//!
//! The bus never buffers envelopes. Fan-out invokes each matching handler
//! in registration order with a per-handler deadline; a handler that blows
//! the deadline costs only its own delivery and raises a `backpressure`
//! signal. The registration table is copy-on-write: `subscribe` and
//! `unsubscribe` install a new table version while in-flight fan-outs keep
//! iterating the version they captured at entry.
#![deny(unsafe_code)]

use futures::future::BoxFuture;
use relay_core::Envelope;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Default per-handler deadline.
pub const DEFAULT_HANDLER_BUDGET: Duration = Duration::from_millis(250);

/// Capacity of the signal broadcast channel.
const SIGNAL_CAPACITY: usize = 256;

/// Async subscriber callback. Receives its own envelope copy (budget visited
/// set included), so cross-subscriber contamination is impossible.
pub type Handler =
    Arc<dyn Fn(Envelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Out-of-band bus events observable alongside envelope flow.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// A subscriber exceeded the handler budget; its delivery was dropped.
    Backpressure {
        /// Subject of the envelope being delivered.
        subject: String,
        /// Owner label of the slow subscriber.
        subscriber: String,
        /// Pattern the slow subscriber registered.
        pattern: String,
    },
    /// The delivery engine recorded a dead letter.
    DeadLetter {
        /// Subject of the dead-lettered envelope.
        subject: String,
        /// Envelope id.
        message_id: Uuid,
        /// Stable reason string.
        reason: String,
    },
}

impl Signal {
    /// Subject the signal is addressed to, for pattern filtering.
    pub fn subject(&self) -> &str {
        match self {
            Signal::Backpressure { subject, .. } | Signal::DeadLetter { subject, .. } => subject,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

struct Subscription {
    id: u64,
    pattern: String,
    owner: String,
    handler: Handler,
}

type Table = Arc<Vec<Arc<Subscription>>>;

/// Cancels the subscription when dropped (or explicitly via
/// [`SubscriptionGuard::cancel`]).
pub struct SubscriptionGuard {
    id: u64,
    bus: SubscriptionBus,
}

impl SubscriptionGuard {
    /// Cancel now instead of at drop.
    pub fn cancel(self) {
        // Drop impl does the work.
    }

    /// The bus-assigned subscription id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

// ---------------------------------------------------------------------------
// Delivery outcomes
// ---------------------------------------------------------------------------

/// Per-subscriber result of one fan-out.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// Bus-assigned subscription id.
    pub subscriber_id: u64,
    /// Pattern the subscriber registered.
    pub pattern: String,
    /// Owner label supplied at subscribe time.
    pub owner: String,
    /// What happened.
    pub result: DeliveryResult,
}

/// What happened to one subscriber's delivery.
#[derive(Debug, Clone)]
pub enum DeliveryResult {
    /// Handler returned success within budget.
    Delivered {
        /// Wall-clock handler duration in milliseconds.
        duration_ms: u64,
    },
    /// Handler returned an error; fan-out to others continued.
    Failed {
        /// Stringified handler error.
        error: String,
    },
    /// Handler exceeded the budget; delivery dropped, signal raised.
    TimedOut,
}

impl DeliveryResult {
    /// Returns `true` for [`DeliveryResult::Delivered`].
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Snapshot of bus statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Fan-outs performed.
    pub fanouts: u64,
    /// Deliveries dropped to backpressure.
    pub backpressure_drops: u64,
    /// Currently registered subscriptions.
    pub active_subscriptions: usize,
}

struct BusInner {
    table: RwLock<Table>,
    next_id: AtomicU64,
    handler_budget: Duration,
    signals: broadcast::Sender<Signal>,
    fanouts: AtomicU64,
    backpressure_drops: AtomicU64,
}

/// The subscription bus. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionBus {
    inner: Arc<BusInner>,
}

impl SubscriptionBus {
    /// Create a bus with the given per-handler deadline.
    pub fn new(handler_budget: Duration) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                table: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
                handler_budget,
                signals,
                fanouts: AtomicU64::new(0),
                backpressure_drops: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler for every envelope whose subject matches
    /// `pattern`. The pattern must be valid under the subject grammar.
    pub fn subscribe(
        &self,
        pattern: &str,
        owner: &str,
        handler: Handler,
    ) -> Result<SubscriptionGuard, relay_subject::SubjectError> {
        relay_subject::validate_pattern(pattern)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscription {
            id,
            pattern: pattern.to_string(),
            owner: owner.to_string(),
            handler,
        });

        let mut table = self
            .inner
            .table
            .write()
            .expect("subscription table poisoned");
        let mut next: Vec<Arc<Subscription>> = table.iter().cloned().collect();
        next.push(sub);
        *table = Arc::new(next);

        Ok(SubscriptionGuard {
            id,
            bus: self.clone(),
        })
    }

    fn unsubscribe(&self, id: u64) {
        let mut table = self
            .inner
            .table
            .write()
            .expect("subscription table poisoned");
        let next: Vec<Arc<Subscription>> =
            table.iter().filter(|s| s.id != id).cloned().collect();
        *table = Arc::new(next);
    }

    /// Fan an envelope out to every matching subscriber, in registration
    /// order. Handlers run synchronously within the caller's task, each
    /// bounded by the handler budget.
    ///
    /// Subscriptions added while a fan-out is in flight are not included in
    /// that fan-out: iteration walks the table version captured at entry.
    pub async fn publish_local(&self, envelope: &Envelope) -> Vec<DeliveryOutcome> {
        self.inner.fanouts.fetch_add(1, Ordering::Relaxed);
        let snapshot: Table = {
            let table = self
                .inner
                .table
                .read()
                .expect("subscription table poisoned");
            table.clone()
        };

        let mut outcomes = Vec::new();
        for sub in snapshot.iter() {
            if !relay_subject::matches(&sub.pattern, &envelope.subject) {
                continue;
            }
            // Each subscriber gets its own envelope copy.
            let fut = (sub.handler)(envelope.clone());
            let started = Instant::now();
            let result = match tokio::time::timeout(self.inner.handler_budget, fut).await {
                Ok(Ok(())) => DeliveryResult::Delivered {
                    duration_ms: started.elapsed().as_millis() as u64,
                },
                Ok(Err(err)) => {
                    warn!(
                        subject = %envelope.subject,
                        subscriber = %sub.owner,
                        error = %err,
                        "subscriber handler failed"
                    );
                    DeliveryResult::Failed {
                        error: err.to_string(),
                    }
                }
                Err(_) => {
                    self.inner
                        .backpressure_drops
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subject = %envelope.subject,
                        subscriber = %sub.owner,
                        budget_ms = self.inner.handler_budget.as_millis() as u64,
                        "subscriber exceeded handler budget, delivery dropped"
                    );
                    self.emit(Signal::Backpressure {
                        subject: envelope.subject.clone(),
                        subscriber: sub.owner.clone(),
                        pattern: sub.pattern.clone(),
                    });
                    DeliveryResult::TimedOut
                }
            };
            outcomes.push(DeliveryOutcome {
                subscriber_id: sub.id,
                pattern: sub.pattern.clone(),
                owner: sub.owner.clone(),
                result,
            });
        }
        outcomes
    }

    /// Emit an out-of-band signal to all signal subscribers.
    ///
    /// Send failures mean nobody is listening; that is not an error.
    pub fn emit(&self, signal: Signal) {
        let _ = self.inner.signals.send(signal);
    }

    /// Subscribe to signals, optionally filtered by a subject pattern.
    pub fn subscribe_signals(&self, pattern: Option<String>) -> SignalSubscription {
        SignalSubscription {
            rx: self.inner.signals.subscribe(),
            pattern,
        }
    }

    /// Snapshot of bus statistics.
    pub fn stats(&self) -> BusStats {
        let active = self
            .inner
            .table
            .read()
            .expect("subscription table poisoned")
            .len();
        BusStats {
            fanouts: self.inner.fanouts.load(Ordering::Relaxed),
            backpressure_drops: self.inner.backpressure_drops.load(Ordering::Relaxed),
            active_subscriptions: active,
        }
    }
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_BUDGET)
    }
}

// ---------------------------------------------------------------------------
// SignalSubscription
// ---------------------------------------------------------------------------

/// A handle for receiving [`Signal`]s, optionally pattern-filtered.
pub struct SignalSubscription {
    rx: broadcast::Receiver<Signal>,
    pattern: Option<String>,
}

impl SignalSubscription {
    /// Receive the next matching signal, waiting asynchronously.
    ///
    /// Returns `None` when the bus is dropped. Lagged signals are skipped.
    pub async fn recv(&mut self) -> Option<Signal> {
        loop {
            match self.rx.recv().await {
                Ok(signal) => {
                    if let Some(ref p) = self.pattern
                        && !relay_subject::matches(p, signal.subject())
                    {
                        continue;
                    }
                    return Some(signal);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
