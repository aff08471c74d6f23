// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server-sent events edge.
//!
//! One subscriber per connection. The outbound queue is bounded: overflow
//! drops the oldest pending event (never a keepalive, those are generated
//! by the transport) and logs a warning. Disconnect tears down both the
//! envelope subscription and the signal forwarder.

use crate::{ApiError, AppState};
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use relay_bus::Signal;
use serde::Deserialize;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

/// Query parameters of `GET /stream`.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Optional server-side subject filter pattern.
    pub subject: Option<String>,
}

// ---------------------------------------------------------------------------
// Bounded event queue
// ---------------------------------------------------------------------------

struct SseQueue {
    buf: Mutex<VecDeque<SseEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SseQueue {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: SseEvent) {
        {
            let mut buf = self.buf.lock().expect("sse queue poisoned");
            if buf.len() >= self.capacity {
                buf.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "sse queue overflow, oldest event dropped");
            }
            buf.push_back(event);
        }
        self.notify.notify_one();
    }

    async fn pop_wait(&self) -> SseEvent {
        loop {
            if let Some(event) = self.buf.lock().expect("sse queue poisoned").pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

/// Aborts the signal-forwarder task when the stream is dropped.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct StreamState {
    queue: Arc<SseQueue>,
    _subscription: relay_bus::SubscriptionGuard,
    _forwarder: AbortOnDrop,
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// `GET /stream` — subscribe to envelopes (and signals) over SSE.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let pattern = query.subject.unwrap_or_else(|| ">".to_string());
    relay_subject::validate_pattern(&pattern)
        .map_err(|e| ApiError::invalid_subject(e.to_string()))?;

    let connection_id = Uuid::new_v4();
    let queue = Arc::new(SseQueue::new(state.config.sse_queue_capacity));

    // Envelope subscription: every accepted envelope matching the pattern.
    let envelope_queue = queue.clone();
    let subscription = state
        .engine
        .bus()
        .subscribe(
            &pattern,
            &format!("sse:{connection_id}"),
            Arc::new(move |envelope| {
                let queue = envelope_queue.clone();
                Box::pin(async move {
                    let data = serde_json::to_string(&envelope)?;
                    queue.push(
                        SseEvent::default()
                            .event("relay_message")
                            .id(envelope.id.to_string())
                            .data(data),
                    );
                    Ok(())
                })
            }),
        )
        .map_err(|e| ApiError::invalid_subject(e.to_string()))?;

    // Signal forwarder: backpressure and dead-letter signals on the same
    // pattern.
    let mut signals = state.engine.bus().subscribe_signals(Some(pattern.clone()));
    let signal_queue = queue.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            let name = match &signal {
                Signal::Backpressure { .. } => "relay_backpressure",
                Signal::DeadLetter { .. } => "relay_signal",
            };
            if let Ok(data) = serde_json::to_string(&signal) {
                signal_queue.push(SseEvent::default().event(name).data(data));
            }
        }
    });

    queue.push(
        SseEvent::default().event("relay_connected").data(
            serde_json::json!({
                "pattern": pattern,
                "connected_at": Utc::now().to_rfc3339(),
            })
            .to_string(),
        ),
    );

    let stream_state = StreamState {
        queue,
        _subscription: subscription,
        _forwarder: AbortOnDrop(forwarder),
    };
    let stream = futures::stream::unfold(stream_state, |state| async move {
        let event = state.queue.pop_wait().await;
        Some((Ok(event), state))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.sse_keepalive_secs))
            .text("keepalive"),
    ))
}
