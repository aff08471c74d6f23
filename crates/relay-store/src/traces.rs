// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace span persistence, aggregate metrics, and age-based pruning.
//!
//! Spans are immutable appends ordered by timestamp then arrival. Latency
//! for a delivered envelope is `last(deliver) - accept`; undelivered
//! envelopes count toward totals but contribute no latency sample.

use crate::{StoreError, StoreResult, lock};
use chrono::{DateTime, Utc};
use relay_core::{Span, SpanEvent, TraceMetrics};
use rusqlite::{Connection, named_params};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Handle to the trace store.
#[derive(Clone)]
pub struct TraceStore {
    conn: Arc<Mutex<Connection>>,
}

impl TraceStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Append one span.
    pub fn record_span(&self, span: &Span) -> StoreResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO spans
                (trace_id, message_id, parent_message_id, subject, from_subject,
                 to_subject, event, timestamp_micros, duration_ms, error)
             VALUES (:trace_id, :message_id, :parent_message_id, :subject,
                     :from_subject, :to_subject, :event, :timestamp_micros,
                     :duration_ms, :error)",
            named_params! {
                ":trace_id": span.trace_id.to_string(),
                ":message_id": span.message_id.to_string(),
                ":parent_message_id": span.parent_message_id.map(|id| id.to_string()),
                ":subject": span.subject,
                ":from_subject": span.from,
                ":to_subject": span.to_subject,
                ":event": span.event.as_str(),
                ":timestamp_micros": span.timestamp.timestamp_micros(),
                ":duration_ms": span.duration_ms.map(|d| d as i64),
                ":error": span.error,
            },
        )?;
        Ok(())
    }

    /// All spans recorded for one envelope, in order.
    pub fn spans_for_message(&self, message_id: Uuid) -> StoreResult<Vec<Span>> {
        self.query_spans(
            "SELECT trace_id, message_id, parent_message_id, subject,
                    from_subject, to_subject, event, timestamp_micros,
                    duration_ms, error
             FROM spans WHERE message_id = :key
             ORDER BY timestamp_micros ASC, seq ASC",
            message_id,
        )
    }

    /// The full trace: every span sharing `trace_id`, ordered by timestamp
    /// then arrival.
    pub fn get_trace(&self, trace_id: Uuid) -> StoreResult<Vec<Span>> {
        self.query_spans(
            "SELECT trace_id, message_id, parent_message_id, subject,
                    from_subject, to_subject, event, timestamp_micros,
                    duration_ms, error
             FROM spans WHERE trace_id = :key
             ORDER BY timestamp_micros ASC, seq ASC",
            trace_id,
        )
    }

    fn query_spans(&self, sql: &str, key: Uuid) -> StoreResult<Vec<Span>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(sql)?;
        let raws: Vec<RawSpan> = stmt
            .query_map(named_params! { ":key": key.to_string() }, read_raw_span)?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(decode_span).collect()
    }

    /// Aggregate delivery metrics over spans, the envelope log, and the
    /// dead-letter store.
    pub fn metrics(&self) -> StoreResult<TraceMetrics> {
        let conn = lock(&self.conn);

        let total_messages: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT message_id) FROM spans
             WHERE event IN ('accept', 'reject')",
            [],
            |row| row.get(0),
        )?;
        let delivered_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT message_id) FROM spans WHERE event = 'deliver'",
            [],
            |row| row.get(0),
        )?;
        let failed_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM envelopes WHERE status = 'failed'",
            [],
            |row| row.get(0),
        )?;

        let mut stmt =
            conn.prepare("SELECT reason, COUNT(*) FROM dead_letters GROUP BY reason")?;
        let dead_letter_by_reason = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(r, n)| (r, n as u64))
            .collect();
        drop(stmt);

        // Latency samples: accept timestamp and last deliver timestamp per
        // envelope.
        let mut stmt = conn.prepare(
            "SELECT message_id, event, timestamp_micros FROM spans
             WHERE event IN ('accept', 'deliver')",
        )?;
        let rows: Vec<(String, String, i64)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        let mut accepts: HashMap<String, i64> = HashMap::new();
        let mut last_delivers: HashMap<String, i64> = HashMap::new();
        for (id, event, micros) in rows {
            match event.as_str() {
                "accept" => {
                    accepts.insert(id, micros);
                }
                "deliver" => {
                    let entry = last_delivers.entry(id).or_insert(micros);
                    *entry = (*entry).max(micros);
                }
                _ => {}
            }
        }

        let mut latencies_ms: Vec<u64> = last_delivers
            .iter()
            .filter_map(|(id, deliver)| {
                accepts
                    .get(id)
                    .map(|accept| ((deliver - accept).max(0) / 1_000) as u64)
            })
            .collect();
        latencies_ms.sort_unstable();

        let avg = if latencies_ms.is_empty() {
            0.0
        } else {
            latencies_ms.iter().sum::<u64>() as f64 / latencies_ms.len() as f64
        };

        Ok(TraceMetrics {
            total_messages: total_messages as u64,
            delivered_count: delivered_count as u64,
            failed_count: failed_count as u64,
            dead_letter_by_reason,
            avg_delivery_latency_ms: avg,
            p95_delivery_latency_ms: percentile(&latencies_ms, 95.0),
        })
    }

    /// Delete spans older than `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = lock(&self.conn);
        let n = conn.execute(
            "DELETE FROM spans WHERE timestamp_micros < ?1",
            [cutoff.timestamp_micros()],
        )?;
        Ok(n)
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

struct RawSpan {
    trace_id: String,
    message_id: String,
    parent_message_id: Option<String>,
    subject: String,
    from_subject: String,
    to_subject: Option<String>,
    event: String,
    timestamp_micros: i64,
    duration_ms: Option<i64>,
    error: Option<String>,
}

fn read_raw_span(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSpan> {
    Ok(RawSpan {
        trace_id: row.get(0)?,
        message_id: row.get(1)?,
        parent_message_id: row.get(2)?,
        subject: row.get(3)?,
        from_subject: row.get(4)?,
        to_subject: row.get(5)?,
        event: row.get(6)?,
        timestamp_micros: row.get(7)?,
        duration_ms: row.get(8)?,
        error: row.get(9)?,
    })
}

fn decode_span(raw: RawSpan) -> StoreResult<Span> {
    let bad = |what: &str| StoreError::IntegrityCheckFailed(what.to_string());
    Ok(Span {
        trace_id: raw.trace_id.parse().map_err(|_| bad("bad trace id"))?,
        message_id: raw.message_id.parse().map_err(|_| bad("bad message id"))?,
        parent_message_id: match raw.parent_message_id {
            Some(s) => Some(s.parse().map_err(|_| bad("bad parent id"))?),
            None => None,
        },
        subject: raw.subject,
        from: raw.from_subject,
        to_subject: raw.to_subject,
        event: SpanEvent::parse(&raw.event)
            .ok_or_else(|| StoreError::IntegrityCheckFailed(format!("unknown event '{}'", raw.event)))?,
        timestamp: DateTime::from_timestamp_micros(raw.timestamp_micros)
            .ok_or_else(|| bad("bad timestamp"))?,
        duration_ms: raw.duration_ms.map(|d| d as u64),
        error: raw.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::Duration;

    fn span_at(
        trace_id: Uuid,
        message_id: Uuid,
        event: SpanEvent,
        at: DateTime<Utc>,
    ) -> Span {
        Span::event(trace_id, message_id, "relay.agent.a", "relay.human.console", event, at)
    }

    #[test]
    fn record_and_fetch_trace_in_order() {
        let store = Store::open_in_memory().unwrap();
        let traces = store.traces();
        let trace = Uuid::now_v7();
        let msg = Uuid::now_v7();
        let t0 = Utc::now();

        traces.record_span(&span_at(trace, msg, SpanEvent::Accept, t0)).unwrap();
        let mut deliver = span_at(trace, msg, SpanEvent::Deliver, t0 + Duration::milliseconds(5));
        deliver.to_subject = Some("relay.agent.a".into());
        deliver.duration_ms = Some(3);
        traces.record_span(&deliver).unwrap();

        let spans = traces.get_trace(trace).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].event, SpanEvent::Accept);
        assert_eq!(spans[1].event, SpanEvent::Deliver);
        assert_eq!(spans[1].duration_ms, Some(3));
        assert_eq!(spans[1].to_subject.as_deref(), Some("relay.agent.a"));
    }

    #[test]
    fn spans_for_message_scopes_to_one_envelope() {
        let store = Store::open_in_memory().unwrap();
        let traces = store.traces();
        let trace = Uuid::now_v7();
        let parent = Uuid::now_v7();
        let child = Uuid::now_v7();
        let t0 = Utc::now();

        traces.record_span(&span_at(trace, parent, SpanEvent::Accept, t0)).unwrap();
        traces
            .record_span(&span_at(trace, child, SpanEvent::Accept, t0 + Duration::milliseconds(1)))
            .unwrap();

        assert_eq!(traces.spans_for_message(parent).unwrap().len(), 1);
        assert_eq!(traces.get_trace(trace).unwrap().len(), 2);
    }

    #[test]
    fn same_timestamp_spans_keep_arrival_order() {
        let store = Store::open_in_memory().unwrap();
        let traces = store.traces();
        let trace = Uuid::now_v7();
        let msg = Uuid::now_v7();
        let t0 = Utc::now();

        traces.record_span(&span_at(trace, msg, SpanEvent::Accept, t0)).unwrap();
        traces.record_span(&span_at(trace, msg, SpanEvent::Deliver, t0)).unwrap();

        let spans = traces.get_trace(trace).unwrap();
        assert_eq!(spans[0].event, SpanEvent::Accept);
        assert_eq!(spans[1].event, SpanEvent::Deliver);
    }

    #[test]
    fn metrics_count_accepts_and_rejects() {
        let store = Store::open_in_memory().unwrap();
        let traces = store.traces();
        let t0 = Utc::now();

        let accepted = Uuid::now_v7();
        traces.record_span(&span_at(accepted, accepted, SpanEvent::Accept, t0)).unwrap();
        traces
            .record_span(&span_at(accepted, accepted, SpanEvent::Deliver, t0 + Duration::milliseconds(10)))
            .unwrap();

        let rejected = Uuid::now_v7();
        traces.record_span(&span_at(rejected, rejected, SpanEvent::Reject, t0)).unwrap();

        let m = traces.metrics().unwrap();
        assert_eq!(m.total_messages, 2);
        assert_eq!(m.delivered_count, 1);
        assert!((m.avg_delivery_latency_ms - 10.0).abs() < 1.0);
    }

    #[test]
    fn latency_uses_last_deliver() {
        let store = Store::open_in_memory().unwrap();
        let traces = store.traces();
        let msg = Uuid::now_v7();
        let t0 = Utc::now();

        traces.record_span(&span_at(msg, msg, SpanEvent::Accept, t0)).unwrap();
        traces
            .record_span(&span_at(msg, msg, SpanEvent::Deliver, t0 + Duration::milliseconds(4)))
            .unwrap();
        traces
            .record_span(&span_at(msg, msg, SpanEvent::Deliver, t0 + Duration::milliseconds(20)))
            .unwrap();

        let m = traces.metrics().unwrap();
        assert!((m.avg_delivery_latency_ms - 20.0).abs() < 1.0);
        assert!((m.p95_delivery_latency_ms - 20.0).abs() < 1.0);
    }

    #[test]
    fn prune_removes_only_old_spans() {
        let store = Store::open_in_memory().unwrap();
        let traces = store.traces();
        let msg = Uuid::now_v7();
        let now = Utc::now();

        traces
            .record_span(&span_at(msg, msg, SpanEvent::Accept, now - Duration::days(10)))
            .unwrap();
        traces.record_span(&span_at(msg, msg, SpanEvent::Deliver, now)).unwrap();

        let removed = traces.prune_older_than(now - Duration::days(7)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(traces.spans_for_message(msg).unwrap().len(), 1);
    }

    #[test]
    fn percentile_edges() {
        assert_eq!(percentile(&[], 95.0), 0.0);
        assert_eq!(percentile(&[42], 95.0), 42.0);
        let v: Vec<u64> = (1..=100).collect();
        let p95 = percentile(&v, 95.0);
        assert!(p95 > 94.0 && p95 <= 96.1);
    }
}
