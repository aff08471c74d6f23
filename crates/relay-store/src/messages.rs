// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only message log with cursor-paginated queries.
//!
//! Ordering: newest-first by `(created_at, id)`; ties broken by id. The
//! pagination cursor addresses a fixed position in that order, so pages do
//! not shift under concurrent appends.

use crate::{StoreError, StoreResult, lock};
use chrono::DateTime;
use relay_core::{Envelope, MessageStatus};
use rusqlite::{Connection, named_params};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Hard ceiling on page size.
pub const MAX_LIMIT: usize = 200;

/// Page size applied when the caller specifies none.
pub const DEFAULT_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Opaque pagination token encoding `(created_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    created_at_micros: i64,
    id: Uuid,
}

impl Cursor {
    fn encode(&self) -> String {
        format!("{}.{}", self.created_at_micros, self.id)
    }

    fn decode(token: &str) -> StoreResult<Self> {
        let (micros, id) = token.split_once('.').ok_or(StoreError::InvalidCursor)?;
        Ok(Self {
            created_at_micros: micros.parse().map_err(|_| StoreError::InvalidCursor)?,
            id: id.parse().map_err(|_| StoreError::InvalidCursor)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Query / result types
// ---------------------------------------------------------------------------

/// Filters for [`MessageStore::list`].
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Exact subject filter.
    pub subject: Option<String>,
    /// Status filter.
    pub status: Option<MessageStatus>,
    /// Exact origin filter.
    pub from: Option<String>,
    /// Resume token from a previous page.
    pub cursor: Option<String>,
    /// Page size, clamped to [`MAX_LIMIT`].
    pub limit: Option<usize>,
}

/// One page of envelopes, newest first.
#[derive(Debug, Clone)]
pub struct MessageList {
    /// Envelopes in reverse publish order.
    pub messages: Vec<Envelope>,
    /// Token for the next page, absent on the last page.
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// MessageStore
// ---------------------------------------------------------------------------

/// Handle to the envelope log.
#[derive(Clone)]
pub struct MessageStore {
    conn: Arc<Mutex<Connection>>,
}

struct RawRow {
    id: String,
    subject: String,
    from_subject: String,
    reply_to: Option<String>,
    payload: String,
    budget: String,
    status: String,
    created_at_micros: i64,
    trace_id: String,
}

impl MessageStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Append an envelope atomically. Fails only on storage error or an id
    /// collision.
    pub fn append(&self, envelope: &Envelope) -> StoreResult<()> {
        let conn = lock(&self.conn);
        let result = conn.execute(
            "INSERT INTO envelopes
                (id, subject, from_subject, reply_to, payload, budget, status,
                 created_at_micros, trace_id)
             VALUES (:id, :subject, :from_subject, :reply_to, :payload,
                     :budget, :status, :created_at_micros, :trace_id)",
            named_params! {
                ":id": envelope.id.to_string(),
                ":subject": envelope.subject,
                ":from_subject": envelope.from,
                ":reply_to": envelope.reply_to,
                ":payload": serde_json::to_string(&envelope.payload)?,
                ":budget": serde_json::to_string(&envelope.budget)?,
                ":status": envelope.status.as_str(),
                ":created_at_micros": envelope.created_at.timestamp_micros(),
                ":trace_id": envelope.trace_id.to_string(),
            },
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId(envelope.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a single envelope by id.
    pub fn get(&self, id: Uuid) -> StoreResult<Option<Envelope>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, subject, from_subject, reply_to, payload, budget,
                    status, created_at_micros, trace_id
             FROM envelopes WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id.to_string()], read_raw)?;
        match rows.next().transpose()? {
            Some(raw) => Ok(Some(decode_row(raw)?)),
            None => Ok(None),
        }
    }

    /// List envelopes newest-first with optional filters and pagination.
    pub fn list(&self, query: &MessageQuery) -> StoreResult<MessageList> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT).max(1);
        let cursor = query
            .cursor
            .as_deref()
            .map(Cursor::decode)
            .transpose()?;

        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, subject, from_subject, reply_to, payload, budget,
                    status, created_at_micros, trace_id
             FROM envelopes
             WHERE (:subject IS NULL OR subject = :subject)
               AND (:status IS NULL OR status = :status)
               AND (:from_subject IS NULL OR from_subject = :from_subject)
               AND (:cursor_micros IS NULL
                    OR created_at_micros < :cursor_micros
                    OR (created_at_micros = :cursor_micros AND id < :cursor_id))
             ORDER BY created_at_micros DESC, id DESC
             LIMIT :limit",
        )?;
        let raws: Vec<RawRow> = stmt
            .query_map(
                named_params! {
                    ":subject": query.subject,
                    ":status": query.status.map(|s| s.as_str()),
                    ":from_subject": query.from,
                    ":cursor_micros": cursor.map(|c| c.created_at_micros),
                    ":cursor_id": cursor.map(|c| c.id.to_string()),
                    ":limit": limit as i64,
                },
                read_raw,
            )?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        let next_cursor = if raws.len() == limit {
            raws.last().map(|r| {
                Cursor {
                    created_at_micros: r.created_at_micros,
                    id: r.id.parse().unwrap_or(Uuid::nil()),
                }
                .encode()
            })
        } else {
            None
        };

        let messages = raws.into_iter().map(decode_row).collect::<StoreResult<_>>()?;
        Ok(MessageList {
            messages,
            next_cursor,
        })
    }

    /// Transition an envelope's status. Only `new → terminal` is legal.
    pub fn set_status(&self, id: Uuid, status: MessageStatus) -> StoreResult<()> {
        let conn = lock(&self.conn);
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM envelopes WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(current) = current else {
            return Err(StoreError::MessageNotFound(id));
        };
        let current = decode_status(&current)?;
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: status,
            });
        }
        conn.execute(
            "UPDATE envelopes SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    /// Total number of envelopes in the log.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = lock(&self.conn);
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM envelopes", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Number of envelopes currently in the given status.
    pub fn count_by_status(&self, status: MessageStatus) -> StoreResult<u64> {
        let conn = lock(&self.conn);
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM envelopes WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        subject: row.get(1)?,
        from_subject: row.get(2)?,
        reply_to: row.get(3)?,
        payload: row.get(4)?,
        budget: row.get(5)?,
        status: row.get(6)?,
        created_at_micros: row.get(7)?,
        trace_id: row.get(8)?,
    })
}

fn decode_status(s: &str) -> StoreResult<MessageStatus> {
    MessageStatus::parse(s)
        .ok_or_else(|| StoreError::IntegrityCheckFailed(format!("unknown status '{s}'")))
}

fn decode_row(raw: RawRow) -> StoreResult<Envelope> {
    Ok(Envelope {
        id: raw
            .id
            .parse()
            .map_err(|_| StoreError::IntegrityCheckFailed("bad envelope id".into()))?,
        subject: raw.subject,
        from: raw.from_subject,
        reply_to: raw.reply_to,
        payload: serde_json::from_str(&raw.payload)?,
        budget: serde_json::from_str(&raw.budget)?,
        status: decode_status(&raw.status)?,
        created_at: DateTime::from_timestamp_micros(raw.created_at_micros)
            .ok_or_else(|| StoreError::IntegrityCheckFailed("bad timestamp".into()))?,
        trace_id: raw
            .trace_id
            .parse()
            .map_err(|_| StoreError::IntegrityCheckFailed("bad trace id".into()))?,
    })
}
