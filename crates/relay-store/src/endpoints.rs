// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistent endpoint registry.
//!
//! One row per registered subject. Registration is idempotent for the same
//! owner; a subject held by a different owner is a conflict. `find_matching`
//! applies the wildcard semantics of `relay-subject`, so an endpoint
//! registered as `relay.agent.>` receives every `relay.agent.*` publish.

use crate::{StoreError, StoreResult, lock};
use chrono::{DateTime, Utc};
use relay_core::Endpoint;
use rusqlite::{Connection, OptionalExtension, named_params};
use std::sync::{Arc, Mutex};

/// Handle to the endpoint registry.
#[derive(Clone)]
pub struct EndpointRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl EndpointRegistry {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Register `subject`, owned by `owner` (`None` for the HTTP edge).
    ///
    /// Idempotent re-registration by the same owner returns the existing
    /// endpoint; a different owner gets [`StoreError::DuplicateEndpoint`].
    pub fn register(&self, subject: &str, owner: Option<&str>) -> StoreResult<Endpoint> {
        let now = Utc::now();
        let conn = lock(&self.conn);

        let existing: Option<(Option<String>,)> = conn
            .query_row(
                "SELECT registered_by FROM endpoints WHERE subject = ?1",
                [subject],
                |row| Ok((row.get(0)?,)),
            )
            .optional()?;

        if let Some((registered_by,)) = existing {
            if registered_by.as_deref() != owner {
                return Err(StoreError::DuplicateEndpoint(subject.to_string()));
            }
            drop(conn);
            return Ok(self
                .get(subject)?
                .expect("endpoint row vanished during register"));
        }

        let endpoint = Endpoint::new(subject, now);
        conn.execute(
            "INSERT INTO endpoints
                (subject, subject_hash, registered_by, registered_at,
                 description, last_activity, message_count)
             VALUES (:subject, :hash, :owner, :registered_at, NULL, NULL, 0)",
            named_params! {
                ":subject": endpoint.subject,
                ":hash": endpoint.subject_hash as i64,
                ":owner": owner,
                ":registered_at": endpoint.registered_at.to_rfc3339(),
            },
        )?;
        Ok(endpoint)
    }

    /// Remove a registration. Returns `false` if it did not exist
    /// (unregister is idempotent).
    pub fn unregister(&self, subject: &str) -> StoreResult<bool> {
        let conn = lock(&self.conn);
        let n = conn.execute("DELETE FROM endpoints WHERE subject = ?1", [subject])?;
        Ok(n > 0)
    }

    /// Fetch one endpoint by its exact registered subject.
    pub fn get(&self, subject: &str) -> StoreResult<Option<Endpoint>> {
        let conn = lock(&self.conn);
        conn.query_row(
            "SELECT subject, subject_hash, registered_at, description,
                    last_activity, message_count
             FROM endpoints WHERE subject = ?1",
            [subject],
            read_endpoint,
        )
        .optional()
        .map_err(Into::into)
    }

    /// All registrations, in registration order (oldest first).
    pub fn list(&self) -> StoreResult<Vec<Endpoint>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT subject, subject_hash, registered_at, description,
                    last_activity, message_count
             FROM endpoints ORDER BY rowid ASC",
        )?;
        let endpoints = stmt
            .query_map([], read_endpoint)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(endpoints)
    }

    /// Every endpoint whose registered subject (treated as a pattern)
    /// matches the published `subject`, in registration order.
    pub fn find_matching(&self, subject: &str) -> StoreResult<Vec<Endpoint>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|ep| relay_subject::matches(&ep.subject, subject))
            .collect())
    }

    /// Bump delivery counters for an endpoint after a successful handler run.
    pub fn record_delivery(&self, subject: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "UPDATE endpoints
             SET message_count = message_count + 1, last_activity = ?1
             WHERE subject = ?2",
            rusqlite::params![at.to_rfc3339(), subject],
        )?;
        Ok(())
    }
}

fn read_endpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Endpoint> {
    let registered_at: String = row.get(2)?;
    let last_activity: Option<String> = row.get(4)?;
    Ok(Endpoint {
        subject: row.get(0)?,
        subject_hash: row.get::<_, i64>(1)? as u64,
        registered_at: parse_rfc3339(&registered_at, 2)?,
        description: row.get(3)?,
        last_activity: match last_activity {
            Some(s) => Some(parse_rfc3339(&s, 4)?),
            None => None,
        },
        message_count: row.get::<_, i64>(5)? as u64,
    })
}

fn parse_rfc3339(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
