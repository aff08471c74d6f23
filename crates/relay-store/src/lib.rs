// SPDX-License-Identifier: MIT OR Apache-2.0
//! SQLite persistence for the Relay kernel.
//!
//! One database file holds the message log, the endpoint registry, dead
//! letters, trace spans, adapter configs, and bindings. Writes are
//! serialized behind a single connection mutex; WAL mode keeps readers from
//! blocking the writer.
//!
//! # Durability settings
//! Applied at open: WAL, `synchronous=FULL`, `foreign_keys=ON`. A
//! `PRAGMA integrity_check` runs at open and fails hard. Migrations are
//! forward-only, tracked via `user_version`; a database written by a newer
//! schema is fatal at startup.
#![deny(unsafe_code)]

/// Adapter config persistence.
pub mod adapters;
/// Binding persistence.
pub mod bindings;
/// Dead-letter persistence.
pub mod dead_letters;
/// Endpoint registry persistence.
pub mod endpoints;
/// Message log persistence and cursor pagination.
pub mod messages;
/// Trace span persistence, metrics, and pruning.
pub mod traces;

use relay_core::MessageStatus;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub use adapters::AdapterConfigStore;
pub use bindings::BindingStore;
pub use dead_letters::DeadLetterStore;
pub use endpoints::EndpointRegistry;
pub use messages::{MessageList, MessageQuery, MessageStore};
pub use traces::TraceStore;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Current schema version written to `user_version`.
pub const SCHEMA_VERSION: i32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the durable stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `PRAGMA integrity_check` did not return "ok".
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    /// The database was written by a newer schema than this build supports.
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    SchemaVersion {
        /// Version found in the database file.
        found: i32,
        /// Highest version this build knows.
        supported: i32,
    },

    /// The requested envelope does not exist.
    #[error("message {0} not found")]
    MessageNotFound(Uuid),

    /// A status transition out of a terminal state was attempted.
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        /// Status currently recorded.
        from: MessageStatus,
        /// Status that was requested.
        to: MessageStatus,
    },

    /// The subject is registered to a different owner.
    #[error("endpoint subject '{0}' already registered")]
    DuplicateEndpoint(String),

    /// A record with this id already exists.
    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    /// A record failed to (de)serialize.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),

    /// A pagination cursor failed to parse.
    #[error("invalid cursor")]
    InvalidCursor,
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the opened Relay database.
///
/// Cheap to clone; all sub-stores share the same serialized connection.
#[derive(Clone, Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path`.
    ///
    /// Applies durability pragmas, runs the integrity check, and migrates
    /// the schema forward. Fails if the file carries a newer schema version.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (used by tests).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Message log handle.
    pub fn messages(&self) -> MessageStore {
        MessageStore::new(self.conn.clone())
    }

    /// Endpoint registry handle.
    pub fn endpoints(&self) -> EndpointRegistry {
        EndpointRegistry::new(self.conn.clone())
    }

    /// Dead-letter store handle.
    pub fn dead_letters(&self) -> DeadLetterStore {
        DeadLetterStore::new(self.conn.clone())
    }

    /// Trace store handle.
    pub fn traces(&self) -> TraceStore {
        TraceStore::new(self.conn.clone())
    }

    /// Adapter config store handle.
    pub fn adapter_configs(&self) -> AdapterConfigStore {
        AdapterConfigStore::new(self.conn.clone())
    }

    /// Binding store handle.
    pub fn bindings(&self) -> BindingStore {
        BindingStore::new(self.conn.clone())
    }
}

pub(crate) fn lock(conn: &Arc<Mutex<Connection>>) -> MutexGuard<'_, Connection> {
    conn.lock().expect("store connection mutex poisoned")
}

fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> StoreResult<()> {
    let r: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if r != "ok" {
        return Err(StoreError::IntegrityCheckFailed(r));
    }
    Ok(())
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found < 1 {
        conn.execute_batch(SCHEMA_SQL)?;
    }
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_initialises_schema() {
        let store = Store::open_in_memory().unwrap();
        // All sub-store handles are usable immediately.
        assert!(store.endpoints().list().unwrap().is_empty());
        assert!(store.bindings().list().unwrap().is_empty());
    }

    #[test]
    fn open_is_idempotent_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        drop(Store::open(&path).unwrap());
        // Reopening an already-migrated file succeeds.
        let store = Store::open(&path).unwrap();
        assert!(store.endpoints().list().unwrap().is_empty());
    }

    #[test]
    fn newer_schema_version_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        drop(Store::open(&path).unwrap());
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }
        let err = Store::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersion { .. }));
    }
}
