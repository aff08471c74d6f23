// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter config persistence.

use crate::{StoreError, StoreResult, lock};
use chrono::{DateTime, Utc};
use relay_core::adapter::AdapterConfigRecord;
use rusqlite::{Connection, OptionalExtension, named_params};
use std::sync::{Arc, Mutex};

/// Handle to the adapter config store.
#[derive(Clone)]
pub struct AdapterConfigStore {
    conn: Arc<Mutex<Connection>>,
}

impl AdapterConfigStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert a new record. Fails with [`StoreError::DuplicateId`] if the id
    /// already exists.
    pub fn insert(&self, record: &AdapterConfigRecord) -> StoreResult<()> {
        let conn = lock(&self.conn);
        let result = conn.execute(
            "INSERT INTO adapter_configs (id, adapter_type, enabled, config, updated_at)
             VALUES (:id, :adapter_type, :enabled, :config, :updated_at)",
            named_params! {
                ":id": record.id,
                ":adapter_type": record.adapter_type,
                ":enabled": record.enabled,
                ":config": serde_json::to_string(&record.config)?,
                ":updated_at": record.updated_at.to_rfc3339(),
            },
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite an existing record in place.
    pub fn update(&self, record: &AdapterConfigRecord) -> StoreResult<()> {
        let conn = lock(&self.conn);
        let n = conn.execute(
            "UPDATE adapter_configs
             SET adapter_type = :adapter_type, enabled = :enabled,
                 config = :config, updated_at = :updated_at
             WHERE id = :id",
            named_params! {
                ":id": record.id,
                ":adapter_type": record.adapter_type,
                ":enabled": record.enabled,
                ":config": serde_json::to_string(&record.config)?,
                ":updated_at": record.updated_at.to_rfc3339(),
            },
        )?;
        if n == 0 {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        Ok(())
    }

    /// Fetch one record by instance id.
    pub fn get(&self, id: &str) -> StoreResult<Option<AdapterConfigRecord>> {
        let conn = lock(&self.conn);
        let raw: Option<(String, String, bool, String, String)> = conn
            .query_row(
                "SELECT id, adapter_type, enabled, config, updated_at
                 FROM adapter_configs WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;
        raw.map(decode_record).transpose()
    }

    /// All records, ordered by id.
    pub fn list(&self) -> StoreResult<Vec<AdapterConfigRecord>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, adapter_type, enabled, config, updated_at
             FROM adapter_configs ORDER BY id ASC",
        )?;
        let raws: Vec<(String, String, bool, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(decode_record).collect()
    }

    /// Remove a record. Returns `false` if it did not exist.
    pub fn remove(&self, id: &str) -> StoreResult<bool> {
        let conn = lock(&self.conn);
        let n = conn.execute("DELETE FROM adapter_configs WHERE id = ?1", [id])?;
        Ok(n > 0)
    }
}

fn decode_record(
    (id, adapter_type, enabled, config, updated_at): (String, String, bool, String, String),
) -> StoreResult<AdapterConfigRecord> {
    Ok(AdapterConfigRecord {
        id,
        adapter_type,
        enabled,
        config: serde_json::from_str(&config)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| StoreError::IntegrityCheckFailed("bad updated_at".into()))?,
    })
}
