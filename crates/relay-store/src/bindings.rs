// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binding persistence.

use crate::{StoreError, StoreResult, lock};
use relay_core::binding::{Binding, SessionStrategy};
use rusqlite::{Connection, OptionalExtension, named_params};
use std::sync::{Arc, Mutex};

/// Handle to the binding store.
#[derive(Clone)]
pub struct BindingStore {
    conn: Arc<Mutex<Connection>>,
}

impl BindingStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert a new binding. Fails with [`StoreError::DuplicateId`] if the
    /// id already exists.
    pub fn insert(&self, binding: &Binding) -> StoreResult<()> {
        let conn = lock(&self.conn);
        let result = conn.execute(
            "INSERT INTO bindings
                (id, adapter_id, agent_id, agent_dir, session_strategy, label)
             VALUES (:id, :adapter_id, :agent_id, :agent_dir, :strategy, :label)",
            named_params! {
                ":id": binding.id,
                ":adapter_id": binding.adapter_id,
                ":agent_id": binding.agent_id,
                ":agent_dir": binding.agent_dir,
                ":strategy": strategy_str(binding.session_strategy),
                ":label": binding.label,
            },
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId(binding.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one binding by id.
    pub fn get(&self, id: &str) -> StoreResult<Option<Binding>> {
        let conn = lock(&self.conn);
        conn.query_row(
            "SELECT id, adapter_id, agent_id, agent_dir, session_strategy, label
             FROM bindings WHERE id = ?1",
            [id],
            read_binding,
        )
        .optional()
        .map_err(Into::into)
    }

    /// All bindings, ordered by id.
    pub fn list(&self) -> StoreResult<Vec<Binding>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, adapter_id, agent_id, agent_dir, session_strategy, label
             FROM bindings ORDER BY id ASC",
        )?;
        let bindings = stmt
            .query_map([], read_binding)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bindings)
    }

    /// Remove a binding. Returns `false` if it did not exist.
    pub fn remove(&self, id: &str) -> StoreResult<bool> {
        let conn = lock(&self.conn);
        let n = conn.execute("DELETE FROM bindings WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    /// All bindings attached to one adapter instance.
    pub fn for_adapter(&self, adapter_id: &str) -> StoreResult<Vec<Binding>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, adapter_id, agent_id, agent_dir, session_strategy, label
             FROM bindings WHERE adapter_id = ?1 ORDER BY id ASC",
        )?;
        let bindings = stmt
            .query_map([adapter_id], read_binding)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bindings)
    }
}

fn strategy_str(strategy: SessionStrategy) -> &'static str {
    match strategy {
        SessionStrategy::PerChat => "per-chat",
        SessionStrategy::Shared => "shared",
    }
}

fn read_binding(row: &rusqlite::Row<'_>) -> rusqlite::Result<Binding> {
    let strategy: String = row.get(4)?;
    let session_strategy = match strategy.as_str() {
        "per-chat" => SessionStrategy::PerChat,
        "shared" => SessionStrategy::Shared,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown session strategy '{other}'").into(),
            ));
        }
    };
    Ok(Binding {
        id: row.get(0)?,
        adapter_id: row.get(1)?,
        agent_id: row.get(2)?,
        agent_dir: row.get(3)?,
        session_strategy,
        label: row.get(5)?,
    })
}
