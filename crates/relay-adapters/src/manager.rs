// SPDX-License-Identifier: MIT OR Apache-2.0
//! The adapter manager: catalog, config persistence, lifecycle, status.
//!
//! The manager is the single source of truth for adapter state; the HTTP
//! edge only reads. Runtime errors flip an instance to the `error` state
//! and are remembered on its status cell; they never terminate the
//! manager.

use crate::manifest::{self, validate_config};
use crate::runtime::{AdapterContext, AdapterRuntime};
use crate::sessions::SessionRouter;
use crate::{AdapterError, StatusCell};
use chrono::Utc;
use relay_bus::SubscriptionGuard;
use relay_core::PublishReceipt;
use relay_core::adapter::{AdapterConfigRecord, AdapterManifest, AdapterState, AdapterStatus};
use relay_core::binding::Binding;
use relay_engine::RelayEngine;
use relay_store::{AdapterConfigStore, BindingStore, Store, StoreError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One configured instance inside a catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    /// Instance id.
    pub id: String,
    /// Whether the instance should be running.
    pub enabled: bool,
    /// Current lifecycle state.
    pub state: AdapterState,
}

/// One adapter type plus its configured instances.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    /// Static manifest of the type.
    pub manifest: AdapterManifest,
    /// Configured instances of this type.
    pub instances: Vec<InstanceSummary>,
}

/// Result of a connection test; probe failures are data, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    /// Whether the probe succeeded.
    pub ok: bool,
    /// Probe failure detail, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct Cell {
    record: AdapterConfigRecord,
    runtime: Arc<AdapterRuntime>,
    status: Arc<StatusCell>,
    guards: Vec<SubscriptionGuard>,
}

struct ManagerInner {
    engine: RelayEngine,
    configs: AdapterConfigStore,
    bindings: BindingStore,
    cells: RwLock<HashMap<String, Cell>>,
    sessions: SessionRouter,
}

/// Adapter lifecycle manager. Cheap to clone.
#[derive(Clone)]
pub struct AdapterManager {
    inner: Arc<ManagerInner>,
}

impl AdapterManager {
    /// Build a manager over the engine and the opened store.
    pub fn new(engine: RelayEngine, store: &Store) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                engine,
                configs: store.adapter_configs(),
                bindings: store.bindings(),
                cells: RwLock::new(HashMap::new()),
                sessions: SessionRouter::new(),
            }),
        }
    }

    /// Instantiate every persisted config and start the enabled ones.
    /// Called once at boot and again on reload.
    pub async fn load_persisted(&self) -> Result<usize, AdapterError> {
        let records = self.inner.configs.list()?;
        let mut cells = self.inner.cells.write().await;
        let mut loaded = 0;
        for record in records {
            if cells.contains_key(&record.id) {
                continue;
            }
            let runtime = match AdapterRuntime::build(&record) {
                Ok(rt) => Arc::new(rt),
                Err(err) => {
                    warn!(adapter = %record.id, error = %err, "skipping unloadable adapter");
                    continue;
                }
            };
            let mut cell = Cell {
                record: record.clone(),
                runtime,
                status: Arc::new(StatusCell::default()),
                guards: Vec::new(),
            };
            if record.enabled {
                Self::start_locked(&self.inner.engine, &mut cell, &record.id).await;
            }
            cells.insert(record.id.clone(), cell);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Add a new instance: validate, persist, and (if enabled) start it.
    pub async fn add(
        &self,
        adapter_type: &str,
        id: &str,
        config: serde_json::Value,
        enabled: bool,
    ) -> Result<(), AdapterError> {
        let Some(manifest) = manifest::manifest_for(adapter_type) else {
            return Err(AdapterError::UnknownType(adapter_type.to_string()));
        };

        let mut cells = self.inner.cells.write().await;
        if cells.contains_key(id) {
            return Err(AdapterError::DuplicateId(id.to_string()));
        }
        if !manifest.multi_instance
            && cells.values().any(|c| c.record.adapter_type == adapter_type)
        {
            return Err(AdapterError::MultiInstanceDenied(adapter_type.to_string()));
        }

        let config = validate_config(&manifest, &config)
            .map_err(|reasons| AdapterError::ConfigInvalid { reasons })?;

        let record = AdapterConfigRecord {
            id: id.to_string(),
            adapter_type: adapter_type.to_string(),
            enabled,
            config,
            updated_at: Utc::now(),
        };
        let runtime = Arc::new(AdapterRuntime::build(&record)?);

        match self.inner.configs.insert(&record) {
            Ok(()) => {}
            Err(StoreError::DuplicateId(dup)) => return Err(AdapterError::DuplicateId(dup)),
            Err(e) => return Err(e.into()),
        }

        let mut cell = Cell {
            record: record.clone(),
            runtime,
            status: Arc::new(StatusCell::default()),
            guards: Vec::new(),
        };
        if enabled {
            Self::start_locked(&self.inner.engine, &mut cell, id).await;
        }
        cells.insert(id.to_string(), cell);
        info!(adapter = %id, r#type = %adapter_type, enabled, "adapter added");
        Ok(())
    }

    /// Remove an instance. Built-in single-instance adapters are protected.
    /// Bindings attached to the instance are removed and their sessions
    /// cleaned up.
    pub async fn remove(&self, id: &str) -> Result<(), AdapterError> {
        let mut cells = self.inner.cells.write().await;
        let Some(cell) = cells.get_mut(id) else {
            return Err(AdapterError::NotFound(id.to_string()));
        };
        let manifest = cell.runtime.manifest();
        if manifest.builtin && !manifest.multi_instance {
            return Err(AdapterError::RemoveBuiltinDenied(id.to_string()));
        }

        Self::stop_locked(&self.inner.engine, cell, id).await;
        if let Some(out_subject) = cell.runtime.outbound_subject(id) {
            self.inner.engine.endpoints().unregister(&out_subject)?;
        }
        cells.remove(id);
        self.inner.configs.remove(id)?;

        for binding in self.inner.bindings.for_adapter(id)? {
            self.inner.bindings.remove(&binding.id)?;
        }
        self.cleanup_sessions()?;
        info!(adapter = %id, "adapter removed");
        Ok(())
    }

    /// Replace an instance's config: stop, persist, rebuild, restart if
    /// enabled. Atomic with respect to other manager calls.
    pub async fn update_config(
        &self,
        id: &str,
        config: serde_json::Value,
    ) -> Result<(), AdapterError> {
        let mut cells = self.inner.cells.write().await;
        let Some(cell) = cells.get_mut(id) else {
            return Err(AdapterError::NotFound(id.to_string()));
        };
        let manifest = cell.runtime.manifest();
        let config = validate_config(&manifest, &config)
            .map_err(|reasons| AdapterError::ConfigInvalid { reasons })?;

        Self::stop_locked(&self.inner.engine, cell, id).await;

        cell.record.config = config;
        cell.record.updated_at = Utc::now();
        self.inner.configs.update(&cell.record)?;
        cell.runtime = Arc::new(AdapterRuntime::build(&cell.record)?);

        if cell.record.enabled {
            Self::start_locked(&self.inner.engine, cell, id).await;
        }
        Ok(())
    }

    /// Mark an instance enabled and start it. Idempotent.
    pub async fn enable(&self, id: &str) -> Result<(), AdapterError> {
        let mut cells = self.inner.cells.write().await;
        let Some(cell) = cells.get_mut(id) else {
            return Err(AdapterError::NotFound(id.to_string()));
        };
        if !cell.record.enabled {
            cell.record.enabled = true;
            cell.record.updated_at = Utc::now();
            self.inner.configs.update(&cell.record)?;
        }
        if cell.status.state() != AdapterState::Connected {
            Self::start_locked(&self.inner.engine, cell, id).await;
        }
        Ok(())
    }

    /// Mark an instance disabled and stop it. Idempotent.
    pub async fn disable(&self, id: &str) -> Result<(), AdapterError> {
        let mut cells = self.inner.cells.write().await;
        let Some(cell) = cells.get_mut(id) else {
            return Err(AdapterError::NotFound(id.to_string()));
        };
        if cell.record.enabled {
            cell.record.enabled = false;
            cell.record.updated_at = Utc::now();
            self.inner.configs.update(&cell.record)?;
        }
        Self::stop_locked(&self.inner.engine, cell, id).await;
        Ok(())
    }

    /// Exercise an adapter's probe without persisting anything.
    pub async fn test_connection(
        &self,
        adapter_type: &str,
        config: serde_json::Value,
    ) -> Result<TestOutcome, AdapterError> {
        let Some(manifest) = manifest::manifest_for(adapter_type) else {
            return Err(AdapterError::UnknownType(adapter_type.to_string()));
        };
        let config = validate_config(&manifest, &config)
            .map_err(|reasons| AdapterError::ConfigInvalid { reasons })?;
        let record = AdapterConfigRecord {
            id: "connection-test".into(),
            adapter_type: adapter_type.to_string(),
            enabled: false,
            config,
            updated_at: Utc::now(),
        };
        let runtime = AdapterRuntime::build(&record)?;
        Ok(match runtime.probe().await {
            Ok(()) => TestOutcome {
                ok: true,
                error: None,
            },
            Err(err) => TestOutcome {
                ok: false,
                error: Some(err.to_string()),
            },
        })
    }

    /// The catalog: every built-in manifest with its configured instances.
    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        let cells = self.inner.cells.read().await;
        manifest::builtin_manifests()
            .into_iter()
            .map(|m| {
                let mut instances: Vec<InstanceSummary> = cells
                    .values()
                    .filter(|c| c.record.adapter_type == m.adapter_type)
                    .map(|c| InstanceSummary {
                        id: c.record.id.clone(),
                        enabled: c.record.enabled,
                        state: c.status.state(),
                    })
                    .collect();
                instances.sort_by(|a, b| a.id.cmp(&b.id));
                CatalogEntry {
                    manifest: m,
                    instances,
                }
            })
            .collect()
    }

    /// Live status of one instance.
    pub async fn status(&self, id: &str) -> Option<AdapterStatus> {
        let cells = self.inner.cells.read().await;
        cells
            .get(id)
            .map(|c| c.status.snapshot(id, &c.runtime.manifest()))
    }

    /// Live status of every instance, ordered by id.
    pub async fn statuses(&self) -> Vec<AdapterStatus> {
        let cells = self.inner.cells.read().await;
        let mut out: Vec<AdapterStatus> = cells
            .iter()
            .map(|(id, c)| c.status.snapshot(id, &c.runtime.manifest()))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Persisted config records, ordered by id.
    pub fn records(&self) -> Result<Vec<AdapterConfigRecord>, AdapterError> {
        Ok(self.inner.configs.list()?)
    }

    /// Stop everything, drop live state, and re-load from the store.
    pub async fn reload(&self) -> Result<usize, AdapterError> {
        self.stop_all().await;
        self.inner.cells.write().await.clear();
        self.load_persisted().await
    }

    /// Stop every running instance (shutdown path).
    pub async fn stop_all(&self) {
        let mut cells = self.inner.cells.write().await;
        for (id, cell) in cells.iter_mut() {
            Self::stop_locked(&self.inner.engine, cell, id).await;
        }
    }

    /// Route raw webhook bytes to a webhook-capable instance.
    pub async fn handle_webhook(
        &self,
        id: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PublishReceipt, AdapterError> {
        let (runtime, status, enabled) = {
            let cells = self.inner.cells.read().await;
            let Some(cell) = cells.get(id) else {
                return Err(AdapterError::NotFound(id.to_string()));
            };
            (cell.runtime.clone(), cell.status.clone(), cell.record.enabled)
        };
        if !runtime.webhook_capable() || !enabled {
            return Err(AdapterError::NotFound(id.to_string()));
        }
        let ctx = AdapterContext {
            engine: self.inner.engine.clone(),
            instance_id: id.to_string(),
            status,
        };
        runtime.handle_inbound(&ctx, body, signature).await
    }

    // -- bindings ---------------------------------------------------------

    /// Persist a new binding. The target adapter must exist.
    pub async fn add_binding(&self, binding: Binding) -> Result<(), AdapterError> {
        if self.inner.configs.get(&binding.adapter_id)?.is_none() {
            return Err(AdapterError::NotFound(binding.adapter_id.clone()));
        }
        match self.inner.bindings.insert(&binding) {
            Ok(()) => Ok(()),
            Err(StoreError::DuplicateId(dup)) => Err(AdapterError::DuplicateId(dup)),
            Err(e) => Err(e.into()),
        }
    }

    /// All persisted bindings.
    pub fn list_bindings(&self) -> Result<Vec<Binding>, AdapterError> {
        Ok(self.inner.bindings.list()?)
    }

    /// Remove a binding and clean up its orphaned sessions.
    pub async fn remove_binding(&self, id: &str) -> Result<(), AdapterError> {
        if !self.inner.bindings.remove(id)? {
            return Err(AdapterError::NotFound(id.to_string()));
        }
        self.cleanup_sessions()?;
        Ok(())
    }

    /// The session router used by binding-aware adapters.
    pub fn sessions(&self) -> &SessionRouter {
        &self.inner.sessions
    }

    fn cleanup_sessions(&self) -> Result<(), AdapterError> {
        let active: HashSet<String> = self
            .inner
            .bindings
            .list()?
            .into_iter()
            .map(|b| b.id)
            .collect();
        let removed = self.inner.sessions.cleanup_orphaned_sessions(&active);
        if removed > 0 {
            info!(removed, "orphaned sessions cleaned up");
        }
        Ok(())
    }

    // -- lifecycle helpers (callers hold the cells write lock) ------------

    async fn start_locked(engine: &RelayEngine, cell: &mut Cell, id: &str) {
        let ctx = AdapterContext {
            engine: engine.clone(),
            instance_id: id.to_string(),
            status: cell.status.clone(),
        };
        match cell.runtime.start(&ctx).await {
            Ok(guards) => {
                cell.guards = guards;
            }
            Err(err) => {
                cell.status.record_error(&err.to_string());
                warn!(adapter = %id, error = %err, "adapter failed to start");
            }
        }
    }

    async fn stop_locked(engine: &RelayEngine, cell: &mut Cell, id: &str) {
        if cell.status.state() == AdapterState::Disconnected {
            return;
        }
        let ctx = AdapterContext {
            engine: engine.clone(),
            instance_id: id.to_string(),
            status: cell.status.clone(),
        };
        cell.guards.clear();
        cell.runtime.stop(&ctx).await;
    }
}
