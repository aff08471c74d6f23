// SPDX-License-Identifier: MIT OR Apache-2.0
//! External channel adapters for the Relay bus.
//!
//! The adapter manager persists per-instance configs, validates them
//! against each type's manifest, drives start/stop lifecycles, and exposes
//! live status. Adapters are both producers (external input → publish) and
//! subscribers (outbound subject → external channel).
#![deny(unsafe_code)]

/// The adapter manager: catalog, lifecycle, status, bindings.
pub mod manager;
/// Built-in manifests and config validation.
pub mod manifest;
/// Adapter runtimes (tagged variant over the capability set).
pub mod runtime;
/// Session routing for bindings.
pub mod sessions;
/// HMAC-SHA256 webhook signing.
pub mod signing;

pub use manager::{AdapterManager, CatalogEntry, InstanceSummary, TestOutcome};
pub use runtime::{AdapterContext, AdapterRuntime};
pub use sessions::SessionRouter;

use relay_core::adapter::{AdapterManifest, AdapterState, AdapterStatus, MessageCounts};
use relay_error::ErrorCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the adapter manager and runtimes.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// An instance with this id already exists.
    #[error("adapter id '{0}' already exists")]
    DuplicateId(String),

    /// The type is not in the catalog.
    #[error("unknown adapter type '{0}'")]
    UnknownType(String),

    /// The manifest forbids a second instance of this type.
    #[error("adapter type '{0}' does not allow multiple instances")]
    MultiInstanceDenied(String),

    /// No such instance (or binding).
    #[error("adapter '{0}' not found")]
    NotFound(String),

    /// Built-in single-instance adapters cannot be removed.
    #[error("built-in adapter '{0}' cannot be removed")]
    RemoveBuiltinDenied(String),

    /// The config does not satisfy the type's field schema.
    #[error("invalid adapter config: {reasons:?}")]
    ConfigInvalid {
        /// Individual validation failures.
        reasons: Vec<String>,
    },

    /// Webhook signature missing or mismatched.
    #[error("signature verification failed")]
    Unauthorized,

    /// The durable store failed.
    #[error("storage: {0}")]
    Storage(#[from] relay_store::StoreError),

    /// An inbound publish failed at the engine boundary.
    #[error("publish: {0}")]
    Publish(#[from] relay_engine::PublishError),
}

impl AdapterError {
    /// Stable error code for the HTTP edge.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateId(_) => ErrorCode::DuplicateId,
            Self::UnknownType(_) => ErrorCode::UnknownType,
            Self::MultiInstanceDenied(_) => ErrorCode::MultiInstanceDenied,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::RemoveBuiltinDenied(_) => ErrorCode::RemoveBuiltinDenied,
            Self::ConfigInvalid { .. } => ErrorCode::ConfigInvalid,
            Self::Storage(_) => ErrorCode::StorageError,
            Self::Publish(relay_engine::PublishError::InvalidSubject(_)) => {
                ErrorCode::InvalidSubject
            }
            Self::Publish(_) => ErrorCode::PublishFailed,
            // 401 is decided by the edge before this mapping applies.
            Self::Unauthorized => ErrorCode::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Live status cell
// ---------------------------------------------------------------------------

/// Shared live-status state for one adapter instance.
///
/// The manager owns the cell; runtimes update it through an `Arc`.
#[derive(Debug)]
pub struct StatusCell {
    state: RwLock<AdapterState>,
    inbound: AtomicU64,
    outbound: AtomicU64,
    error_count: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self {
            state: RwLock::new(AdapterState::Disconnected),
            inbound: AtomicU64::new(0),
            outbound: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }
}

impl StatusCell {
    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        *self.state.read().expect("status cell poisoned")
    }

    /// Transition the lifecycle state.
    pub fn set_state(&self, state: AdapterState) {
        *self.state.write().expect("status cell poisoned") = state;
    }

    /// Count one inbound envelope.
    pub fn record_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one outbound envelope.
    pub fn record_outbound(&self) {
        self.outbound.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a runtime error: bump the counter, remember the message, and
    /// move the adapter to the error state.
    pub fn record_error(&self, message: &str) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().expect("status cell poisoned") = Some(message.to_string());
        self.set_state(AdapterState::Error);
    }

    /// Build the wire status snapshot.
    pub fn snapshot(&self, id: &str, manifest: &AdapterManifest) -> AdapterStatus {
        AdapterStatus {
            id: id.to_string(),
            adapter_type: manifest.adapter_type.clone(),
            display_name: manifest.display_name.clone(),
            state: self.state(),
            message_count: MessageCounts {
                inbound: self.inbound.load(Ordering::Relaxed),
                outbound: self.outbound.load(Ordering::Relaxed),
            },
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error: self.last_error.lock().expect("status cell poisoned").clone(),
        }
    }
}
