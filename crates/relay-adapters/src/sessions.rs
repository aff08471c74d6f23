// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session routing for adapter-to-agent bindings.
//!
//! Tracks which agent session serves which external chat, per binding.
//! When bindings disappear the orphaned sessions must be cleaned up so the
//! router stops targeting removed pairings.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

type SessionMap = HashMap<String, HashMap<String, Uuid>>;

/// Maps `(binding id, chat key)` pairs to agent session ids.
#[derive(Clone, Default)]
pub struct SessionRouter {
    inner: Arc<RwLock<SessionMap>>,
}

impl SessionRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `(binding_id, chat_key)`, creating one if the
    /// pair is new.
    pub fn ensure_session(&self, binding_id: &str, chat_key: &str) -> Uuid {
        let mut map = self.inner.write().expect("session map poisoned");
        *map.entry(binding_id.to_string())
            .or_default()
            .entry(chat_key.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    /// Look up an existing session without creating one.
    pub fn get(&self, binding_id: &str, chat_key: &str) -> Option<Uuid> {
        let map = self.inner.read().expect("session map poisoned");
        map.get(binding_id).and_then(|m| m.get(chat_key)).copied()
    }

    /// Number of live sessions across all bindings.
    pub fn session_count(&self) -> usize {
        let map = self.inner.read().expect("session map poisoned");
        map.values().map(HashMap::len).sum()
    }

    /// Drop sessions whose binding id is not in `active`. Returns how many
    /// sessions were removed.
    pub fn cleanup_orphaned_sessions(&self, active: &HashSet<String>) -> usize {
        let mut map = self.inner.write().expect("session map poisoned");
        let mut removed = 0;
        map.retain(|binding_id, sessions| {
            if active.contains(binding_id) {
                true
            } else {
                removed += sessions.len();
                false
            }
        });
        removed
    }
}
