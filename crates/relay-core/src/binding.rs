// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter-to-agent binding records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How chat sessions map onto an agent for a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStrategy {
    /// One agent session per external chat.
    PerChat,
    /// A single shared session for the whole channel.
    Shared,
}

/// Persisted pairing of an adapter instance with an agent context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Binding {
    /// Binding id, unique in the binding store.
    pub id: String,
    /// Adapter instance this binding routes from.
    pub adapter_id: String,
    /// Target agent identifier.
    pub agent_id: String,
    /// Working directory the agent runs in.
    pub agent_dir: String,
    /// Session mapping strategy.
    pub session_strategy: SessionStrategy,
    /// Human-readable label.
    pub label: String,
}
