// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter manifests, config records, and live status types.
//!
//! A manifest describes an adapter *type* as data: its config-field schema,
//! category, instance policy, and the subject patterns it bridges. Config
//! records are the persisted per-instance state; status is live only.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Catalog grouping for an adapter type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdapterCategory {
    /// Chat-style external channels (Telegram, …).
    Messaging,
    /// Machine-to-machine channels (webhooks, …).
    Automation,
    /// Channels internal to the host process.
    Internal,
    /// User-defined types.
    Custom,
}

/// Input widget / value type of a single config field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Single-line text.
    Text,
    /// Masked secret.
    Password,
    /// URL, validated for scheme.
    Url,
    /// Numeric value.
    Number,
    /// True/false toggle.
    Boolean,
    /// One value out of `options`.
    Select,
    /// Multi-line text.
    Textarea,
}

/// Conditional visibility: the field only applies when another field holds a
/// given value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ShowWhen {
    /// Key of the controlling field.
    pub key: String,
    /// Value the controlling field must hold.
    pub equals: serde_json::Value,
}

/// One declared config field of an adapter type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigField {
    /// Config map key.
    pub key: String,
    /// Value type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present (when visible).
    pub required: bool,
    /// Default value applied when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Conditional visibility rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_when: Option<ShowWhen>,
    /// Allowed values for `select` fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ConfigField {
    /// A required field of the given type with no extras.
    pub fn required(key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            field_type,
            required: true,
            default: None,
            show_when: None,
            options: Vec::new(),
        }
    }

    /// An optional field of the given type with no extras.
    pub fn optional(key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(key, field_type)
        }
    }
}

/// Subject patterns an adapter type bridges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubjectSpec {
    /// Pattern external input is published under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<String>,
    /// Pattern the adapter subscribes to for outbound sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<String>,
}

/// Static description of an adapter type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdapterManifest {
    /// Type identifier (e.g. `"telegram"`).
    #[serde(rename = "type")]
    pub adapter_type: String,
    /// Human-readable name.
    pub display_name: String,
    /// Catalog grouping.
    pub category: AdapterCategory,
    /// Ships with the kernel; cannot be removed.
    pub builtin: bool,
    /// Whether more than one configured instance is allowed.
    pub multi_instance: bool,
    /// Declared config fields.
    pub config_fields: Vec<ConfigField>,
    /// Subject patterns this type bridges.
    #[serde(default)]
    pub subjects: SubjectSpec,
}

// ---------------------------------------------------------------------------
// Persisted instance record
// ---------------------------------------------------------------------------

/// Persisted configuration of one adapter instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdapterConfigRecord {
    /// Instance id, unique across the registry.
    pub id: String,
    /// Manifest type this instance belongs to.
    #[serde(rename = "type")]
    pub adapter_type: String,
    /// Whether the instance should be running.
    pub enabled: bool,
    /// Opaque config map, validated against the type's field schema.
    pub config: serde_json::Value,
    /// Last modification instant.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Live status
// ---------------------------------------------------------------------------

/// Lifecycle state of a running (or stopped) adapter instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// Configured but not running.
    Disconnected,
    /// Start requested, not yet connected.
    Starting,
    /// Running and healthy.
    Connected,
    /// Running but the last operation failed.
    Error,
    /// Stop requested, not yet stopped.
    Stopping,
}

/// Inbound/outbound envelope counters for one adapter instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MessageCounts {
    /// Envelopes published into the bus from the external channel.
    pub inbound: u64,
    /// Envelopes forwarded out to the external channel.
    pub outbound: u64,
}

/// Live status snapshot for one adapter instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdapterStatus {
    /// Instance id.
    pub id: String,
    /// Manifest type.
    #[serde(rename = "type")]
    pub adapter_type: String,
    /// Human-readable name from the manifest.
    pub display_name: String,
    /// Current lifecycle state.
    pub state: AdapterState,
    /// Envelope counters.
    pub message_count: MessageCounts,
    /// Number of runtime errors since start.
    pub error_count: u64,
    /// Most recent error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
