// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the Relay bus.
//!
//! This crate provides [`RelayConfig`] — the kernel's runtime settings —
//! together with helpers for loading from TOML files, applying environment
//! overrides, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The handler budget is large enough to stall fan-out noticeably.
    LargeHandlerBudget {
        /// Configured budget in milliseconds.
        ms: u64,
    },
    /// Trace retention is zero; spans are pruned on the first sweep.
    ZeroTraceRetention,
    /// The SSE queue is small enough to drop events under modest load.
    SmallSseQueue {
        /// Configured capacity.
        capacity: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeHandlerBudget { ms } => {
                write!(f, "handler budget of {ms} ms will stall fan-out")
            }
            ConfigWarning::ZeroTraceRetention => {
                write!(f, "trace retention of 0 days prunes spans immediately")
            }
            ConfigWarning::SmallSseQueue { capacity } => {
                write!(f, "sse queue capacity {capacity} will drop events under load")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Handler budget above this threshold generates a warning.
const LARGE_HANDLER_BUDGET_MS: u64 = 5_000;

/// SSE queues below this capacity generate a warning.
const SMALL_SSE_QUEUE: usize = 8;

fn default_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1:8790".into()
}

fn default_storage_path() -> String {
    ".relay/relay.db".into()
}

fn default_trace_retention_days() -> u32 {
    7
}

fn default_handler_budget_ms() -> u64 {
    250
}

fn default_sse_keepalive_secs() -> u64 {
    15
}

fn default_sse_queue_capacity() -> usize {
    256
}

// ---------------------------------------------------------------------------
// Config type
// ---------------------------------------------------------------------------

/// Runtime configuration for the Relay kernel.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Feature gate. When `false` the HTTP edge answers 503 for every route.
    pub enabled: bool,

    /// Bind address for the HTTP edge.
    pub bind: String,

    /// Path of the SQLite database file.
    pub storage_path: String,

    /// Days to retain trace spans before the hourly pruner removes them.
    pub trace_retention_days: u32,

    /// Per-subscriber handler deadline in milliseconds; exceeding it drops
    /// the delivery for that subscriber and raises a backpressure signal.
    pub handler_budget_ms: u64,

    /// Seconds between SSE keepalive comments.
    pub sse_keepalive_secs: u64,

    /// Bounded per-connection SSE outbound queue capacity.
    pub sse_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind: default_bind(),
            storage_path: default_storage_path(),
            trace_retention_days: default_trace_retention_days(),
            handler_budget_ms: default_handler_budget_ms(),
            sse_keepalive_secs: default_sse_keepalive_secs(),
            sse_queue_capacity: default_sse_queue_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`RelayConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, starts from [`RelayConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => RelayConfig::default(),
    };
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Parse a TOML string into a [`RelayConfig`].
pub fn parse_toml(content: &str) -> Result<RelayConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply `RELAY_*` environment variable overrides to `config`.
///
/// Unparseable values are ignored; the file/default value stays in place.
pub fn apply_env_overrides(config: &mut RelayConfig) {
    if let Ok(v) = std::env::var("RELAY_ENABLED") {
        match v.as_str() {
            "1" | "true" | "yes" => config.enabled = true,
            "0" | "false" | "no" => config.enabled = false,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("RELAY_BIND") {
        config.bind = v;
    }
    if let Ok(v) = std::env::var("RELAY_STORAGE_PATH") {
        config.storage_path = v;
    }
    if let Ok(v) = std::env::var("RELAY_TRACE_RETENTION_DAYS")
        && let Ok(days) = v.parse()
    {
        config.trace_retention_days = days;
    }
    if let Ok(v) = std::env::var("RELAY_HANDLER_BUDGET_MS")
        && let Ok(ms) = v.parse()
    {
        config.handler_budget_ms = ms;
    }
}

/// Validate semantic constraints that TOML parsing cannot express.
pub fn validate(config: &RelayConfig) -> Result<(), ConfigError> {
    let mut reasons = Vec::new();
    if config.bind.is_empty() {
        reasons.push("bind must not be empty".to_string());
    }
    if config.storage_path.is_empty() {
        reasons.push("storage_path must not be empty".to_string());
    }
    if config.handler_budget_ms == 0 {
        reasons.push("handler_budget_ms must be at least 1".to_string());
    }
    if config.sse_queue_capacity == 0 {
        reasons.push("sse_queue_capacity must be at least 1".to_string());
    }
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons })
    }
}

/// Collect advisory warnings for suspicious but legal settings.
pub fn warnings(config: &RelayConfig) -> Vec<ConfigWarning> {
    let mut out = Vec::new();
    if config.handler_budget_ms > LARGE_HANDLER_BUDGET_MS {
        out.push(ConfigWarning::LargeHandlerBudget {
            ms: config.handler_budget_ms,
        });
    }
    if config.trace_retention_days == 0 {
        out.push(ConfigWarning::ZeroTraceRetention);
    }
    if config.sse_queue_capacity < SMALL_SSE_QUEUE {
        out.push(ConfigWarning::SmallSseQueue {
            capacity: config.sse_queue_capacity,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let c = RelayConfig::default();
        assert!(c.enabled);
        assert_eq!(c.trace_retention_days, 7);
        assert_eq!(c.handler_budget_ms, 250);
        assert_eq!(c.sse_keepalive_secs, 15);
        assert!(validate(&c).is_ok());
        assert!(warnings(&c).is_empty());
    }

    #[test]
    fn parse_full_toml() {
        let c = parse_toml(
            r#"
            enabled = false
            bind = "0.0.0.0:9000"
            storage_path = "/var/lib/relay/relay.db"
            trace_retention_days = 30
            handler_budget_ms = 100
            "#,
        )
        .unwrap();
        assert!(!c.enabled);
        assert_eq!(c.bind, "0.0.0.0:9000");
        assert_eq!(c.trace_retention_days, 30);
        assert_eq!(c.handler_budget_ms, 100);
        // Unspecified fields fall back to defaults.
        assert_eq!(c.sse_keepalive_secs, 15);
    }

    #[test]
    fn parse_rejects_bad_toml() {
        assert!(matches!(
            parse_toml("enabled = ["),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Some(Path::new("/nonexistent/relay.toml"))).unwrap_err();
        match err {
            ConfigError::FileNotFound { path } => assert!(path.contains("relay.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "trace_retention_days = 14").unwrap();
        let c = load_config(Some(f.path())).unwrap();
        assert_eq!(c.trace_retention_days, 14);
    }

    #[test]
    fn validation_catches_zero_budget() {
        let c = RelayConfig {
            handler_budget_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            validate(&c),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn warnings_for_suspicious_values() {
        let c = RelayConfig {
            handler_budget_ms: 60_000,
            trace_retention_days: 0,
            sse_queue_capacity: 2,
            ..Default::default()
        };
        let w = warnings(&c);
        assert_eq!(w.len(), 3);
        assert!(w.iter().any(|w| matches!(w, ConfigWarning::ZeroTraceRetention)));
    }
}
