//! Error taxonomy for the Relay bus.
//!
//! Everything that can go wrong on a Relay surface carries an [`ErrorCode`]:
//! a short machine-stable tag the HTTP edge translates into a status code.
//! The tags are wire contract; renaming one is a breaking change even if no
//! Rust type moves. [`RelayError`] pairs a code with a human-readable
//! message, structured detail for diagnostics, and an optional cause for
//! `std::error::Error` chaining; [`WireError`] is its JSON-safe projection.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Subsystem family an [`ErrorCode`] originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Subject grammar / pattern errors.
    Subject,
    /// Message log and status-transition errors.
    Message,
    /// Endpoint registry errors.
    Endpoint,
    /// Delivery engine errors.
    Delivery,
    /// Adapter catalog and lifecycle errors.
    Adapter,
    /// Binding store errors.
    Binding,
    /// Configuration errors.
    Config,
    /// Durable storage errors.
    Storage,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Subject => "subject",
            Self::Message => "message",
            Self::Endpoint => "endpoint",
            Self::Delivery => "delivery",
            Self::Adapter => "adapter",
            Self::Binding => "binding",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Stable machine-readable tag for one failure kind.
///
/// Serialises as the `SCREAMING_SNAKE_CASE` string returned by
/// [`ErrorCode::as_str`]; clients switch on that string, never on HTTP
/// status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Subject --
    /// Subject or pattern failed grammar validation.
    InvalidSubject,

    // -- Message --
    /// A status transition out of a terminal state was attempted.
    InvalidTransition,
    /// An envelope id collided with an existing one.
    DuplicateId,

    // -- Endpoint --
    /// The subject is already registered to a different owner.
    DuplicateEndpoint,

    // -- Delivery --
    /// Fan-out reached subscribers but none accepted the envelope.
    PublishFailed,

    // -- Adapter --
    /// The adapter type is not in the catalog.
    UnknownType,
    /// The manifest forbids a second instance of this type.
    MultiInstanceDenied,
    /// Built-in adapters cannot be removed.
    RemoveBuiltinDenied,
    /// The supplied config does not satisfy the type's field schema.
    ConfigInvalid,

    // -- Binding / generic lookup --
    /// The requested resource (endpoint, adapter, message, binding) is absent.
    NotFound,
    /// Another subsystem holds a conflicting session lock.
    SessionLocked,

    // -- Storage --
    /// The durable store reported an error.
    StorageError,

    // -- Config / gate --
    /// The Relay feature gate is disabled.
    FeatureDisabled,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// The subsystem family this code originates from.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidSubject => ErrorCategory::Subject,
            Self::InvalidTransition | Self::DuplicateId => ErrorCategory::Message,
            Self::DuplicateEndpoint => ErrorCategory::Endpoint,
            Self::PublishFailed => ErrorCategory::Delivery,
            Self::UnknownType
            | Self::MultiInstanceDenied
            | Self::RemoveBuiltinDenied
            | Self::ConfigInvalid => ErrorCategory::Adapter,
            Self::NotFound | Self::SessionLocked => ErrorCategory::Binding,
            Self::StorageError => ErrorCategory::Storage,
            Self::FeatureDisabled => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// The wire tag (e.g. `"INVALID_SUBJECT"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSubject => "INVALID_SUBJECT",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::DuplicateId => "DUPLICATE_ID",
            Self::DuplicateEndpoint => "DUPLICATE_ENDPOINT",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::MultiInstanceDenied => "MULTI_INSTANCE_DENIED",
            Self::RemoveBuiltinDenied => "REMOVE_BUILTIN_DENIED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::NotFound => "NOT_FOUND",
            Self::SessionLocked => "SESSION_LOCKED",
            Self::StorageError => "STORAGE_ERROR",
            Self::FeatureDisabled => "FEATURE_DISABLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Wrap this code with a message, producing a [`RelayError`].
    ///
    /// This is the only way to construct one; every error starts from its
    /// code, which keeps call sites honest about the wire contract.
    pub fn with_message(self, message: impl Into<String>) -> RelayError {
        RelayError {
            code: self,
            message: message.into(),
            detail: Map::new(),
            cause: None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RelayError
// ---------------------------------------------------------------------------

/// A coded Relay error.
///
/// Fields are private; errors are built fluently from their code and read
/// back through accessors, so the code/message pairing can never drift
/// after construction. The cause is reference-counted, which keeps the
/// whole error cheap to clone across task boundaries.
///
/// ```
/// use relay_error::ErrorCode;
///
/// let err = ErrorCode::NotFound
///     .with_message("no adapter with that id")
///     .note("adapter_id", "tg-main");
/// assert_eq!(err.code(), ErrorCode::NotFound);
/// assert!(err.to_string().starts_with("NOT_FOUND: no adapter"));
/// ```
#[derive(Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
    detail: Map<String, Value>,
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl RelayError {
    /// The stable code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured diagnostic detail attached via [`RelayError::note`].
    pub fn detail(&self) -> &Map<String, Value> {
        &self.detail
    }

    /// Shorthand for `self.code().category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Attach one structured detail entry.
    ///
    /// A value that cannot be serialised is recorded as explanatory text
    /// under the same key; diagnostics never silently vanish.
    pub fn note(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let rendered = serde_json::to_value(&value)
            .unwrap_or_else(|e| Value::String(format!("<unserializable: {e}>")));
        self.detail.insert(key.into(), rendered);
        self
    }

    /// Attach the underlying cause.
    pub fn caused_by(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Project into the JSON-safe wire form. The opaque cause survives only
    /// as its rendered text.
    pub fn to_wire(&self) -> WireError {
        WireError {
            code: self.code,
            message: self.message.clone(),
            detail: self.detail.clone(),
            cause: self.cause.as_ref().map(|c| c.to_string()),
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)?;
        if !self.detail.is_empty() {
            f.write_str(" (")?;
            for (i, (key, value)) in self.detail.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Single line: the Display form plus the cause chain, if any.
        write!(f, "RelayError({self}")?;
        if let Some(cause) = &self.cause {
            write!(f, ", cause: {cause}")?;
        }
        f.write_str(")")
    }
}

impl StdError for RelayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|c| &**c as &(dyn StdError + 'static))
    }
}

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// JSON projection of a [`RelayError`].
///
/// Empty detail and absent cause are omitted from the serialised form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable code tag.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured diagnostic detail.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
    /// Rendered text of the original cause, if there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl WireError {
    /// Rebuild a [`RelayError`] from the wire form.
    ///
    /// The original cause object does not cross the wire; only its text in
    /// [`WireError::cause`] describes it.
    pub fn into_error(self) -> RelayError {
        RelayError {
            code: self.code,
            message: self.message,
            detail: self.detail,
            cause: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
