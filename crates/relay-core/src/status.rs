// SPDX-License-Identifier: MIT OR Apache-2.0
//! Envelope status state machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an envelope in the message log.
///
/// The only legal transitions are `new → delivered`, `new → failed`, and
/// `new → dead_letter`; every terminal state is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Accepted and persisted; fan-out pending or in flight.
    New,
    /// At least one subscriber accepted the envelope.
    Delivered,
    /// Subscribers existed but none accepted the envelope.
    Failed,
    /// Rejected by the budget evaluator or recorded as undeliverable.
    DeadLetter,
}

impl MessageStatus {
    /// Returns `true` if this status represents a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::DeadLetter)
    }

    /// Returns the set of statuses that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [MessageStatus] {
        match self {
            Self::New => &[Self::Delivered, Self::Failed, Self::DeadLetter],
            Self::Delivered | Self::Failed | Self::DeadLetter => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Stable wire string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Parse the wire string back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "dead_letter" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
