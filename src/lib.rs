// SPDX-License-Identifier: MIT OR Apache-2.0
//! Facade crate re-exporting the Relay workspace.
//!
//! Downstream consumers that want the whole bus can depend on this single
//! crate; the individual `relay-*` crates remain usable on their own.
#![deny(unsafe_code)]

pub use relay_adapters;
pub use relay_bus;
pub use relay_config;
pub use relay_core;
pub use relay_daemon;
pub use relay_engine;
pub use relay_error;
pub use relay_store;
pub use relay_subject;
