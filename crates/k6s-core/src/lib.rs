//! Shared types for the Khoregos governance engine.
//!
//! Everything here is dependency-light: identifier newtypes, the audit
//! event taxonomy, timestamp helpers, and the governance configuration
//! records consumed from a session's `config_snapshot`.

pub mod config;
pub mod events;
pub mod ids;
pub mod time;
