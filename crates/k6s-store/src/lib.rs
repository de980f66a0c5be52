//! Project-local single-writer SQLite store.
//!
//! The [`Store`] exclusively owns the database handle. Every subsystem is
//! parameterized by a reference to it and holds no persistent state of its
//! own; all cross-subsystem references are by ID.

pub mod database;
pub mod error;
pub mod identifiers;
pub mod migrations;
pub mod models;
pub mod row;

pub use database::Store;
pub use error::StoreError;
pub use row::{RowMap, RowValues, SqlValue};
