#![forbid(unsafe_code)]

//! # gondola-db
//!
//! SQLite-backed catalog of stored updates and their assets.
//!
//! ## Schema
//!
//! - `updates`: one row per known update (manifest, status, launch
//!   counters).
//! - `assets`: one row per content-addressed file, shared across updates.
//! - `updates_assets`: many-to-many link; exactly one row per update has
//!   `is_launch_asset = 1`.
//! - `json_data`: scoped key/value storage (server-defined headers,
//!   manifest filters, extra params, build fingerprint).
//!
//! ## Access model
//!
//! The `rusqlite::Connection` is not safe for concurrent mutation, so it
//! is confined to one dedicated thread: [`DatabaseHandle`] accepts
//! closures over a channel and returns their results on a oneshot. There
//! is no shared handle to lease or leak; every exit path releases the
//! "database" simply by returning from the closure.

mod actor;
mod build_data;
mod catalog;
mod entities;
mod error;

pub use actor::DatabaseHandle;
pub use build_data::BuildData;
pub use catalog::{keys, Catalog, DB_FILE_NAME};
pub use entities::{AssetEntity, UpdateEntity, UpdateStatus};
pub use error::{DbError, DbResult};
