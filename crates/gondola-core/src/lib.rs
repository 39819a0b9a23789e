#![forbid(unsafe_code)]

//! # gondola-core
//!
//! Shared primitives for the gondola update runtime: update and asset
//! identifiers, content hashing, and the base error type.
//!
//! Higher layers address stored payloads by [`UpdateId`] (server-assigned
//! UUID) and individual files by [`AssetKey`] (hex-encoded SHA-256 of the
//! file contents). The content hash doubles as the on-disk file name, so
//! a key is always derivable from bytes alone.

mod errors;
mod hash;
mod ids;

pub use errors::{CoreError, CoreResult};
pub use hash::Sha256Hash;
pub use ids::{AssetKey, UpdateId};
