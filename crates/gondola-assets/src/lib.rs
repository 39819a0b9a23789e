#![forbid(unsafe_code)]

//! # gondola-assets
//!
//! Content-addressed asset storage for the gondola update runtime.
//!
//! ## Disk mapping (normative)
//!
//! Every stored file lives at `<updates_dir>/.expo-internal/<hex sha256>`.
//! The file name *is* the digest of the contents, so:
//! - a file that exists and matches its name needs no re-download,
//! - two updates referencing the same asset share one file,
//! - a partially written file can never shadow a good one (writes go
//!   through a temp file and an atomic rename).
//!
//! The store never tracks which update owns a file; that relation lives
//! in the catalog. Deletion is driven by the reaper after the catalog
//! rows are gone.

mod embedded;
mod error;
mod store;

pub use embedded::EmbeddedAssets;
pub use error::{AssetsError, AssetsResult};
pub use store::{FileStore, ASSETS_DIR_NAME};
