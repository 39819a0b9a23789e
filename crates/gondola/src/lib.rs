#![forbid(unsafe_code)]

//! # Gondola
//!
//! Embeddable over-the-air update runtime. A shipped app replaces its
//! bundled code-and-asset payload at runtime: the engine fetches signed
//! update manifests from a server, verifies and stores assets in a
//! content-addressed file store backed by a SQLite catalog, and decides
//! on every cold start which stored payload the host launches. The
//! payload embedded in the binary is the permanent fallback — the app
//! always launches *something*.
//!
//! ## Quick start
//!
//! ```ignore
//! use gondola::prelude::*;
//!
//! let config = UpdatesConfig::default()
//!     .with_update_url("https://u.example.com/manifest".parse()?)
//!     .with_scope_key("com.example.app".to_string())
//!     .with_runtime_version("1.0".to_string())
//!     .with_updates_dir(data_dir.join("updates"));
//!
//! let engine = UpdatesEngine::new(config, host_reloader);
//! engine.start().await?;
//!
//! // Host main thread, before creating the JS instance:
//! let bundle = engine.launch_asset_file();
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod assets {
    pub use gondola_assets::*;
}

pub mod core {
    pub use gondola_core::*;
}

pub mod db {
    pub use gondola_db::*;
}

pub mod events {
    pub use gondola_events::*;
}

pub mod net {
    pub use gondola_net::*;
}

// ── Engine ──────────────────────────────────────────────────────────────

mod config;
mod engine;
mod error;
mod launcher;
pub mod loader;
pub mod policy;
mod reaper;
mod recovery;
mod state;

pub use config::{CheckOnLaunch, Connectivity, UpdatesConfig};
pub use engine::{
    CheckForUpdateResult, FetchUpdateResult, HostReloader, NoopHostReloader, UpdatesEngine,
};
pub use error::{EngineError, EngineResult};
pub use launcher::{Launcher, EMBEDDED_BUNDLE_NAME};
pub use loader::{
    task::{LaunchOutcome, LoaderTask, LoaderTaskDelegate, RemoteCheckOutcome, RemoteUpdateStatus},
    LoaderCallbacks, LoaderResult, RemoteLoadStatus, RemoteLoader,
};
pub use reaper::run_reaper;
pub use recovery::{ErrorRecovery, RecoveryActions};
pub use state::{MachineState, StateEvent, UpdateStateMachine};

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use gondola_db::{UpdateEntity, UpdateStatus};
    pub use gondola_events::{Event, EventBus, StateChangeEventType, UpdateContext};

    pub use crate::{
        CheckForUpdateResult, CheckOnLaunch, EngineError, FetchUpdateResult, HostReloader,
        MachineState, UpdatesConfig, UpdatesEngine,
    };
}
