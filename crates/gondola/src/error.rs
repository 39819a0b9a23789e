use gondola_assets::AssetsError;
use gondola_db::DbError;
use gondola_net::{NetError, ProtocolError};
use thiserror::Error;

/// Error taxonomy of the update engine.
///
/// Only `ConfigInvalid` is fatal at startup. Directory and database
/// failures degrade to an emergency launch of the embedded payload;
/// network and integrity failures are reported through callbacks and
/// state snapshots and never take down a running app.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("updates directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("network failure: {0}")]
    Network(#[from] NetError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("asset store error: {0}")]
    Assets(AssetsError),
    #[error("catalog error: {0}")]
    Database(#[from] DbError),
    #[error("manifest runtime version {got:?} does not match binary {expected:?}")]
    RuntimeVersionMismatch { expected: String, got: String },
    #[error("no launchable update available")]
    NoLaunchableUpdate,
    #[error("engine not started")]
    NotStarted,
    #[error("launch failure: {0}")]
    LaunchFailure(String),
    #[error("host bridge failure: {0}")]
    HostBridge(String),
}

impl From<AssetsError> for EngineError {
    fn from(e: AssetsError) -> Self {
        match e {
            AssetsError::DirectoryUnavailable(msg) => Self::DirectoryUnavailable(msg),
            other => Self::Assets(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
