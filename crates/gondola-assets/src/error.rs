use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("updates directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("embedded manifest error: {0}")]
    EmbeddedManifest(#[from] serde_json::Error),
}

pub type AssetsResult<T> = Result<T, AssetsError>;
