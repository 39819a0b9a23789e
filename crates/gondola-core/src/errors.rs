use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hex digest: {0}")]
    InvalidDigest(String),
    #[error("invalid update id: {0}")]
    InvalidUpdateId(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
