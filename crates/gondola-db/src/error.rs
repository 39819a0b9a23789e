use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Core(#[from] gondola_core::CoreError),
    #[error("unknown update status discriminant: {0}")]
    InvalidStatus(i64),
    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),
    #[error("invalid stored url: {0}")]
    InvalidUrl(String),
    #[error("database worker stopped")]
    WorkerClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
