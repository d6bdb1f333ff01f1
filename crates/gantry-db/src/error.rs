//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for gantry_core::Error {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => gantry_core::Error::NotFound(what),
            other => gantry_core::Error::Internal(other.to_string()),
        }
    }
}
