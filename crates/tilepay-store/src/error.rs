//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    #[error("corrupt {field} in row: {reason}")]
    Corrupt { field: &'static str, reason: String },
}

impl StoreError {
    pub(crate) fn poisoned<T>(e: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned(e.to_string())
    }

    pub(crate) fn corrupt(field: &'static str, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            field,
            reason: reason.to_string(),
        }
    }
}
