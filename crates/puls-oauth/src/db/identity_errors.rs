use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Maps unique-constraint violations to [`StoreError::Conflict`].
    pub(crate) fn from_insert(error: sqlx::Error, conflict_message: &str) -> Self {
        if let Some(db_err) = error.as_database_error()
            && db_err.is_unique_violation()
        {
            return Self::Conflict(conflict_message.to_string());
        }
        Self::Database(error)
    }
}
