use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule definition broke one or more rules. Every violated rule
    /// is listed, not just the first.
    #[error("Invalid schedule: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    /// No schedule or execution with the given ID exists.
    #[error("Not found: {id}")]
    NotFound { id: String },

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] cadence_core::CadenceError),
}

impl SchedulerError {
    pub fn validation(violations: Vec<String>) -> Self {
        SchedulerError::Validation { violations }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        SchedulerError::NotFound { id: id.into() }
    }

    /// Short error code string for API callers.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Validation { .. } => "VALIDATION_ERROR",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::Config(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
