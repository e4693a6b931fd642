use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("failed to deserialize filters")]
    DeserializeFiltersError,
    #[error("database unavailable")]
    DatabaseUnavailable,
    #[error("Database error: {0}")]
    DatabaseError(String),
    /// Timeout error with optional type classification, e.g. `"pool_timeout"`.
    #[error("Timed out while fetching data")]
    TimeoutError(Option<String>),
    #[error("Failed to parse cohort filters")]
    CohortFiltersParsingError,
    #[error("Invalid cohort reference: {0}")]
    InvalidCohortReference(String),
}

impl FlagError {
    /// Returns a short error code, used as a metric label.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlagError::Internal(_) => "internal_error",
            FlagError::DeserializeFiltersError => "deserialize_filters_error",
            FlagError::DatabaseUnavailable => "database_unavailable",
            FlagError::DatabaseError(_) => "database_error",
            FlagError::TimeoutError(_) => "timeout",
            FlagError::CohortFiltersParsingError => "cohort_filters_parsing_error",
            FlagError::InvalidCohortReference(_) => "invalid_cohort_reference",
        }
    }
}

impl From<sqlx::Error> for FlagError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => FlagError::TimeoutError(Some("pool_timeout".into())),
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => FlagError::DatabaseUnavailable,
            other => FlagError::DatabaseError(other.to_string()),
        }
    }
}
