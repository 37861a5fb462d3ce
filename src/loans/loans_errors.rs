use diesel::result::Error as DieselError;
use thiserror::Error;

/// Custom error type for loan-related operations
#[derive(Debug, Error)]
pub enum LoanError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl From<DieselError> for LoanError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => LoanError::NotFound("Record not found".to_string()),
            _ => LoanError::DatabaseError(err.to_string()),
        }
    }
}

/// Result type for loan operations
pub type Result<T> = std::result::Result<T, LoanError>;
