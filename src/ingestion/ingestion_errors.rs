use diesel::result::Error as DieselError;
use thiserror::Error;

use crate::accounts::AccountError;
use crate::payments::PaymentError;

/// Custom error type for payment event ingestion
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<DieselError> for IngestError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => IngestError::NotFound("Record not found".to_string()),
            _ => IngestError::DatabaseError(err.to_string()),
        }
    }
}

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;
