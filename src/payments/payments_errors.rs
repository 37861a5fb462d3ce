use diesel::result::Error as DieselError;
use thiserror::Error;

use crate::accounts::AccountError;
use crate::loans::LoanError;

/// Custom error type for payment-related operations
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Loan error: {0}")]
    Loan(#[from] LoanError),
}

impl From<DieselError> for PaymentError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => PaymentError::NotFound("Record not found".to_string()),
            _ => PaymentError::DatabaseError(err.to_string()),
        }
    }
}

/// Result type for payment operations
pub type Result<T> = std::result::Result<T, PaymentError>;
