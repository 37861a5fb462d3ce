// Module declarations
pub(crate) mod loans_errors;
pub(crate) mod loans_model;
pub(crate) mod loans_repository;

// Re-export the public interface
pub use loans_model::{Loan, LoanDB, LoanEvent, LoanStatus, NewLoan};
pub use loans_repository::LoanRepository;

// Re-export error types for convenience
pub use loans_errors::{LoanError, Result};
