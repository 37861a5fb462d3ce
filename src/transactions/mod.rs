// Module declarations
pub(crate) mod transactions_model;
pub(crate) mod transactions_repository;

// Re-export the public interface
pub use transactions_model::{NewTransaction, Transaction, TransactionDB, TransactionType};
pub use transactions_repository::TransactionRepository;
