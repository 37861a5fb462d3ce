// Module declarations
pub(crate) mod arrears_model;
pub(crate) mod arrears_repository;

// Re-export the public interface
pub use arrears_model::{Arrear, ArrearDB, ArrearStatus, NewArrear};
pub use arrears_repository::ArrearRepository;
