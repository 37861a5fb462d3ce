pub mod db;

pub mod accounts;
pub mod allocation;
pub mod arrears;
pub mod ingestion;
pub mod loans;
pub mod payments;
pub mod scheduler;
pub mod transactions;

pub mod clock;
pub mod constants;
pub mod errors;
pub mod locks;
pub mod notifications;
pub mod schema;
pub mod settings;

pub use errors::{Error, Result};
pub use payments::*;
pub use allocation::*;
