// Module declarations
pub(crate) mod payments_errors;
pub(crate) mod payments_model;
pub(crate) mod payments_repository;
pub(crate) mod payments_service;

// Re-export the public interface
pub use payments_errors::{PaymentError, Result};
pub use payments_model::{
    LoanPaymentOutcome, ManualPaymentInput, NewPayment, Payment, PaymentMethod, PaymentStatus,
    WaterfallOutcome,
};
pub use payments_repository::PaymentRepository;
pub use payments_service::PaymentService;
