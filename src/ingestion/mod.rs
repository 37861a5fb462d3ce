// Module declarations
pub(crate) mod ingestion_errors;
pub(crate) mod ingestion_model;
pub(crate) mod ingestion_repository;
pub(crate) mod ingestion_service;

// Re-export the public interface
pub use ingestion_errors::{IngestError, Result};
pub use ingestion_model::{ExternalPaymentEvent, IngestOutcome, NewExternalPaymentEvent};
pub use ingestion_repository::EventRepository;
pub use ingestion_service::IngestService;
