// Module declarations
pub(crate) mod scheduler_service;

// Re-export the public interface
pub use scheduler_service::{AgingStats, SchedulerService, SweepStats};
