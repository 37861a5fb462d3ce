// Module declarations
pub(crate) mod allocation_engine;

// Re-export the public interface
pub use allocation_engine::{allocate, AllocationOutcome, LoanAllocation};
