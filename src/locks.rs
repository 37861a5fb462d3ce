use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Registry of per-borrower mutexes.
///
/// Every ledger-mutating operation for a borrower (webhook ingestion, manual
/// confirmation, scheduler auto-debit) must hold the borrower's lock for the
/// duration of its database transaction, so concurrent payments cannot
/// interleave their balance reads and writes.
#[derive(Debug, Default)]
pub struct BorrowerLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BorrowerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock handle for a borrower, creating it on first use.
    pub fn for_borrower(&self, borrower_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(borrower_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Acquires a borrower lock, recovering from poisoning since the guarded
/// section holds no in-memory state worth invalidating.
pub fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_borrower_returns_same_lock() {
        let locks = BorrowerLocks::new();
        let a = locks.for_borrower("cust-1");
        let b = locks.for_borrower("cust-1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_borrowers_do_not_share_a_lock() {
        let locks = BorrowerLocks::new();
        let a = locks.for_borrower("cust-1");
        let b = locks.for_borrower("cust-2");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
