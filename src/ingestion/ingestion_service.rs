use diesel::Connection;
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::ingestion_errors::{IngestError, Result};
use super::ingestion_model::{ExternalPaymentEvent, IngestOutcome, NewExternalPaymentEvent};
use super::ingestion_repository::EventRepository;
use crate::accounts::{Account, AccountService};
use crate::allocation::AllocationOutcome;
use crate::clock::Clock;
use crate::constants::SIMULATION_CODE_PREFIX;
use crate::db::{get_connection, DbPool};
use crate::locks::{acquire, BorrowerLocks};
use crate::notifications::{dispatch, Notifier};
use crate::payments::{PaymentMethod, PaymentService};
use crate::settings::Settings;

/// Service ingesting mobile-money payment events.
///
/// At-most-once application rests on two layers: the unique provider
/// transaction code at the storage level, and a processed re-check inside
/// the apply transaction while the borrower lock is held. A retried webhook
/// gets `AlreadyProcessed` back and the ledger stays untouched.
pub struct IngestService {
    pool: Arc<DbPool>,
    repository: EventRepository,
    account_service: Arc<AccountService>,
    payment_service: Arc<PaymentService>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: Arc<BorrowerLocks>,
    settings: Settings,
}

impl IngestService {
    /// Creates a new IngestService instance
    pub fn new(
        pool: Arc<DbPool>,
        account_service: Arc<AccountService>,
        payment_service: Arc<PaymentService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        locks: Arc<BorrowerLocks>,
        settings: Settings,
    ) -> Self {
        Self {
            repository: EventRepository::new(pool.clone()),
            pool,
            account_service,
            payment_service,
            notifier,
            clock,
            locks,
            settings,
        }
    }

    /// Pre-checks a payment before the provider commits it. Read-only: used
    /// by the provider's validation callback, never touches the ledger.
    pub fn validate(&self, account_reference: &str, amount: Decimal) -> Result<Account> {
        if amount < self.settings.minimum_payment_amount {
            return Err(IngestError::InvalidPayload(format!(
                "Amount {} is below the minimum payment of {}",
                amount, self.settings.minimum_payment_amount
            )));
        }

        self.account_service
            .find_by_account_number(account_reference)?
            .ok_or_else(|| {
                IngestError::NotFound(format!(
                    "No account matches reference {}",
                    account_reference
                ))
            })
    }

    /// Ingests a confirmed provider event: stores it, then applies it to the
    /// borrower's loans through the waterfall. Safe to call any number of
    /// times with the same provider transaction code.
    pub fn ingest(&self, payload: NewExternalPaymentEvent) -> Result<IngestOutcome> {
        payload.validate()?;

        let (event, inserted) = self.repository.insert_or_get(payload)?;
        if !inserted {
            info!(
                "Duplicate delivery of event {}, stored row reused",
                event.provider_txn_code
            );
        }
        if event.processed {
            return Ok(IngestOutcome::AlreadyProcessed(event));
        }

        let account = match self
            .account_service
            .find_by_account_number(&event.account_reference)?
        {
            Some(account) => account,
            None => {
                let reason = format!(
                    "Unknown account reference {}",
                    event.account_reference
                );
                self.repository.record_error(&event.id, &reason)?;
                warn!("Event {} rejected: {}", event.provider_txn_code, reason);
                return Ok(IngestOutcome::Rejected { event, reason });
            }
        };

        if event.amount < self.settings.minimum_payment_amount {
            let reason = format!(
                "Amount {} is below the minimum payment of {}",
                event.amount, self.settings.minimum_payment_amount
            );
            self.repository.record_error(&event.id, &reason)?;
            warn!("Event {} rejected: {}", event.provider_txn_code, reason);
            return Ok(IngestOutcome::Rejected { event, reason });
        }

        self.apply_event(&event, &account.customer_id)
    }

    /// Re-attempts stored events that failed to apply, oldest first. Returns
    /// how many were applied; per-event failures are recorded and skipped.
    pub fn retry_unprocessed(&self, limit: i64) -> Result<usize> {
        let pending = self.repository.list_unprocessed(limit)?;
        let mut applied = 0;

        for event in pending {
            // Events rejected at ingest stay rejected; the stored error
            // already names the reason.
            if event.amount < self.settings.minimum_payment_amount {
                continue;
            }
            let account = match self
                .account_service
                .find_by_account_number(&event.account_reference)?
            {
                Some(account) => account,
                None => continue,
            };

            match self.apply_event(&event, &account.customer_id) {
                Ok(IngestOutcome::Accepted { .. }) => applied += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(
                        "Retry of event {} failed: {}",
                        event.provider_txn_code, e
                    );
                }
            }
        }

        Ok(applied)
    }

    /// Runs a payment through the full ingestion path with a synthetic
    /// provider code, for sandbox and staging environments.
    pub fn simulate(&self, account_reference: &str, amount: Decimal) -> Result<IngestOutcome> {
        let code = format!(
            "{}-{}",
            SIMULATION_CODE_PREFIX,
            Uuid::new_v4().simple().to_string()[..10].to_uppercase()
        );

        self.ingest(NewExternalPaymentEvent {
            provider_txn_code: code,
            account_reference: account_reference.to_string(),
            phone_number: None,
            amount,
            payer_name: Some("Simulated payer".to_string()),
            is_simulation: true,
            event_time: self.clock.now().naive_utc(),
        })
    }

    /// Applies a stored event to the ledger. The processed flag is re-read
    /// under the borrower lock inside the transaction, and flipped in the
    /// same transaction as the ledger writes.
    fn apply_event(
        &self,
        event: &ExternalPaymentEvent,
        customer_id: &str,
    ) -> Result<IngestOutcome> {
        let lock = self.locks.for_borrower(customer_id);
        let _guard = acquire(&lock);

        let mut conn = get_connection(&self.pool)
            .map_err(|e| IngestError::DatabaseError(e.to_string()))?;
        let conn = &mut *conn;

        let mut events = Vec::new();
        let result = conn.transaction::<_, IngestError, _>(|tx| {
            let current = self
                .repository
                .get_by_code_in_tx(tx, &event.provider_txn_code)?;
            if current.processed {
                return Ok(IngestOutcome::AlreadyProcessed(current));
            }

            let outcome = self.payment_service.apply_waterfall_in_tx(
                tx,
                customer_id,
                current.amount,
                PaymentMethod::Mpesa,
                Some(current.provider_txn_code.clone()),
                &mut events,
            )?;

            let summary = serde_json::to_string(&AllocationOutcome {
                allocations: outcome.allocations.clone(),
                residual: outcome.residual,
            })?;
            self.repository.mark_processed_in_tx(tx, &current.id, &summary)?;

            let mut stored = current;
            stored.processed = true;
            stored.allocation_summary = Some(summary);
            Ok(IngestOutcome::Accepted {
                event: stored,
                outcome,
            })
        });

        match result {
            Ok(outcome) => {
                dispatch(self.notifier.clone(), events);
                Ok(outcome)
            }
            Err(e) => {
                self.repository.record_error(&event.id, &e.to_string())?;
                Err(e)
            }
        }
    }
}
