use chrono::Duration;
use diesel::Connection;
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::accounts::AccountError;
use crate::arrears::{ArrearRepository, ArrearStatus, NewArrear};
use crate::clock::Clock;
use crate::db::{get_connection, DbPool};
use crate::errors::{Error, Result};
use crate::loans::{Loan, LoanRepository, LoanStatus};
use crate::locks::{acquire, BorrowerLocks};
use crate::notifications::{dispatch, NotificationEvent, Notifier};
use crate::payments::{PaymentError, PaymentService};
use crate::settings::Settings;

/// Days before the due date at which reminders go out. The final zero is the
/// due date itself.
const REMINDER_OFFSETS_DAYS: [i64; 3] = [3, 1, 0];

/// Counters reported by one due-payment sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    /// Loans collected from the drawdown account.
    pub collected: usize,
    /// Loans that entered a grace period this sweep.
    pub grace_opened: usize,
    /// Grace periods that expired and were escalated to arrears.
    pub escalated: usize,
    /// Loans skipped because their grace window is still running.
    pub waiting: usize,
    pub failed: usize,
}

/// Counters reported by one arrears-aging pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AgingStats {
    /// Active loans newly classified as arrears.
    pub classified: usize,
    /// Existing arrears whose aging fields were refreshed.
    pub aged: usize,
    /// Arrears notices sent this pass.
    pub notices: usize,
    pub failed: usize,
}

/// Periodic sweeps over the loan book: due-payment collection, arrears
/// classification and aging, and payment reminders.
///
/// There is no per-loan timer. Grace periods are plain deadlines persisted on
/// the arrear row and re-evaluated on every sweep, so a restart never loses a
/// pending escalation. Every per-loan failure is logged and skipped; one bad
/// loan never stalls the sweep.
pub struct SchedulerService {
    pool: Arc<DbPool>,
    loan_repository: LoanRepository,
    arrear_repository: ArrearRepository,
    payment_service: Arc<PaymentService>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: Arc<BorrowerLocks>,
    settings: Settings,
}

impl SchedulerService {
    /// Creates a new SchedulerService instance
    pub fn new(
        pool: Arc<DbPool>,
        payment_service: Arc<PaymentService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        locks: Arc<BorrowerLocks>,
        settings: Settings,
    ) -> Self {
        Self {
            loan_repository: LoanRepository::new(pool.clone()),
            arrear_repository: ArrearRepository::new(pool.clone()),
            pool,
            payment_service,
            notifier,
            clock,
            locks,
            settings,
        }
    }

    /// Runs all three sweeps on their configured intervals until the task is
    /// cancelled. Intended to be spawned once on the runtime.
    pub async fn run(&self) {
        let mut due_sweep =
            tokio::time::interval(std::time::Duration::from_secs(
                self.settings.due_sweep_interval_secs,
            ));
        let mut aging = tokio::time::interval(std::time::Duration::from_secs(
            self.settings.arrears_aging_interval_secs,
        ));
        let mut reminders = tokio::time::interval(std::time::Duration::from_secs(
            self.settings.reminder_interval_secs,
        ));

        info!(
            "Scheduler started: due sweep every {}s, aging every {}s, reminders every {}s",
            self.settings.due_sweep_interval_secs,
            self.settings.arrears_aging_interval_secs,
            self.settings.reminder_interval_secs
        );

        loop {
            tokio::select! {
                _ = due_sweep.tick() => {
                    if let Err(e) = self.run_due_sweep() {
                        error!("Due-payment sweep failed: {}", e);
                    }
                }
                _ = aging.tick() => {
                    if let Err(e) = self.run_arrears_aging() {
                        error!("Arrears aging pass failed: {}", e);
                    }
                }
                _ = reminders.tick() => {
                    if let Err(e) = self.run_reminder_pass() {
                        error!("Reminder pass failed: {}", e);
                    }
                }
            }
        }
    }

    /// Collects due installments from drawdown accounts. A loan whose
    /// drawdown balance cannot cover the required payment enters a grace
    /// period; an expired grace period escalates the loan to arrears.
    pub fn run_due_sweep(&self) -> Result<SweepStats> {
        let today = self.clock.today();
        let due = self.loan_repository.get_due_for_payment(today)?;
        let mut stats = SweepStats::default();

        for loan in due {
            match self.sweep_loan(&loan, &mut stats) {
                Ok(()) => {}
                Err(e) => {
                    stats.failed += 1;
                    error!("Sweep of loan {} failed: {}", loan.loan_number, e);
                }
            }
        }

        if stats != SweepStats::default() {
            info!(
                "Due sweep: {} collected, {} grace opened, {} escalated, {} waiting, {} failed",
                stats.collected, stats.grace_opened, stats.escalated, stats.waiting, stats.failed
            );
        }
        Ok(stats)
    }

    fn sweep_loan(&self, loan: &Loan, stats: &mut SweepStats) -> Result<()> {
        let now = self.clock.now().naive_utc();

        if let Some(arrear) = self.arrear_repository.find_open_for_loan(&loan.id)? {
            if arrear.grace_expired_at(now) {
                self.escalate_grace_period(loan, &arrear.id)?;
                stats.escalated += 1;
            } else if arrear.status == ArrearStatus::GracePeriod {
                // The borrower may have funded drawdown during the window;
                // collecting the installment resolves the grace arrear.
                match self.payment_service.apply_drawdown_debit(&loan.id) {
                    Ok(_) => stats.collected += 1,
                    Err(PaymentError::Account(AccountError::InsufficientFunds { .. })) => {
                        stats.waiting += 1;
                    }
                    Err(e) => return Err(Error::Payment(e)),
                }
            }
            // Open non-grace arrears are handled by the aging pass.
            return Ok(());
        }

        match self.payment_service.apply_drawdown_debit(&loan.id) {
            Ok(outcome) => {
                info!(
                    "Collected {} for loan {} from drawdown",
                    outcome.payment.amount, loan.loan_number
                );
                stats.collected += 1;
                Ok(())
            }
            Err(PaymentError::Account(AccountError::InsufficientFunds {
                available,
                required,
            })) => {
                let shortfall = (required - available).max(Decimal::ZERO);
                self.open_grace_period(loan, shortfall)?;
                stats.grace_opened += 1;
                Ok(())
            }
            Err(e) => Err(Error::Payment(e)),
        }
    }

    /// Opens a grace-period arrear for a loan whose automatic debit failed.
    /// Idempotent: a concurrent sweep gets the existing open arrear back.
    fn open_grace_period(&self, loan: &Loan, shortfall: Decimal) -> Result<()> {
        let lock = self.locks.for_borrower(&loan.borrower_id);
        let _guard = acquire(&lock);

        let now = self.clock.now().naive_utc();
        let deadline = now + self.settings.grace_period();
        let required = loan.required_payment();

        let mut conn = get_connection(&self.pool)?;
        let conn = &mut *conn;

        let (_, created) = conn.transaction::<_, Error, _>(|tx| {
            Ok(self.arrear_repository.create_if_absent_in_tx(
                tx,
                NewArrear {
                    loan_id: loan.id.clone(),
                    amount_overdue: required,
                    days_overdue: 0,
                    status: ArrearStatus::GracePeriod,
                    grace_period_end: Some(deadline),
                },
            )?)
        })?;

        // A pre-existing open arrear means another sweep got here first.
        if created {
            warn!(
                "Loan {} missed its debit, grace period until {}",
                loan.loan_number, deadline
            );
            dispatch(
                self.notifier.clone(),
                vec![NotificationEvent::GracePeriodStarted {
                    customer_id: loan.borrower_id.clone(),
                    loan_number: loan.loan_number.clone(),
                    shortfall,
                    deadline,
                }],
            );
        }
        Ok(())
    }

    /// Escalates an expired grace period: the arrear leaves grace and the
    /// loan is classified as arrears, atomically.
    fn escalate_grace_period(&self, loan: &Loan, arrear_id: &str) -> Result<()> {
        let lock = self.locks.for_borrower(&loan.borrower_id);
        let _guard = acquire(&lock);

        let mut conn = get_connection(&self.pool)?;
        let conn = &mut *conn;

        let escalated = conn.transaction::<_, Error, _>(|tx| {
            let mut current = self.loan_repository.get_by_id_in_tx(tx, &loan.id)?;
            if current.status != LoanStatus::Active || !current.is_open() {
                // Paid off or already escalated while we waited for the lock.
                return Ok(None);
            }

            self.arrear_repository.escalate_in_tx(tx, arrear_id)?;
            current.transition_to(LoanStatus::Arrears)?;
            self.loan_repository.save_in_tx(tx, &current)?;
            Ok(Some(current))
        })?;

        if let Some(current) = escalated {
            warn!(
                "Loan {} escalated to arrears after grace period expiry",
                current.loan_number
            );
            dispatch(
                self.notifier.clone(),
                vec![NotificationEvent::ArrearsNotice {
                    customer_id: current.borrower_id.clone(),
                    loan_number: current.loan_number.clone(),
                    balance: current.balance,
                    days_overdue: 0,
                }],
            );
        }
        Ok(())
    }

    /// Classifies overdue active loans as arrears and refreshes aging fields
    /// on existing arrears. Notices follow the configured cadence instead of
    /// firing on every pass.
    pub fn run_arrears_aging(&self) -> Result<AgingStats> {
        let today = self.clock.today();
        let mut stats = AgingStats::default();
        let mut events = Vec::new();

        for loan in self.loan_repository.get_overdue(today)? {
            match self.classify_overdue(&loan) {
                Ok(Some(notice)) => {
                    stats.classified += 1;
                    events.push(notice);
                }
                Ok(None) => {}
                Err(e) => {
                    stats.failed += 1;
                    error!("Classification of loan {} failed: {}", loan.loan_number, e);
                }
            }
        }

        for loan in self.loan_repository.get_in_arrears()? {
            match self.age_arrear(&loan) {
                Ok(Some(notice)) => {
                    stats.aged += 1;
                    events.push(notice);
                }
                Ok(None) => stats.aged += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!("Aging of loan {} failed: {}", loan.loan_number, e);
                }
            }
        }

        stats.notices = events.len();
        dispatch(self.notifier.clone(), events);

        if stats != AgingStats::default() {
            info!(
                "Arrears aging: {} classified, {} aged, {} notices, {} failed",
                stats.classified, stats.aged, stats.notices, stats.failed
            );
        }
        Ok(stats)
    }

    fn classify_overdue(&self, loan: &Loan) -> Result<Option<NotificationEvent>> {
        let lock = self.locks.for_borrower(&loan.borrower_id);
        let _guard = acquire(&lock);

        let today = self.clock.today();
        let mut conn = get_connection(&self.pool)?;
        let conn = &mut *conn;

        conn.transaction::<_, Error, _>(|tx| {
            let mut current = self.loan_repository.get_by_id_in_tx(tx, &loan.id)?;
            if current.status != LoanStatus::Active || !current.is_open() {
                return Ok(None);
            }

            let days_overdue = (today - current.due_date).num_days().max(0) as i32;
            current.transition_to(LoanStatus::Arrears)?;
            self.loan_repository.save_in_tx(tx, &current)?;
            self.arrear_repository.create_if_absent_in_tx(
                tx,
                NewArrear {
                    loan_id: current.id.clone(),
                    amount_overdue: current.balance,
                    days_overdue,
                    status: ArrearStatus::New,
                    grace_period_end: None,
                },
            )?;

            warn!(
                "Loan {} is {} days past its due date, classified as arrears",
                current.loan_number, days_overdue
            );
            Ok(Some(NotificationEvent::ArrearsNotice {
                customer_id: current.borrower_id.clone(),
                loan_number: current.loan_number.clone(),
                balance: current.balance,
                days_overdue,
            }))
        })
    }

    fn age_arrear(&self, loan: &Loan) -> Result<Option<NotificationEvent>> {
        let today = self.clock.today();
        let mut conn = get_connection(&self.pool)?;
        let conn = &mut *conn;

        conn.transaction::<_, Error, _>(|tx| {
            let Some(arrear) = self.arrear_repository.find_open_for_loan_in_tx(tx, &loan.id)?
            else {
                return Ok(None);
            };
            if arrear.status == ArrearStatus::GracePeriod {
                // The loan left grace by classification or expiry; pull the
                // arrear out of its window before aging it.
                self.arrear_repository.escalate_in_tx(tx, &arrear.id)?;
            }

            let days_overdue = (today - loan.due_date).num_days().max(0) as i32;
            self.arrear_repository
                .age_in_tx(tx, &arrear.id, days_overdue, loan.balance)?;

            let cadence = self.settings.arrears_notice_cadence_days;
            if days_overdue > 0 && i64::from(days_overdue) % cadence == 0 {
                return Ok(Some(NotificationEvent::ArrearsNotice {
                    customer_id: loan.borrower_id.clone(),
                    loan_number: loan.loan_number.clone(),
                    balance: loan.balance,
                    days_overdue,
                }));
            }
            Ok(None)
        })
    }

    /// Sends upcoming-payment reminders for loans due in three days, one day,
    /// and today. Read-only against the ledger.
    pub fn run_reminder_pass(&self) -> Result<usize> {
        let today = self.clock.today();
        let mut events = Vec::new();

        for offset in REMINDER_OFFSETS_DAYS {
            let target = today + Duration::days(offset);
            for loan in self.loan_repository.get_due_on(target)? {
                events.push(NotificationEvent::PaymentReminder {
                    customer_id: loan.borrower_id.clone(),
                    loan_number: loan.loan_number.clone(),
                    amount_due: loan.required_payment(),
                    due_date: target,
                    days_remaining: offset,
                });
            }
        }

        let sent = events.len();
        dispatch(self.notifier.clone(), events);
        Ok(sent)
    }
}
