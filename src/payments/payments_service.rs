use diesel::Connection;
use log::{debug, info};
use rust_decimal::Decimal;
use std::sync::Arc;

use super::payments_errors::{PaymentError, Result};
use super::payments_model::{
    LoanPaymentOutcome, ManualPaymentInput, NewPayment, Payment, PaymentMethod, PaymentStatus,
    WaterfallOutcome,
};
use super::payments_repository::PaymentRepository;
use crate::accounts::{AccountService, AccountType};
use crate::allocation::allocate;
use crate::arrears::{ArrearRepository, ArrearStatus};
use crate::clock::Clock;
use crate::db::{get_connection, DbPool};
use crate::loans::{LoanEvent, LoanRepository};
use crate::locks::{acquire, BorrowerLocks};
use crate::notifications::{dispatch, NotificationEvent, Notifier};
use crate::settings::Settings;
use crate::transactions::TransactionType;

/// Service orchestrating payment application against the ledger.
///
/// Every mutation runs inside a single database transaction with the
/// borrower's lock held, so concurrent payments for one borrower serialize
/// and a failure anywhere rolls the whole payment back. Notification events
/// are collected during the transaction and dispatched only after commit.
pub struct PaymentService {
    pool: Arc<DbPool>,
    account_service: Arc<AccountService>,
    loan_repository: LoanRepository,
    arrear_repository: ArrearRepository,
    repository: PaymentRepository,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: Arc<BorrowerLocks>,
    settings: Settings,
}

impl PaymentService {
    /// Creates a new PaymentService instance
    pub fn new(
        pool: Arc<DbPool>,
        account_service: Arc<AccountService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        locks: Arc<BorrowerLocks>,
        settings: Settings,
    ) -> Self {
        Self {
            loan_repository: LoanRepository::new(pool.clone()),
            arrear_repository: ArrearRepository::new(pool.clone()),
            repository: PaymentRepository::new(pool.clone()),
            pool,
            account_service,
            notifier,
            clock,
            locks,
            settings,
        }
    }

    /// Applies a payment across the borrower's open loans, oldest first,
    /// depositing any residual to savings.
    pub fn apply_waterfall_payment(
        &self,
        customer_id: &str,
        amount: Decimal,
        method: PaymentMethod,
        external_reference: Option<String>,
    ) -> Result<WaterfallOutcome> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidData(
                "Payment amount must be positive".to_string(),
            ));
        }

        let lock = self.locks.for_borrower(customer_id);
        let _guard = acquire(&lock);

        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        let conn = &mut *conn;

        let mut events = Vec::new();
        let outcome = conn.transaction::<_, PaymentError, _>(|tx| {
            self.apply_waterfall_in_tx(
                tx,
                customer_id,
                amount,
                method,
                external_reference,
                &mut events,
            )
        })?;

        dispatch(self.notifier.clone(), events);
        Ok(outcome)
    }

    /// Waterfall application inside an already-open transaction. The caller
    /// holds the borrower lock and owns commit/rollback; event ingestion uses
    /// this to mark the webhook event processed in the same transaction.
    pub fn apply_waterfall_in_tx(
        &self,
        conn: &mut diesel::sqlite::SqliteConnection,
        customer_id: &str,
        amount: Decimal,
        method: PaymentMethod,
        external_reference: Option<String>,
        events: &mut Vec<NotificationEvent>,
    ) -> Result<WaterfallOutcome> {
        let today = self.clock.today();
        let now = self.clock.now().naive_utc();

        let mut loans = self
            .loan_repository
            .get_open_for_borrower_in_tx(conn, customer_id)?;
        let allocation = allocate(amount, &loans);

        let mut payments = Vec::with_capacity(allocation.allocations.len());
        for entry in &allocation.allocations {
            let loan = loans
                .iter_mut()
                .find(|l| l.id == entry.loan_id)
                .ok_or_else(|| {
                    PaymentError::NotFound(format!("Loan not found: {}", entry.loan_id))
                })?;

            let balance_before = loan.balance;
            let event =
                loan.apply_allocation(entry.applied, today, self.settings.installment_period())?;
            self.loan_repository.save_in_tx(conn, loan)?;

            if event == LoanEvent::Completed {
                self.arrear_repository
                    .resolve_for_loan_in_tx(conn, &loan.id, now)?;
                info!("Loan {} completed by payment", loan.loan_number);
            }

            let payment = self.repository.create_in_tx(
                conn,
                NewPayment {
                    loan_id: loan.id.clone(),
                    borrower_id: customer_id.to_string(),
                    amount: entry.applied,
                    method,
                    external_reference: external_reference.clone(),
                    status: PaymentStatus::Confirmed,
                    balance_before,
                    balance_after: loan.balance,
                    notes: None,
                    payment_date: today,
                    confirmed_at: Some(now),
                },
            )?;

            events.push(NotificationEvent::PaymentConfirmed {
                customer_id: customer_id.to_string(),
                loan_number: loan.loan_number.clone(),
                amount: entry.applied,
                remaining_balance: loan.balance,
            });
            payments.push(payment);
        }

        let savings_transaction = if allocation.residual > Decimal::ZERO {
            let savings =
                self.account_service
                    .get_account_in_tx(conn, customer_id, AccountType::Savings)?;
            let credit = self.account_service.credit_in_tx(
                conn,
                &savings.id,
                allocation.residual,
                TransactionType::Deposit,
                external_reference.clone(),
                Some("Payment residual deposited to savings".to_string()),
            )?;

            events.push(NotificationEvent::SavingsDeposit {
                customer_id: customer_id.to_string(),
                amount: allocation.residual,
                new_balance: credit.new_balance,
            });
            if credit.registration_fee_just_paid {
                events.push(NotificationEvent::RegistrationComplete {
                    customer_id: customer_id.to_string(),
                    account_number: savings.account_number.clone(),
                    loan_limit: credit.new_balance
                        * Decimal::from(self.settings.loan_limit_multiplier),
                });
            }
            Some(credit.transaction)
        } else {
            None
        };

        events.push(NotificationEvent::OfficerPaymentAlert {
            customer_id: customer_id.to_string(),
            amount,
        });

        debug!(
            "Waterfall applied {} across {} loans for {}, residual {}",
            allocation.total_applied(),
            allocation.allocations.len(),
            customer_id,
            allocation.residual
        );

        Ok(WaterfallOutcome {
            payments,
            allocations: allocation.allocations,
            residual: allocation.residual,
            savings_transaction,
        })
    }

    /// Collects a due installment from the borrower's drawdown account.
    ///
    /// Debits `required_payment()` from drawdown and applies it to the loan
    /// in one transaction. An `InsufficientFunds` error rolls everything back
    /// and signals the caller to open a grace-period arrear instead.
    pub fn apply_drawdown_debit(&self, loan_id: &str) -> Result<LoanPaymentOutcome> {
        let loan = self.loan_repository.get_by_id(loan_id)?;

        let lock = self.locks.for_borrower(&loan.borrower_id);
        let _guard = acquire(&lock);

        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        let conn = &mut *conn;

        let mut events = Vec::new();
        let outcome = conn.transaction::<_, PaymentError, _>(|tx| {
            let mut loan = self.loan_repository.get_by_id_in_tx(tx, loan_id)?;
            if !loan.is_open() {
                return Err(PaymentError::InvalidState(format!(
                    "Loan {} is not open for payments",
                    loan.loan_number
                )));
            }

            let today = self.clock.today();
            let now = self.clock.now().naive_utc();
            let required = loan.required_payment();

            let drawdown = self.account_service.get_account_in_tx(
                tx,
                &loan.borrower_id,
                AccountType::Drawdown,
            )?;
            self.account_service.debit_in_tx(
                tx,
                &drawdown.id,
                required,
                TransactionType::LoanRepayment,
                Some(loan.loan_number.clone()),
                Some(format!("Automatic debit for loan {}", loan.loan_number)),
            )?;

            let balance_before = loan.balance;
            let event = loan.apply_allocation(required, today, self.settings.installment_period())?;
            self.loan_repository.save_in_tx(tx, &loan)?;

            if event == LoanEvent::Completed {
                self.arrear_repository
                    .resolve_for_loan_in_tx(tx, &loan.id, now)?;
            } else if let Some(arrear) =
                self.arrear_repository.find_open_for_loan_in_tx(tx, &loan.id)?
            {
                // Collecting the missed installment clears a grace-period
                // arrear; full arrears only resolve through payoff.
                if arrear.status == ArrearStatus::GracePeriod {
                    self.arrear_repository
                        .resolve_for_loan_in_tx(tx, &loan.id, now)?;
                }
            }

            let payment = self.repository.create_in_tx(
                tx,
                NewPayment {
                    loan_id: loan.id.clone(),
                    borrower_id: loan.borrower_id.clone(),
                    amount: required,
                    method: PaymentMethod::DrawdownAuto,
                    external_reference: None,
                    status: PaymentStatus::Confirmed,
                    balance_before,
                    balance_after: loan.balance,
                    notes: None,
                    payment_date: today,
                    confirmed_at: Some(now),
                },
            )?;

            events.push(NotificationEvent::PaymentConfirmed {
                customer_id: loan.borrower_id.clone(),
                loan_number: loan.loan_number.clone(),
                amount: required,
                remaining_balance: loan.balance,
            });

            Ok(LoanPaymentOutcome {
                payment,
                loan,
                event,
                excess_to_savings: Decimal::ZERO,
            })
        })?;

        dispatch(self.notifier.clone(), events);
        Ok(outcome)
    }

    /// Records a cash or bank-transfer payment awaiting officer approval.
    /// Nothing touches the ledger until the payment is confirmed.
    pub fn record_manual_payment(&self, input: ManualPaymentInput) -> Result<Payment> {
        input.validate()?;

        let loan = self.loan_repository.get_by_id(&input.loan_id)?;
        if !loan.is_open() {
            return Err(PaymentError::InvalidState(format!(
                "Loan {} is not open for payments",
                loan.loan_number
            )));
        }

        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        let payment = self.repository.create_in_tx(
            &mut conn,
            NewPayment {
                loan_id: loan.id.clone(),
                borrower_id: loan.borrower_id.clone(),
                amount: input.amount,
                method: input.method,
                external_reference: None,
                status: PaymentStatus::Pending,
                balance_before: loan.balance,
                balance_after: loan.balance,
                notes: input.notes,
                payment_date: self.clock.today(),
                confirmed_at: None,
            },
        )?;

        info!(
            "Recorded pending {} payment {} for loan {}",
            payment.method.as_str(),
            payment.payment_number,
            loan.loan_number
        );
        Ok(payment)
    }

    /// Confirms a pending manual payment and applies it to its loan. Any
    /// amount above the loan balance is deposited to the borrower's savings.
    pub fn confirm_manual_payment(&self, payment_id: &str) -> Result<LoanPaymentOutcome> {
        let pending = self.repository.get_by_id(payment_id)?;
        if pending.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidState(format!(
                "Payment {} is not pending",
                pending.payment_number
            )));
        }

        let lock = self.locks.for_borrower(&pending.borrower_id);
        let _guard = acquire(&lock);

        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        let conn = &mut *conn;

        let mut events = Vec::new();
        let outcome = conn.transaction::<_, PaymentError, _>(|tx| {
            let mut loan = self.loan_repository.get_by_id_in_tx(tx, &pending.loan_id)?;
            if !loan.is_open() {
                return Err(PaymentError::InvalidState(format!(
                    "Loan {} is not open for payments",
                    loan.loan_number
                )));
            }

            let today = self.clock.today();
            let now = self.clock.now().naive_utc();
            let applied = pending.amount.min(loan.balance);
            let excess = pending.amount - applied;

            let balance_before = loan.balance;
            let event = loan.apply_allocation(applied, today, self.settings.installment_period())?;
            self.loan_repository.save_in_tx(tx, &loan)?;

            if event == LoanEvent::Completed {
                self.arrear_repository
                    .resolve_for_loan_in_tx(tx, &loan.id, now)?;
            }

            if excess > Decimal::ZERO {
                let savings = self.account_service.get_account_in_tx(
                    tx,
                    &loan.borrower_id,
                    AccountType::Savings,
                )?;
                let credit = self.account_service.credit_in_tx(
                    tx,
                    &savings.id,
                    excess,
                    TransactionType::Deposit,
                    Some(pending.payment_number.clone()),
                    Some("Payment residual deposited to savings".to_string()),
                )?;
                events.push(NotificationEvent::SavingsDeposit {
                    customer_id: loan.borrower_id.clone(),
                    amount: excess,
                    new_balance: credit.new_balance,
                });
                if credit.registration_fee_just_paid {
                    events.push(NotificationEvent::RegistrationComplete {
                        customer_id: loan.borrower_id.clone(),
                        account_number: savings.account_number.clone(),
                        loan_limit: credit.new_balance
                            * Decimal::from(self.settings.loan_limit_multiplier),
                    });
                }
            }

            let payment = self.repository.mark_confirmed_in_tx(
                tx,
                payment_id,
                balance_before,
                loan.balance,
                now,
            )?;

            events.push(NotificationEvent::PaymentConfirmed {
                customer_id: loan.borrower_id.clone(),
                loan_number: loan.loan_number.clone(),
                amount: applied,
                remaining_balance: loan.balance,
            });

            Ok(LoanPaymentOutcome {
                payment,
                loan,
                event,
                excess_to_savings: excess,
            })
        })?;

        dispatch(self.notifier.clone(), events);
        Ok(outcome)
    }

    /// Rejects a pending manual payment. The ledger is untouched.
    pub fn reject_manual_payment(&self, payment_id: &str, reason: &str) -> Result<Payment> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        self.repository.mark_rejected_in_tx(&mut conn, payment_id, reason)
    }

    /// Retrieves a payment by its ID
    pub fn get_payment(&self, payment_id: &str) -> Result<Payment> {
        self.repository.get_by_id(payment_id)
    }

    /// Lists payments for a loan, newest first.
    pub fn list_for_loan(&self, loan_id: &str) -> Result<Vec<Payment>> {
        self.repository.list_for_loan(loan_id)
    }

    /// Lists pending manual payments awaiting approval.
    pub fn list_pending(&self) -> Result<Vec<Payment>> {
        self.repository.list_pending()
    }
}
