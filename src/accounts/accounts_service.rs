use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::accounts_model::{Account, AccountType, NewAccount};
use super::accounts_repository::AccountRepository;
use crate::accounts::{AccountError, Result};
use crate::settings::Settings;
use crate::transactions::{NewTransaction, Transaction, TransactionRepository, TransactionType};

/// Outcome of crediting an account inside a payment transaction.
pub struct CreditOutcome {
    pub transaction: Transaction,
    pub new_balance: Decimal,
    /// True when this credit lifted the savings balance over the registration
    /// fee for the first time, unlocking loan eligibility.
    pub registration_fee_just_paid: bool,
}

/// Service for managing customer cash accounts (the accounts side of the
/// ledger store). Balance mutations only happen through `credit_in_tx` /
/// `debit_in_tx`, which pair the balance write with an immutable ledger entry.
pub struct AccountService {
    repository: AccountRepository,
    transaction_repository: TransactionRepository,
    settings: Settings,
}

impl AccountService {
    /// Creates a new AccountService instance
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        settings: Settings,
    ) -> Self {
        Self {
            repository: AccountRepository::new(pool.clone()),
            transaction_repository: TransactionRepository::new(pool),
            settings,
        }
    }

    /// Opens the savings/drawdown pair for a new customer.
    pub fn open_customer_accounts(
        &self,
        customer_id: &str,
        savings_number: &str,
        drawdown_number: &str,
    ) -> Result<(Account, Account)> {
        debug!("Opening account pair for customer {}", customer_id);

        let savings = self.repository.create(NewAccount {
            customer_id: customer_id.to_string(),
            account_number: savings_number.to_string(),
            account_type: AccountType::Savings,
        })?;
        let drawdown = self.repository.create(NewAccount {
            customer_id: customer_id.to_string(),
            account_number: drawdown_number.to_string(),
            account_type: AccountType::Drawdown,
        })?;

        Ok((savings, drawdown))
    }

    /// Retrieves the savings and drawdown pair for a customer.
    pub fn get_accounts(&self, customer_id: &str) -> Result<(Account, Account)> {
        self.repository.get_pair_for_customer(customer_id)
    }

    /// Resolves a customer by their unique account number.
    pub fn find_by_account_number(&self, account_number: &str) -> Result<Option<Account>> {
        self.repository.find_by_account_number(account_number)
    }

    /// Retrieves one account of the given type using the caller's connection,
    /// so the payment path can resolve accounts inside its own transaction.
    pub fn get_account_in_tx(
        &self,
        conn: &mut SqliteConnection,
        customer_id: &str,
        kind: AccountType,
    ) -> Result<Account> {
        self.repository.get_for_customer_in_tx(conn, customer_id, kind)
    }

    /// Credits an account and appends the matching ledger entry. Must run
    /// inside the payment transaction with the borrower lock held.
    pub fn credit_in_tx(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        description: Option<String>,
    ) -> Result<CreditOutcome> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::InvalidData(
                "Credit amount must be positive".to_string(),
            ));
        }

        let account = self.repository.get_by_id_in_tx(conn, account_id)?;
        let new_balance = account.balance + amount;
        self.repository
            .save_balance_in_tx(conn, account_id, new_balance)?;

        let transaction = self.transaction_repository.create_in_tx(
            conn,
            NewTransaction {
                account_id: account_id.to_string(),
                customer_id: account.customer_id.clone(),
                transaction_type,
                amount,
                balance_before: account.balance,
                balance_after: new_balance,
                description,
                reference,
            },
        )?;

        let registration_fee_just_paid = account.account_type == AccountType::Savings
            && !account.registration_fee_paid
            && new_balance >= self.settings.registration_fee;

        if registration_fee_just_paid {
            self.repository
                .mark_registration_fee_paid_in_tx(conn, account_id)?;
            let limit = new_balance * Decimal::from(self.settings.loan_limit_multiplier);
            self.repository.set_loan_limit_in_tx(conn, account_id, limit)?;
            debug!(
                "Customer {} completed registration, loan limit {}",
                account.customer_id, limit
            );
        }

        Ok(CreditOutcome {
            transaction,
            new_balance,
            registration_fee_just_paid,
        })
    }

    /// Debits an account and appends the matching ledger entry. Rejects with
    /// `InsufficientFunds` when the balance does not cover the amount; loan
    /// repayment capping happens upstream of this call, never here.
    pub fn debit_in_tx(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::InvalidData(
                "Debit amount must be positive".to_string(),
            ));
        }

        let account = self.repository.get_by_id_in_tx(conn, account_id)?;
        if account.balance < amount {
            return Err(AccountError::InsufficientFunds {
                available: account.balance,
                required: amount,
            });
        }

        let new_balance = account.balance - amount;
        self.repository
            .save_balance_in_tx(conn, account_id, new_balance)?;

        self.transaction_repository.create_in_tx(
            conn,
            NewTransaction {
                account_id: account_id.to_string(),
                customer_id: account.customer_id,
                transaction_type,
                amount,
                balance_before: account.balance,
                balance_after: new_balance,
                description,
                reference,
            },
        )
    }

    /// Sums ledger deltas for an account; used to audit conservation.
    pub fn sum_transaction_deltas(&self, account_id: &str) -> Result<Decimal> {
        self.repository.sum_transaction_deltas(account_id)
    }
}
