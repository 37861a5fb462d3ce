use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use crate::accounts::{AccountError, Result};
use crate::constants::DECIMAL_PRECISION;
use crate::db::get_connection;
use crate::schema::accounts;
use crate::schema::accounts::dsl::*;

use super::accounts_model::{Account, AccountDB, AccountType, NewAccount};

/// Repository for managing account data in the database
pub struct AccountRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl AccountRepository {
    /// Creates a new AccountRepository instance
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Creates a new account. The `UNIQUE (customer_id, account_type)`
    /// constraint keeps onboarding at one savings and one drawdown account
    /// per customer.
    pub fn create(&self, new_account: NewAccount) -> Result<Account> {
        new_account.validate()?;

        let mut account_db: AccountDB = new_account.into();
        account_db.id = uuid::Uuid::new_v4().to_string();

        let mut conn = get_connection(&self.pool)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        diesel::insert_into(accounts::table)
            .values(&account_db)
            .execute(&mut conn)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        Ok(account_db.into())
    }

    /// Retrieves an account by its ID
    pub fn get_by_id(&self, account_id: &str) -> Result<Account> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;
        self.get_by_id_in_tx(&mut conn, account_id)
    }

    /// Retrieves an account by its ID using the caller's connection
    pub fn get_by_id_in_tx(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
    ) -> Result<Account> {
        let account = accounts
            .find(account_id)
            .first::<AccountDB>(conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    AccountError::NotFound(format!("Account with id {} not found", account_id))
                }
                _ => AccountError::DatabaseError(e.to_string()),
            })?;

        Ok(account.into())
    }

    /// Looks up an account by its unique account number.
    pub fn find_by_account_number(&self, number: &str) -> Result<Option<Account>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        accounts
            .filter(account_number.eq(number))
            .first::<AccountDB>(&mut conn)
            .optional()
            .map(|found| found.map(Account::from))
            .map_err(|e| AccountError::DatabaseError(e.to_string()))
    }

    /// Retrieves one account of the given type for a customer.
    pub fn get_for_customer_in_tx(
        &self,
        conn: &mut SqliteConnection,
        customer: &str,
        kind: AccountType,
    ) -> Result<Account> {
        accounts
            .filter(customer_id.eq(customer))
            .filter(account_type.eq(kind.as_str()))
            .first::<AccountDB>(conn)
            .map(Account::from)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => AccountError::NotFound(format!(
                    "Customer {} has no {} account",
                    customer,
                    kind.as_str()
                )),
                _ => AccountError::DatabaseError(e.to_string()),
            })
    }

    /// Retrieves the savings and drawdown pair for a customer.
    pub fn get_pair_for_customer(&self, customer: &str) -> Result<(Account, Account)> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        let savings = self.get_for_customer_in_tx(&mut conn, customer, AccountType::Savings)?;
        let drawdown = self.get_for_customer_in_tx(&mut conn, customer, AccountType::Drawdown)?;
        Ok((savings, drawdown))
    }

    /// Writes a new balance for an account. Must run inside the payment
    /// transaction, with the borrower lock held.
    pub fn save_balance_in_tx(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        new_balance: Decimal,
    ) -> Result<()> {
        if new_balance < Decimal::ZERO {
            return Err(AccountError::InvalidData(format!(
                "Account {} balance would become negative",
                account_id
            )));
        }

        let affected = diesel::update(accounts.find(account_id))
            .set((
                balance.eq(new_balance.round_dp(DECIMAL_PRECISION).to_string()),
                updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        if affected == 0 {
            return Err(AccountError::NotFound(format!(
                "Account with id {} not found",
                account_id
            )));
        }

        Ok(())
    }

    /// Marks the registration fee as paid. Idempotent.
    pub fn mark_registration_fee_paid_in_tx(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
    ) -> Result<()> {
        diesel::update(accounts.find(account_id))
            .set((
                registration_fee_paid.eq(true),
                updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Updates the loan limit derived from the savings balance.
    pub fn set_loan_limit_in_tx(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        limit: Decimal,
    ) -> Result<()> {
        diesel::update(accounts.find(account_id))
            .set((
                loan_limit.eq(limit.round_dp(DECIMAL_PRECISION).to_string()),
                updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Sums `balance_after - balance_before` over every ledger entry for an
    /// account. Equals the current balance minus the initial balance when the
    /// conservation invariant holds.
    pub fn sum_transaction_deltas(&self, account: &str) -> Result<Decimal> {
        use crate::schema::transactions;

        let mut conn = get_connection(&self.pool)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        let snapshots: Vec<(String, String)> = transactions::table
            .filter(transactions::account_id.eq(account))
            .select((transactions::balance_before, transactions::balance_after))
            .load(&mut conn)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        let mut total = Decimal::ZERO;
        for (before, after) in snapshots {
            let before = Decimal::from_str(&before).unwrap_or_default();
            let after = Decimal::from_str(&after).unwrap_or_default();
            total += after - before;
        }
        Ok(total)
    }
}
