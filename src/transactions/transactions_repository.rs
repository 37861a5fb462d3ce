use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::accounts::{AccountError, Result};
use crate::constants::TRANSACTION_NUMBER_PREFIX;
use crate::db::get_connection;
use crate::schema::transactions;

use super::transactions_model::{NewTransaction, Transaction, TransactionDB};

/// Repository for the append-only account ledger
pub struct TransactionRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository instance
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Appends a ledger entry inside the caller's transaction.
    pub fn create_in_tx(
        &self,
        conn: &mut SqliteConnection,
        new_transaction: NewTransaction,
    ) -> Result<Transaction> {
        let mut transaction_db: TransactionDB = new_transaction.into();
        transaction_db.id = Uuid::new_v4().to_string();
        transaction_db.transaction_number = format!(
            "{}-{}",
            TRANSACTION_NUMBER_PREFIX,
            &transaction_db.id[..8].to_uppercase()
        );

        diesel::insert_into(transactions::table)
            .values(&transaction_db)
            .execute(conn)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        Ok(transaction_db.into())
    }

    /// Lists ledger entries for an account, oldest first.
    pub fn list_for_account(&self, account_id: &str) -> Result<Vec<Transaction>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        transactions::table
            .filter(transactions::account_id.eq(account_id))
            .order(transactions::created_at.asc())
            .load::<TransactionDB>(&mut conn)
            .map(|rows| rows.into_iter().map(Transaction::from).collect())
            .map_err(|e| AccountError::DatabaseError(e.to_string()))
    }

    /// Lists ledger entries carrying the given reference (payment number or
    /// provider transaction code).
    pub fn list_by_reference(&self, reference: &str) -> Result<Vec<Transaction>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| AccountError::DatabaseError(e.to_string()))?;

        transactions::table
            .filter(transactions::reference.eq(reference))
            .order(transactions::created_at.asc())
            .load::<TransactionDB>(&mut conn)
            .map(|rows| rows.into_iter().map(Transaction::from).collect())
            .map_err(|e| AccountError::DatabaseError(e.to_string()))
    }
}
