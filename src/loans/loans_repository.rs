use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::DATE_FORMAT;
use crate::db::get_connection;
use crate::loans::{LoanError, Result};
use crate::schema::loans;

use super::loans_model::{Loan, LoanDB, LoanStatus, NewLoan};

/// Repository for managing loan data in the database
pub struct LoanRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl LoanRepository {
    /// Creates a new LoanRepository instance
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Creates a loan at disbursement
    pub fn create(&self, new_loan: NewLoan) -> Result<Loan> {
        new_loan.validate()?;

        let mut loan_db: LoanDB = new_loan.into();
        loan_db.id = Uuid::new_v4().to_string();

        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        diesel::insert_into(loans::table)
            .values(&loan_db)
            .execute(&mut conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        Ok(loan_db.into())
    }

    /// Retrieves a loan by its ID
    pub fn get_by_id(&self, loan_id: &str) -> Result<Loan> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;
        self.get_by_id_in_tx(&mut conn, loan_id)
    }

    /// Retrieves a loan by its ID using the caller's connection
    pub fn get_by_id_in_tx(&self, conn: &mut SqliteConnection, loan_id: &str) -> Result<Loan> {
        loans::table
            .find(loan_id)
            .first::<LoanDB>(conn)
            .map(Loan::from)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    LoanError::NotFound(format!("Loan with id {} not found", loan_id))
                }
                _ => LoanError::DatabaseError(e.to_string()),
            })
    }

    /// Retrieves a borrower's open loans (active or arrears, balance > 0) in
    /// allocation order: oldest `start_date` first, loan ID as tie-breaker so
    /// the order is deterministic.
    pub fn get_open_for_borrower_in_tx(
        &self,
        conn: &mut SqliteConnection,
        borrower: &str,
    ) -> Result<Vec<Loan>> {
        let rows = loans::table
            .filter(loans::borrower_id.eq(borrower))
            .filter(loans::status.eq_any([
                LoanStatus::Active.as_str(),
                LoanStatus::Arrears.as_str(),
            ]))
            .order((loans::start_date.asc(), loans::id.asc()))
            .load::<LoanDB>(conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(Loan::from)
            .filter(|loan| loan.balance > rust_decimal::Decimal::ZERO)
            .collect())
    }

    /// Loans due for an automatic debit on or before the given day.
    pub fn get_due_for_payment(&self, today: NaiveDate) -> Result<Vec<Loan>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        let cutoff = today.format(DATE_FORMAT).to_string();
        let rows = loans::table
            .filter(loans::status.eq(LoanStatus::Active.as_str()))
            .filter(loans::next_payment_date.le(cutoff))
            .order((loans::next_payment_date.asc(), loans::id.asc()))
            .load::<LoanDB>(&mut conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(Loan::from)
            .filter(|loan| loan.balance > rust_decimal::Decimal::ZERO)
            .collect())
    }

    /// Active loans whose final due date has passed.
    pub fn get_overdue(&self, today: NaiveDate) -> Result<Vec<Loan>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        let cutoff = today.format(DATE_FORMAT).to_string();
        let rows = loans::table
            .filter(loans::status.eq(LoanStatus::Active.as_str()))
            .filter(loans::due_date.lt(cutoff))
            .load::<LoanDB>(&mut conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(Loan::from)
            .filter(|loan| loan.balance > rust_decimal::Decimal::ZERO)
            .collect())
    }

    /// Loans already classified as arrears, for the daily aging pass.
    pub fn get_in_arrears(&self) -> Result<Vec<Loan>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        loans::table
            .filter(loans::status.eq(LoanStatus::Arrears.as_str()))
            .load::<LoanDB>(&mut conn)
            .map(|rows| rows.into_iter().map(Loan::from).collect())
            .map_err(|e| LoanError::DatabaseError(e.to_string()))
    }

    /// Reads loans due on exactly the given date, for reminders.
    pub fn get_due_on(&self, date: NaiveDate) -> Result<Vec<Loan>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        let day = date.format(DATE_FORMAT).to_string();
        let rows = loans::table
            .filter(loans::status.eq(LoanStatus::Active.as_str()))
            .filter(loans::next_payment_date.eq(day))
            .load::<LoanDB>(&mut conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(Loan::from)
            .filter(|loan| loan.balance > rust_decimal::Decimal::ZERO)
            .collect())
    }

    /// Persists loan state after an allocation, inside the payment
    /// transaction. The caller holds the borrower lock, so the row cannot
    /// have changed since it was read.
    pub fn save_in_tx(&self, conn: &mut SqliteConnection, loan: &Loan) -> Result<()> {
        let loan_db: LoanDB = loan.into();

        let affected = diesel::update(loans::table.find(&loan.id))
            .set(&loan_db)
            .execute(conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        if affected == 0 {
            return Err(LoanError::NotFound(format!(
                "Loan with id {} not found",
                loan.id
            )));
        }

        Ok(())
    }
}
