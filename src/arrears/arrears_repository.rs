use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::DECIMAL_PRECISION;
use crate::db::get_connection;
use crate::loans::{LoanError, Result};
use crate::schema::arrears;

use super::arrears_model::{Arrear, ArrearDB, ArrearStatus, NewArrear};

const OPEN_STATUSES: [&str; 3] = ["grace_period", "new", "in_progress"];

/// Repository for managing arrear records in the database
pub struct ArrearRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl ArrearRepository {
    /// Creates a new ArrearRepository instance
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Finds the open arrear for a loan, if any.
    pub fn find_open_for_loan(&self, loan_id: &str) -> Result<Option<Arrear>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;
        self.find_open_for_loan_in_tx(&mut conn, loan_id)
    }

    /// Finds the open arrear for a loan using the caller's connection.
    pub fn find_open_for_loan_in_tx(
        &self,
        conn: &mut SqliteConnection,
        loan_id: &str,
    ) -> Result<Option<Arrear>> {
        arrears::table
            .filter(arrears::loan_id.eq(loan_id))
            .filter(arrears::status.eq_any(OPEN_STATUSES))
            .first::<ArrearDB>(conn)
            .optional()
            .map(|found| found.map(Arrear::from))
            .map_err(|e| LoanError::DatabaseError(e.to_string()))
    }

    /// Opens an arrear unless the loan already has an open one. The partial
    /// unique index on open statuses makes the check-and-insert safe against
    /// concurrent sweeps: a loser of the race gets the existing row back with
    /// the created flag unset.
    pub fn create_if_absent_in_tx(
        &self,
        conn: &mut SqliteConnection,
        new_arrear: NewArrear,
    ) -> Result<(Arrear, bool)> {
        if let Some(existing) = self.find_open_for_loan_in_tx(conn, &new_arrear.loan_id)? {
            return Ok((existing, false));
        }

        let mut arrear_db: ArrearDB = new_arrear.into();
        arrear_db.id = Uuid::new_v4().to_string();

        match diesel::insert_into(arrears::table)
            .values(&arrear_db)
            .execute(conn)
        {
            Ok(_) => Ok((arrear_db.into(), true)),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => self
                .find_open_for_loan_in_tx(conn, &arrear_db.loan_id)?
                .map(|existing| (existing, false))
                .ok_or_else(|| {
                    LoanError::DatabaseError(
                        "Open arrear vanished after unique violation".to_string(),
                    )
                }),
            Err(e) => Err(LoanError::DatabaseError(e.to_string())),
        }
    }

    /// Marks the loan's open arrear as resolved.
    pub fn resolve_for_loan_in_tx(
        &self,
        conn: &mut SqliteConnection,
        loan_id: &str,
        resolved_at: NaiveDateTime,
    ) -> Result<Option<Arrear>> {
        let open = self.find_open_for_loan_in_tx(conn, loan_id)?;
        let Some(mut arrear) = open else {
            return Ok(None);
        };

        diesel::update(arrears::table.find(&arrear.id))
            .set((
                arrears::status.eq(ArrearStatus::Resolved.as_str()),
                arrears::resolved_at.eq(Some(resolved_at)),
                arrears::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        arrear.status = ArrearStatus::Resolved;
        arrear.resolved_at = Some(resolved_at);
        Ok(Some(arrear))
    }

    /// Escalates a grace-period arrear to full arrears status.
    pub fn escalate_in_tx(&self, conn: &mut SqliteConnection, arrear_id: &str) -> Result<()> {
        let affected = diesel::update(
            arrears::table
                .find(arrear_id)
                .filter(arrears::status.eq(ArrearStatus::GracePeriod.as_str())),
        )
        .set((
            arrears::status.eq(ArrearStatus::New.as_str()),
            arrears::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        if affected == 0 {
            // Another sweep escalated it first; nothing to do.
            return Ok(());
        }
        Ok(())
    }

    /// Updates aging fields on an open arrear.
    pub fn age_in_tx(
        &self,
        conn: &mut SqliteConnection,
        arrear_id: &str,
        days_overdue: i32,
        amount_overdue: Decimal,
    ) -> Result<()> {
        diesel::update(arrears::table.find(arrear_id))
            .set((
                arrears::days_overdue.eq(days_overdue),
                arrears::amount_overdue
                    .eq(amount_overdue.round_dp(DECIMAL_PRECISION).to_string()),
                arrears::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Lists all arrears for a loan, newest first (audit/history view).
    pub fn list_for_loan(&self, loan_id: &str) -> Result<Vec<Arrear>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| LoanError::DatabaseError(e.to_string()))?;

        arrears::table
            .filter(arrears::loan_id.eq(loan_id))
            .order(arrears::created_at.desc())
            .load::<ArrearDB>(&mut conn)
            .map(|rows| rows.into_iter().map(Arrear::from).collect())
            .map_err(|e| LoanError::DatabaseError(e.to_string()))
    }
}
