use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use super::payments_errors::{PaymentError, Result};
use super::payments_model::{NewPayment, Payment, PaymentDB, PaymentStatus};
use crate::constants::{DECIMAL_PRECISION, PAYMENT_NUMBER_PREFIX};
use crate::db::{get_connection, DbPool};
use crate::schema::payments;
use crate::schema::payments::dsl::*;

/// Repository for payment records
pub struct PaymentRepository {
    pool: Arc<DbPool>,
}

impl PaymentRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Inserts a payment row inside an open transaction, assigning the
    /// identifier and human-readable payment number.
    pub fn create_in_tx(
        &self,
        conn: &mut SqliteConnection,
        new_payment: NewPayment,
    ) -> Result<Payment> {
        let mut payment_db = PaymentDB::from(new_payment);
        let uuid = Uuid::new_v4().to_string();
        payment_db.payment_number = format!(
            "{}-{}",
            PAYMENT_NUMBER_PREFIX,
            uuid[..8].to_uppercase()
        );
        payment_db.id = uuid;

        let inserted = diesel::insert_into(payments::table)
            .values(&payment_db)
            .returning(PaymentDB::as_returning())
            .get_result(conn)?;

        Ok(Payment::from(inserted))
    }

    pub fn get_by_id(&self, payment_id: &str) -> Result<Payment> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        self.get_by_id_in_tx(&mut conn, payment_id)
    }

    pub fn get_by_id_in_tx(
        &self,
        conn: &mut SqliteConnection,
        payment_id: &str,
    ) -> Result<Payment> {
        let payment_db = payments
            .find(payment_id)
            .first::<PaymentDB>(conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    PaymentError::NotFound(format!("Payment not found: {}", payment_id))
                }
                _ => PaymentError::from(e),
            })?;
        Ok(Payment::from(payment_db))
    }

    pub fn list_for_loan(&self, for_loan_id: &str) -> Result<Vec<Payment>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        let rows = payments
            .filter(loan_id.eq(for_loan_id))
            .order(created_at.desc())
            .load::<PaymentDB>(&mut conn)?;
        Ok(rows.into_iter().map(Payment::from).collect())
    }

    pub fn list_pending(&self) -> Result<Vec<Payment>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        let rows = payments
            .filter(status.eq(PaymentStatus::Pending.as_str()))
            .order(created_at.asc())
            .load::<PaymentDB>(&mut conn)?;
        Ok(rows.into_iter().map(Payment::from).collect())
    }

    /// Flips a pending payment to confirmed with its final balance snapshots.
    /// Returns the updated row.
    pub fn mark_confirmed_in_tx(
        &self,
        conn: &mut SqliteConnection,
        payment_id: &str,
        snapshot_before: rust_decimal::Decimal,
        snapshot_after: rust_decimal::Decimal,
        confirmed: NaiveDateTime,
    ) -> Result<Payment> {
        let updated = diesel::update(
            payments
                .filter(id.eq(payment_id))
                .filter(status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            status.eq(PaymentStatus::Confirmed.as_str()),
            balance_before.eq(snapshot_before.round_dp(DECIMAL_PRECISION).to_string()),
            balance_after.eq(snapshot_after.round_dp(DECIMAL_PRECISION).to_string()),
            confirmed_at.eq(Some(confirmed)),
        ))
        .execute(conn)?;

        if updated == 0 {
            return Err(PaymentError::InvalidState(format!(
                "Payment {} is not pending",
                payment_id
            )));
        }

        self.get_by_id_in_tx(conn, payment_id)
    }

    /// Flips a pending payment to rejected, recording the reason in notes.
    pub fn mark_rejected_in_tx(
        &self,
        conn: &mut SqliteConnection,
        payment_id: &str,
        reason: &str,
    ) -> Result<Payment> {
        let updated = diesel::update(
            payments
                .filter(id.eq(payment_id))
                .filter(status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            status.eq(PaymentStatus::Rejected.as_str()),
            notes.eq(Some(reason.to_string())),
        ))
        .execute(conn)?;

        if updated == 0 {
            return Err(PaymentError::InvalidState(format!(
                "Payment {} is not pending",
                payment_id
            )));
        }

        self.get_by_id_in_tx(conn, payment_id)
    }
}
