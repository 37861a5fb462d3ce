use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use super::ingestion_errors::{IngestError, Result};
use super::ingestion_model::{ExternalPaymentEvent, ExternalPaymentEventDB, NewExternalPaymentEvent};
use crate::db::{get_connection, DbPool};
use crate::schema::external_payment_events;
use crate::schema::external_payment_events::dsl::*;

/// Repository for external payment events
pub struct EventRepository {
    pool: Arc<DbPool>,
}

impl EventRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Inserts the event, or returns the existing row when the provider
    /// transaction code has been seen before. The boolean is true when this
    /// call created the row.
    ///
    /// `ON CONFLICT DO NOTHING` on the unique code column makes concurrent
    /// deliveries of the same webhook collapse onto a single row.
    pub fn insert_or_get(
        &self,
        new_event: NewExternalPaymentEvent,
    ) -> Result<(ExternalPaymentEvent, bool)> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IngestError::DatabaseError(e.to_string()))?;

        let mut event_db = ExternalPaymentEventDB::from(new_event);
        event_db.id = Uuid::new_v4().to_string();

        let inserted = diesel::insert_into(external_payment_events::table)
            .values(&event_db)
            .on_conflict(provider_txn_code)
            .do_nothing()
            .execute(&mut conn)?;

        let stored = self.get_by_code_in_tx(&mut conn, &event_db.provider_txn_code)?;
        Ok((stored, inserted == 1))
    }

    pub fn get_by_code_in_tx(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<ExternalPaymentEvent> {
        external_payment_events
            .filter(provider_txn_code.eq(code))
            .first::<ExternalPaymentEventDB>(conn)
            .map(ExternalPaymentEvent::from)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    IngestError::NotFound(format!("Event with code {} not found", code))
                }
                _ => IngestError::from(e),
            })
    }

    /// Marks the event processed, storing the allocation breakdown. Runs in
    /// the same transaction as the ledger writes it describes.
    pub fn mark_processed_in_tx(
        &self,
        conn: &mut SqliteConnection,
        event_id: &str,
        summary: &str,
    ) -> Result<()> {
        let affected = diesel::update(
            external_payment_events
                .find(event_id)
                .filter(processed.eq(false)),
        )
        .set((
            processed.eq(true),
            processing_error.eq(None::<String>),
            allocation_summary.eq(Some(summary.to_string())),
        ))
        .execute(conn)?;

        if affected == 0 {
            return Err(IngestError::InvalidPayload(format!(
                "Event {} was already processed",
                event_id
            )));
        }
        Ok(())
    }

    /// Records a processing failure on the event row. Runs on its own
    /// connection, after the failed transaction has rolled back.
    pub fn record_error(&self, event_id: &str, message: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IngestError::DatabaseError(e.to_string()))?;

        diesel::update(external_payment_events.find(event_id))
            .set(processing_error.eq(Some(message.to_string())))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Stored events that have not been applied yet, oldest first.
    pub fn list_unprocessed(&self, limit: i64) -> Result<Vec<ExternalPaymentEvent>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IngestError::DatabaseError(e.to_string()))?;

        let rows = external_payment_events
            .filter(processed.eq(false))
            .order(created_at.asc())
            .limit(limit)
            .load::<ExternalPaymentEventDB>(&mut conn)?;
        Ok(rows.into_iter().map(ExternalPaymentEvent::from).collect())
    }
}
