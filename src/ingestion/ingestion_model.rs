use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ingestion_errors::{IngestError, Result};
use crate::constants::DECIMAL_PRECISION;
use crate::payments::WaterfallOutcome;

/// Payment notification received from the mobile-money provider.
///
/// One row per `provider_txn_code`; the unique constraint on that column is
/// what makes ingestion idempotent across webhook retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPaymentEvent {
    pub id: String,
    pub provider_txn_code: String,
    pub account_reference: String,
    pub phone_number: Option<String>,
    pub amount: Decimal,
    pub payer_name: Option<String>,
    pub is_simulation: bool,
    pub processed: bool,
    pub processing_error: Option<String>,
    /// JSON allocation breakdown recorded when the event was applied.
    pub allocation_summary: Option<String>,
    pub event_time: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

/// Input model for an incoming provider event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExternalPaymentEvent {
    pub provider_txn_code: String,
    pub account_reference: String,
    pub phone_number: Option<String>,
    pub amount: Decimal,
    pub payer_name: Option<String>,
    pub is_simulation: bool,
    pub event_time: NaiveDateTime,
}

impl NewExternalPaymentEvent {
    /// Validates the raw payload before it is stored
    pub fn validate(&self) -> Result<()> {
        if self.provider_txn_code.trim().is_empty() {
            return Err(IngestError::InvalidPayload(
                "Provider transaction code cannot be empty".to_string(),
            ));
        }
        if self.account_reference.trim().is_empty() {
            return Err(IngestError::InvalidPayload(
                "Account reference cannot be empty".to_string(),
            ));
        }
        if self.amount <= Decimal::ZERO {
            return Err(IngestError::InvalidPayload(
                "Event amount must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of ingesting a provider event.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The event was applied to the ledger in this call.
    Accepted {
        event: ExternalPaymentEvent,
        outcome: WaterfallOutcome,
    },
    /// The event had already been applied; the ledger was not touched.
    AlreadyProcessed(ExternalPaymentEvent),
    /// The event was stored but could not be applied; the reason is also
    /// recorded on the row for operator review.
    Rejected {
        event: ExternalPaymentEvent,
        reason: String,
    },
}

/// Database model for external payment events
#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, PartialEq, Debug, Clone,
)]
#[diesel(table_name = crate::schema::external_payment_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct ExternalPaymentEventDB {
    pub id: String,
    pub provider_txn_code: String,
    pub account_reference: String,
    pub phone_number: Option<String>,
    pub amount: String,
    pub payer_name: Option<String>,
    pub is_simulation: bool,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub allocation_summary: Option<String>,
    pub event_time: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

impl From<ExternalPaymentEventDB> for ExternalPaymentEvent {
    fn from(db: ExternalPaymentEventDB) -> Self {
        Self {
            id: db.id,
            provider_txn_code: db.provider_txn_code,
            account_reference: db.account_reference,
            phone_number: db.phone_number,
            amount: Decimal::from_str(&db.amount).unwrap_or_default(),
            payer_name: db.payer_name,
            is_simulation: db.is_simulation,
            processed: db.processed,
            processing_error: db.processing_error,
            allocation_summary: db.allocation_summary,
            event_time: db.event_time,
            created_at: db.created_at,
        }
    }
}

impl From<NewExternalPaymentEvent> for ExternalPaymentEventDB {
    fn from(domain: NewExternalPaymentEvent) -> Self {
        Self {
            id: String::new(),
            provider_txn_code: domain.provider_txn_code,
            account_reference: domain.account_reference,
            phone_number: domain.phone_number,
            amount: domain.amount.round_dp(DECIMAL_PRECISION).to_string(),
            payer_name: domain.payer_name,
            is_simulation: domain.is_simulation,
            processed: false,
            processing_error: None,
            allocation_summary: None,
            event_time: domain.event_time,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
