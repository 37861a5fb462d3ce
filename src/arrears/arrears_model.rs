use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::constants::DECIMAL_PRECISION;
use crate::loans::LoanError;

/// Lifecycle of an overdue-obligation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrearStatus {
    /// Bounded window after a missed automatic debit; not yet arrears.
    GracePeriod,
    New,
    InProgress,
    Resolved,
    WrittenOff,
}

impl ArrearStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrearStatus::GracePeriod => "grace_period",
            ArrearStatus::New => "new",
            ArrearStatus::InProgress => "in_progress",
            ArrearStatus::Resolved => "resolved",
            ArrearStatus::WrittenOff => "written_off",
        }
    }

    /// Open statuses are the ones covered by the storage-level partial unique
    /// index: at most one per loan.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ArrearStatus::GracePeriod | ArrearStatus::New | ArrearStatus::InProgress
        )
    }
}

impl FromStr for ArrearStatus {
    type Err = LoanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "grace_period" => Ok(ArrearStatus::GracePeriod),
            "new" => Ok(ArrearStatus::New),
            "in_progress" => Ok(ArrearStatus::InProgress),
            "resolved" => Ok(ArrearStatus::Resolved),
            "written_off" => Ok(ArrearStatus::WrittenOff),
            other => Err(LoanError::InvalidData(format!(
                "Unknown arrear status '{}'",
                other
            ))),
        }
    }
}

/// Domain model for a tracked overdue obligation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrear {
    pub id: String,
    pub loan_id: String,
    pub amount_overdue: Decimal,
    pub days_overdue: i32,
    pub status: ArrearStatus,
    pub grace_period_end: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Arrear {
    /// Whether the grace window has elapsed at the given instant.
    pub fn grace_expired_at(&self, now: NaiveDateTime) -> bool {
        self.status == ArrearStatus::GracePeriod
            && self.grace_period_end.is_some_and(|end| now > end)
    }
}

/// Input model for opening an arrear
#[derive(Debug, Clone)]
pub struct NewArrear {
    pub loan_id: String,
    pub amount_overdue: Decimal,
    pub days_overdue: i32,
    pub status: ArrearStatus,
    pub grace_period_end: Option<NaiveDateTime>,
}

/// Database model for arrears
#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, PartialEq, Debug, Clone,
)]
#[diesel(table_name = crate::schema::arrears)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct ArrearDB {
    pub id: String,
    pub loan_id: String,
    pub amount_overdue: String,
    pub days_overdue: i32,
    pub status: String,
    pub grace_period_end: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<ArrearDB> for Arrear {
    fn from(db: ArrearDB) -> Self {
        Self {
            id: db.id,
            loan_id: db.loan_id,
            amount_overdue: Decimal::from_str(&db.amount_overdue).unwrap_or_default(),
            days_overdue: db.days_overdue,
            status: ArrearStatus::from_str(&db.status).unwrap_or(ArrearStatus::New),
            grace_period_end: db.grace_period_end,
            resolved_at: db.resolved_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl From<NewArrear> for ArrearDB {
    fn from(domain: NewArrear) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: String::new(),
            loan_id: domain.loan_id,
            amount_overdue: domain
                .amount_overdue
                .round_dp(DECIMAL_PRECISION)
                .to_string(),
            days_overdue: domain.days_overdue,
            status: domain.status.as_str().to_string(),
            grace_period_end: domain.grace_period_end,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
