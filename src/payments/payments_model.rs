use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::payments_errors::{PaymentError, Result};
use crate::allocation::LoanAllocation;
use crate::constants::{DATE_FORMAT, DECIMAL_PRECISION};
use crate::loans::{Loan, LoanEvent};
use crate::transactions::Transaction;

/// How a payment reached the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mpesa,
    Cash,
    BankTransfer,
    DrawdownAuto,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::DrawdownAuto => "drawdown_auto",
        }
    }

    /// Methods created already confirmed, with no second approver.
    pub fn is_automatic(&self) -> bool {
        matches!(self, PaymentMethod::Mpesa | PaymentMethod::DrawdownAuto)
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mpesa" => Ok(PaymentMethod::Mpesa),
            "cash" => Ok(PaymentMethod::Cash),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "drawdown_auto" => Ok(PaymentMethod::DrawdownAuto),
            other => Err(PaymentError::InvalidData(format!(
                "Unknown payment method '{}'",
                other
            ))),
        }
    }
}

/// Approval state of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "rejected" => Ok(PaymentStatus::Rejected),
            other => Err(PaymentError::InvalidData(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Immutable record of money applied to one loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub payment_number: String,
    pub loan_id: String,
    pub borrower_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
    pub status: PaymentStatus,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub notes: Option<String>,
    pub auto_processed: bool,
    pub payment_date: NaiveDate,
    pub confirmed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Input model used internally when writing payment rows
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub loan_id: String,
    pub borrower_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
    pub status: PaymentStatus,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub notes: Option<String>,
    pub payment_date: NaiveDate,
    pub confirmed_at: Option<NaiveDateTime>,
}

/// Input model for the two-step manual entry flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPaymentInput {
    pub loan_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub notes: Option<String>,
}

impl ManualPaymentInput {
    /// Validates the manual payment entry
    pub fn validate(&self) -> Result<()> {
        if self.loan_id.trim().is_empty() {
            return Err(PaymentError::InvalidData(
                "Loan ID cannot be empty".to_string(),
            ));
        }
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidData(
                "Payment amount must be positive".to_string(),
            ));
        }
        if self.method.is_automatic() {
            return Err(PaymentError::InvalidData(format!(
                "Method '{}' cannot be entered manually",
                self.method.as_str()
            )));
        }
        Ok(())
    }
}

/// Result of applying a payment across a borrower's loans.
#[derive(Debug, Clone)]
pub struct WaterfallOutcome {
    pub payments: Vec<Payment>,
    pub allocations: Vec<LoanAllocation>,
    pub residual: Decimal,
    pub savings_transaction: Option<Transaction>,
}

impl WaterfallOutcome {
    pub fn total_applied(&self) -> Decimal {
        self.allocations.iter().map(|a| a.applied).sum()
    }
}

/// Result of applying a payment against a single loan.
#[derive(Debug, Clone)]
pub struct LoanPaymentOutcome {
    pub payment: Payment,
    pub loan: Loan,
    pub event: LoanEvent,
    /// Amount above the loan balance, deposited to savings.
    pub excess_to_savings: Decimal,
}

/// Database model for payments
#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, PartialEq, Debug, Clone,
)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct PaymentDB {
    pub id: String,
    pub payment_number: String,
    pub loan_id: String,
    pub borrower_id: String,
    pub amount: String,
    pub method: String,
    pub external_reference: Option<String>,
    pub status: String,
    pub balance_before: String,
    pub balance_after: String,
    pub notes: Option<String>,
    pub auto_processed: bool,
    pub payment_date: String,
    pub confirmed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<PaymentDB> for Payment {
    fn from(db: PaymentDB) -> Self {
        Self {
            id: db.id,
            payment_number: db.payment_number,
            loan_id: db.loan_id,
            borrower_id: db.borrower_id,
            amount: Decimal::from_str(&db.amount).unwrap_or_default(),
            method: PaymentMethod::from_str(&db.method).unwrap_or(PaymentMethod::Cash),
            external_reference: db.external_reference,
            status: PaymentStatus::from_str(&db.status).unwrap_or(PaymentStatus::Pending),
            balance_before: Decimal::from_str(&db.balance_before).unwrap_or_default(),
            balance_after: Decimal::from_str(&db.balance_after).unwrap_or_default(),
            notes: db.notes,
            auto_processed: db.auto_processed,
            payment_date: NaiveDate::parse_from_str(&db.payment_date, DATE_FORMAT)
                .unwrap_or_default(),
            confirmed_at: db.confirmed_at,
            created_at: db.created_at,
        }
    }
}

impl From<NewPayment> for PaymentDB {
    fn from(domain: NewPayment) -> Self {
        Self {
            id: String::new(),
            payment_number: String::new(),
            loan_id: domain.loan_id,
            borrower_id: domain.borrower_id,
            amount: domain.amount.round_dp(DECIMAL_PRECISION).to_string(),
            method: domain.method.as_str().to_string(),
            external_reference: domain.external_reference,
            status: domain.status.as_str().to_string(),
            balance_before: domain
                .balance_before
                .round_dp(DECIMAL_PRECISION)
                .to_string(),
            balance_after: domain.balance_after.round_dp(DECIMAL_PRECISION).to_string(),
            notes: domain.notes,
            auto_processed: domain.method.is_automatic(),
            payment_date: domain.payment_date.format(DATE_FORMAT).to_string(),
            confirmed_at: domain.confirmed_at,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
