use chrono::{Duration, NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::loans_errors::{LoanError, Result};
use crate::constants::{DATE_FORMAT, DECIMAL_PRECISION};

/// Lifecycle status of a loan.
///
/// `Arrears` is a one-way door: an arrears loan only exits through
/// `Completed` (paid off) or `WrittenOff` (explicit collector action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Arrears,
    Completed,
    WrittenOff,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Arrears => "arrears",
            LoanStatus::Completed => "completed",
            LoanStatus::WrittenOff => "written_off",
        }
    }

    pub fn can_transition_to(&self, to: LoanStatus) -> bool {
        matches!(
            (self, to),
            (LoanStatus::Active, LoanStatus::Arrears)
                | (LoanStatus::Active, LoanStatus::Completed)
                | (LoanStatus::Arrears, LoanStatus::Completed)
                | (LoanStatus::Arrears, LoanStatus::WrittenOff)
        )
    }
}

impl FromStr for LoanStatus {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(LoanStatus::Active),
            "arrears" => Ok(LoanStatus::Arrears),
            "completed" => Ok(LoanStatus::Completed),
            "written_off" => Ok(LoanStatus::WrittenOff),
            other => Err(LoanError::InvalidData(format!(
                "Unknown loan status '{}'",
                other
            ))),
        }
    }
}

/// Event raised by applying an allocation to a loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanEvent {
    /// Balance reached zero; the loan is completed and immutable.
    Completed,
    /// Partial payment on an installment loan; the next due date advanced.
    InstallmentAdvanced { next_due: NaiveDate },
    /// Partial payment on a loan without installments.
    Applied,
}

/// Domain model representing a loan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub loan_number: String,
    pub borrower_id: String,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub fee_amount: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub balance: Decimal,
    pub status: LoanStatus,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub next_payment_date: Option<NaiveDate>,
    pub next_payment_amount: Option<Decimal>,
    pub allows_installments: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Loan {
    /// Whether this loan still takes allocations.
    pub fn is_open(&self) -> bool {
        matches!(self.status, LoanStatus::Active | LoanStatus::Arrears)
            && self.balance > Decimal::ZERO
    }

    /// Amount the next automatic debit should collect.
    pub fn required_payment(&self) -> Decimal {
        self.next_payment_amount
            .unwrap_or(self.balance)
            .min(self.balance)
    }

    /// Applies an allocation to the loan state. Pure; persistence happens in
    /// the repository afterwards, inside the payment transaction.
    ///
    /// The applied amount must already be capped at the balance by the
    /// allocation engine; this enforces the non-negativity invariant.
    pub fn apply_allocation(
        &mut self,
        applied: Decimal,
        today: NaiveDate,
        installment_period: Duration,
    ) -> Result<LoanEvent> {
        if applied <= Decimal::ZERO {
            return Err(LoanError::InvalidData(
                "Applied amount must be positive".to_string(),
            ));
        }
        if applied > self.balance {
            return Err(LoanError::InvalidData(format!(
                "Applied amount {} exceeds loan balance {}",
                applied, self.balance
            )));
        }
        if !self.is_open() {
            return Err(LoanError::InvalidData(format!(
                "Loan {} is not open for payments",
                self.loan_number
            )));
        }

        self.amount_paid += applied;
        self.balance -= applied;
        self.updated_at = chrono::Utc::now().naive_utc();

        if self.balance.is_zero() {
            self.transition_to(LoanStatus::Completed)?;
            self.next_payment_date = None;
            self.next_payment_amount = None;
            return Ok(LoanEvent::Completed);
        }

        if self.allows_installments {
            let next_due = today + installment_period;
            self.next_payment_date = Some(next_due);
            self.next_payment_amount =
                Some(self.next_payment_amount.unwrap_or(self.balance).min(self.balance));
            return Ok(LoanEvent::InstallmentAdvanced { next_due });
        }

        Ok(LoanEvent::Applied)
    }

    /// Moves the loan to a new status, rejecting illegal transitions.
    pub fn transition_to(&mut self, to: LoanStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(LoanError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        self.updated_at = chrono::Utc::now().naive_utc();
        Ok(())
    }
}

/// Input model for creating a loan at disbursement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLoan {
    pub loan_number: String,
    pub borrower_id: String,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub fee_amount: Decimal,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub next_payment_date: Option<NaiveDate>,
    pub next_payment_amount: Option<Decimal>,
    pub allows_installments: bool,
}

impl NewLoan {
    /// Validates the new loan data
    pub fn validate(&self) -> Result<()> {
        if self.loan_number.trim().is_empty() {
            return Err(LoanError::InvalidData(
                "Loan number cannot be empty".to_string(),
            ));
        }
        if self.borrower_id.trim().is_empty() {
            return Err(LoanError::InvalidData(
                "Borrower ID cannot be empty".to_string(),
            ));
        }
        if self.principal_amount <= Decimal::ZERO {
            return Err(LoanError::InvalidData(
                "Principal amount must be positive".to_string(),
            ));
        }
        if self.interest_amount < Decimal::ZERO || self.fee_amount < Decimal::ZERO {
            return Err(LoanError::InvalidData(
                "Interest and fee amounts cannot be negative".to_string(),
            ));
        }
        if self.due_date < self.start_date {
            return Err(LoanError::InvalidData(
                "Due date cannot precede start date".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_amount(&self) -> Decimal {
        self.principal_amount + self.interest_amount + self.fee_amount
    }
}

/// Database model for loans
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::loans)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct LoanDB {
    pub id: String,
    pub loan_number: String,
    pub borrower_id: String,
    pub principal_amount: String,
    pub interest_amount: String,
    pub fee_amount: String,
    pub total_amount: String,
    pub amount_paid: String,
    pub balance: String,
    pub status: String,
    pub start_date: String,
    pub due_date: String,
    pub next_payment_date: Option<String>,
    pub next_payment_amount: Option<String>,
    pub allows_installments: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// Conversion implementations
impl From<LoanDB> for Loan {
    fn from(db: LoanDB) -> Self {
        Self {
            id: db.id,
            loan_number: db.loan_number,
            borrower_id: db.borrower_id,
            principal_amount: Decimal::from_str(&db.principal_amount).unwrap_or_default(),
            interest_amount: Decimal::from_str(&db.interest_amount).unwrap_or_default(),
            fee_amount: Decimal::from_str(&db.fee_amount).unwrap_or_default(),
            total_amount: Decimal::from_str(&db.total_amount).unwrap_or_default(),
            amount_paid: Decimal::from_str(&db.amount_paid).unwrap_or_default(),
            balance: Decimal::from_str(&db.balance).unwrap_or_default(),
            status: LoanStatus::from_str(&db.status).unwrap_or(LoanStatus::Active),
            start_date: NaiveDate::parse_from_str(&db.start_date, DATE_FORMAT)
                .unwrap_or_default(),
            due_date: NaiveDate::parse_from_str(&db.due_date, DATE_FORMAT).unwrap_or_default(),
            next_payment_date: db
                .next_payment_date
                .and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok()),
            next_payment_amount: db
                .next_payment_amount
                .and_then(|a| Decimal::from_str(&a).ok()),
            allows_installments: db.allows_installments,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl From<&Loan> for LoanDB {
    fn from(domain: &Loan) -> Self {
        Self {
            id: domain.id.clone(),
            loan_number: domain.loan_number.clone(),
            borrower_id: domain.borrower_id.clone(),
            principal_amount: domain
                .principal_amount
                .round_dp(DECIMAL_PRECISION)
                .to_string(),
            interest_amount: domain
                .interest_amount
                .round_dp(DECIMAL_PRECISION)
                .to_string(),
            fee_amount: domain.fee_amount.round_dp(DECIMAL_PRECISION).to_string(),
            total_amount: domain.total_amount.round_dp(DECIMAL_PRECISION).to_string(),
            amount_paid: domain.amount_paid.round_dp(DECIMAL_PRECISION).to_string(),
            balance: domain.balance.round_dp(DECIMAL_PRECISION).to_string(),
            status: domain.status.as_str().to_string(),
            start_date: domain.start_date.format(DATE_FORMAT).to_string(),
            due_date: domain.due_date.format(DATE_FORMAT).to_string(),
            next_payment_date: domain
                .next_payment_date
                .map(|d| d.format(DATE_FORMAT).to_string()),
            next_payment_amount: domain
                .next_payment_amount
                .map(|a| a.round_dp(DECIMAL_PRECISION).to_string()),
            allows_installments: domain.allows_installments,
            created_at: domain.created_at,
            updated_at: domain.updated_at,
        }
    }
}

impl From<NewLoan> for LoanDB {
    fn from(domain: NewLoan) -> Self {
        let now = chrono::Utc::now().naive_utc();
        let total = domain.total_amount();
        Self {
            id: String::new(),
            loan_number: domain.loan_number,
            borrower_id: domain.borrower_id,
            principal_amount: domain
                .principal_amount
                .round_dp(DECIMAL_PRECISION)
                .to_string(),
            interest_amount: domain
                .interest_amount
                .round_dp(DECIMAL_PRECISION)
                .to_string(),
            fee_amount: domain.fee_amount.round_dp(DECIMAL_PRECISION).to_string(),
            total_amount: total.round_dp(DECIMAL_PRECISION).to_string(),
            amount_paid: Decimal::ZERO.to_string(),
            balance: total.round_dp(DECIMAL_PRECISION).to_string(),
            status: LoanStatus::Active.as_str().to_string(),
            start_date: domain.start_date.format(DATE_FORMAT).to_string(),
            due_date: domain.due_date.format(DATE_FORMAT).to_string(),
            next_payment_date: domain
                .next_payment_date
                .map(|d| d.format(DATE_FORMAT).to_string()),
            next_payment_amount: domain
                .next_payment_amount
                .map(|a| a.round_dp(DECIMAL_PRECISION).to_string()),
            allows_installments: domain.allows_installments,
            created_at: now,
            updated_at: now,
        }
    }
}
