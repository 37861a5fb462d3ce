use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::accounts_errors::{AccountError, Result};

/// Kind of cash account a customer holds.
///
/// Every customer gets exactly one of each at onboarding: savings collects
/// residual payment overflow, drawdown funds automatic loan installments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Savings,
    Drawdown,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Drawdown => "drawdown",
        }
    }
}

impl FromStr for AccountType {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "savings" => Ok(AccountType::Savings),
            "drawdown" => Ok(AccountType::Drawdown),
            other => Err(AccountError::InvalidData(format!(
                "Unknown account type '{}'",
                other
            ))),
        }
    }
}

/// Domain model representing a customer cash account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub customer_id: String,
    pub account_number: String,
    pub account_type: AccountType,
    pub balance: Decimal,
    pub registration_fee_paid: bool,
    pub loan_limit: Decimal,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Input model for creating a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub customer_id: String,
    pub account_number: String,
    pub account_type: AccountType,
}

impl NewAccount {
    /// Validates the new account data
    pub fn validate(&self) -> Result<()> {
        if self.customer_id.trim().is_empty() {
            return Err(AccountError::InvalidData(
                "Customer ID cannot be empty".to_string(),
            ));
        }
        if self.account_number.trim().is_empty() {
            return Err(AccountError::InvalidData(
                "Account number cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Database model for accounts
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
#[diesel(table_name = crate::schema::accounts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AccountDB {
    pub id: String,
    pub customer_id: String,
    pub account_number: String,
    pub account_type: String,
    pub balance: String,
    pub registration_fee_paid: bool,
    pub loan_limit: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// Conversion implementations
impl From<AccountDB> for Account {
    fn from(db: AccountDB) -> Self {
        Self {
            id: db.id,
            customer_id: db.customer_id,
            account_number: db.account_number,
            account_type: AccountType::from_str(&db.account_type)
                .unwrap_or(AccountType::Savings),
            balance: Decimal::from_str(&db.balance).unwrap_or_default(),
            registration_fee_paid: db.registration_fee_paid,
            loan_limit: Decimal::from_str(&db.loan_limit).unwrap_or_default(),
            status: db.status,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl From<NewAccount> for AccountDB {
    fn from(domain: NewAccount) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: String::new(),
            customer_id: domain.customer_id,
            account_number: domain.account_number,
            account_type: domain.account_type.as_str().to_string(),
            balance: Decimal::ZERO.to_string(),
            registration_fee_paid: false,
            loan_limit: Decimal::ZERO.to_string(),
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
