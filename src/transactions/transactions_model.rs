use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::accounts::AccountError;
use crate::constants::DECIMAL_PRECISION;

/// Kind of ledger entry recorded against a cash account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    LoanRepayment,
    LoanDisbursement,
    FeeDeduction,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::LoanRepayment => "loan_repayment",
            TransactionType::LoanDisbursement => "loan_disbursement",
            TransactionType::FeeDeduction => "fee_deduction",
        }
    }
}

impl FromStr for TransactionType {
    type Err = AccountError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "transfer" => Ok(TransactionType::Transfer),
            "loan_repayment" => Ok(TransactionType::LoanRepayment),
            "loan_disbursement" => Ok(TransactionType::LoanDisbursement),
            "fee_deduction" => Ok(TransactionType::FeeDeduction),
            other => Err(AccountError::InvalidData(format!(
                "Unknown transaction type '{}'",
                other
            ))),
        }
    }
}

/// Immutable ledger entry for a cash account.
///
/// `balance_before`/`balance_after` snapshot the account at the moment the
/// entry was applied; entries are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub transaction_number: String,
    pub account_id: String,
    pub customer_id: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Input model for appending a ledger entry
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: String,
    pub customer_id: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub reference: Option<String>,
}

/// Database model for transactions
#[derive(Queryable, Identifiable, Insertable, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TransactionDB {
    pub id: String,
    pub transaction_number: String,
    pub account_id: String,
    pub customer_id: String,
    pub transaction_type: String,
    pub amount: String,
    pub balance_before: String,
    pub balance_after: String,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<TransactionDB> for Transaction {
    fn from(db: TransactionDB) -> Self {
        Self {
            id: db.id,
            transaction_number: db.transaction_number,
            account_id: db.account_id,
            customer_id: db.customer_id,
            transaction_type: TransactionType::from_str(&db.transaction_type)
                .unwrap_or(TransactionType::Deposit),
            amount: Decimal::from_str(&db.amount).unwrap_or_default(),
            balance_before: Decimal::from_str(&db.balance_before).unwrap_or_default(),
            balance_after: Decimal::from_str(&db.balance_after).unwrap_or_default(),
            description: db.description,
            reference: db.reference,
            created_at: db.created_at,
        }
    }
}

impl From<NewTransaction> for TransactionDB {
    fn from(domain: NewTransaction) -> Self {
        Self {
            id: String::new(),
            transaction_number: String::new(),
            account_id: domain.account_id,
            customer_id: domain.customer_id,
            transaction_type: domain.transaction_type.as_str().to_string(),
            amount: domain.amount.round_dp(DECIMAL_PRECISION).to_string(),
            balance_before: domain
                .balance_before
                .round_dp(DECIMAL_PRECISION)
                .to_string(),
            balance_after: domain.balance_after.round_dp(DECIMAL_PRECISION).to_string(),
            description: domain.description,
            reference: domain.reference,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
