use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side-effect raised after a ledger write commits.
///
/// Events are best-effort: delivery failure is logged and never feeds back
/// into the transaction that produced the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotificationEvent {
    PaymentConfirmed {
        customer_id: String,
        loan_number: String,
        amount: Decimal,
        remaining_balance: Decimal,
    },
    OfficerPaymentAlert {
        customer_id: String,
        amount: Decimal,
    },
    SavingsDeposit {
        customer_id: String,
        amount: Decimal,
        new_balance: Decimal,
    },
    RegistrationComplete {
        customer_id: String,
        account_number: String,
        loan_limit: Decimal,
    },
    GracePeriodStarted {
        customer_id: String,
        loan_number: String,
        shortfall: Decimal,
        deadline: NaiveDateTime,
    },
    ArrearsNotice {
        customer_id: String,
        loan_number: String,
        balance: Decimal,
        days_overdue: i32,
    },
    PaymentReminder {
        customer_id: String,
        loan_number: String,
        amount_due: Decimal,
        due_date: NaiveDate,
        days_remaining: i64,
    },
}
