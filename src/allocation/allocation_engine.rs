use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::loans::Loan;

/// Amount applied to one loan by the waterfall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanAllocation {
    pub loan_id: String,
    pub loan_number: String,
    pub applied: Decimal,
    /// Loan balance once `applied` lands.
    pub balance_after: Decimal,
}

/// Result of allocating a payment across a borrower's open loans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationOutcome {
    pub allocations: Vec<LoanAllocation>,
    /// Unapplied remainder, deposited to savings by the caller.
    pub residual: Decimal,
}

impl AllocationOutcome {
    pub fn total_applied(&self) -> Decimal {
        self.allocations.iter().map(|a| a.applied).sum()
    }
}

/// Allocates a payment across loans in the order given, oldest obligation
/// first. Pure function: no I/O, no clock.
///
/// Each loan receives `min(remaining, balance)`; whatever survives the walk
/// is returned as residual. Loans that are not open are skipped. The caller
/// supplies loans sorted by `start_date` ascending (loan ID as tie-breaker);
/// the repository query guarantees that order.
///
/// Invariant: `sum(applied) + residual == amount`, exactly.
pub fn allocate(amount: Decimal, loans: &[Loan]) -> AllocationOutcome {
    let mut remaining = amount.max(Decimal::ZERO);
    let mut allocations = Vec::new();

    for loan in loans {
        if remaining.is_zero() {
            break;
        }
        if !loan.is_open() {
            continue;
        }

        let applied = remaining.min(loan.balance);
        if applied > Decimal::ZERO {
            allocations.push(LoanAllocation {
                loan_id: loan.id.clone(),
                loan_number: loan.loan_number.clone(),
                applied,
                balance_after: loan.balance - applied,
            });
            remaining -= applied;
        }
    }

    AllocationOutcome {
        allocations,
        residual: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loans::LoanStatus;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn loan(id: &str, balance: Decimal, start: (i32, u32, u32)) -> Loan {
        let now = chrono::Utc::now().naive_utc();
        Loan {
            id: id.to_string(),
            loan_number: format!("LN-{}", id),
            borrower_id: "cust-1".to_string(),
            principal_amount: balance,
            interest_amount: Decimal::ZERO,
            fee_amount: Decimal::ZERO,
            total_amount: balance,
            amount_paid: Decimal::ZERO,
            balance,
            status: LoanStatus::Active,
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            next_payment_date: None,
            next_payment_amount: None,
            allows_installments: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn payment_covers_oldest_loan_first() {
        let loans = vec![
            loan("l1", dec!(500), (2024, 1, 1)),
            loan("l2", dec!(800), (2024, 3, 1)),
        ];

        let outcome = allocate(dec!(300), &loans);
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].loan_id, "l1");
        assert_eq!(outcome.allocations[0].applied, dec!(300));
        assert_eq!(outcome.residual, Decimal::ZERO);
    }

    #[test]
    fn waterfall_spills_into_second_loan() {
        // Two loans, 500 + 800; a 1200 payment completes the first and
        // leaves 100 on the second.
        let loans = vec![
            loan("l1", dec!(500), (2024, 1, 1)),
            loan("l2", dec!(800), (2024, 3, 1)),
        ];

        let outcome = allocate(dec!(1200), &loans);
        assert_eq!(outcome.allocations.len(), 2);
        assert_eq!(outcome.allocations[0].applied, dec!(500));
        assert_eq!(outcome.allocations[0].balance_after, Decimal::ZERO);
        assert_eq!(outcome.allocations[1].applied, dec!(700));
        assert_eq!(outcome.allocations[1].balance_after, dec!(100));
        assert_eq!(outcome.residual, Decimal::ZERO);
    }

    #[test]
    fn overflow_becomes_residual() {
        let loans = vec![loan("l1", dec!(500), (2024, 1, 1))];

        let outcome = allocate(dec!(650.75), &loans);
        assert_eq!(outcome.total_applied(), dec!(500));
        assert_eq!(outcome.residual, dec!(150.75));
    }

    #[test]
    fn no_open_loans_means_full_residual() {
        let mut closed = loan("l1", Decimal::ZERO, (2024, 1, 1));
        closed.status = LoanStatus::Completed;

        let outcome = allocate(dec!(200), &[closed]);
        assert!(outcome.allocations.is_empty());
        assert_eq!(outcome.residual, dec!(200));
    }

    #[test]
    fn conservation_holds_across_amounts() {
        let loans = vec![
            loan("l1", dec!(123.45), (2024, 1, 1)),
            loan("l2", dec!(67.89), (2024, 2, 1)),
            loan("l3", dec!(1000.00), (2024, 3, 1)),
        ];

        let mut amount = dec!(0.01);
        while amount < dec!(1500) {
            let outcome = allocate(amount, &loans);
            assert_eq!(
                outcome.total_applied() + outcome.residual,
                amount,
                "conservation violated at {}",
                amount
            );
            for allocation in &outcome.allocations {
                assert!(allocation.applied > Decimal::ZERO);
                assert!(allocation.balance_after >= Decimal::ZERO);
            }
            amount += dec!(37.13);
        }
    }

    #[test]
    fn allocation_is_deterministic() {
        let loans = vec![
            loan("l1", dec!(250), (2024, 1, 1)),
            loan("l2", dec!(250), (2024, 1, 1)),
        ];

        let first = allocate(dec!(300), &loans);
        let second = allocate(dec!(300), &loans);
        assert_eq!(first, second);
    }
}
