mod common;

use common::{date, seed_customer, seed_loan, setup, start_of_test_time};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use microlend_core::db;
use microlend_core::ingestion::{
    EventRepository, IngestError, IngestOutcome, NewExternalPaymentEvent,
};
use microlend_core::loans::LoanStatus;
use microlend_core::transactions::TransactionRepository;

fn payload(code: &str, account_reference: &str, amount: Decimal) -> NewExternalPaymentEvent {
    NewExternalPaymentEvent {
        provider_txn_code: code.to_string(),
        account_reference: account_reference.to_string(),
        phone_number: Some("254700000001".to_string()),
        amount,
        payer_name: Some("Jane Wanjiku".to_string()),
        is_simulation: false,
        event_time: start_of_test_time().naive_utc(),
    }
}

#[test]
fn webhook_applies_waterfall_and_marks_the_event_processed() {
    let ctx = setup("webhook_applies");
    seed_customer(&ctx, "cust-1");
    let l1 = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 1, 10),
        date(2025, 12, 31),
        None,
    );
    seed_loan(
        &ctx,
        "cust-1",
        "LN-002",
        dec!(800),
        date(2025, 3, 5),
        date(2025, 12, 31),
        None,
    );

    let result = ctx
        .ingest_service
        .ingest(payload("TXN10001", "SAV-cust-1", dec!(1400)))
        .unwrap();

    let IngestOutcome::Accepted { event, outcome } = result else {
        panic!("expected the event to be accepted");
    };
    assert!(event.processed);
    assert!(event.processing_error.is_none());
    let summary = event.allocation_summary.expect("summary should be stored");
    assert!(summary.contains(&l1.id));

    // 500 + 800 to the loans, the last 100 to savings.
    assert_eq!(outcome.total_applied(), dec!(1300));
    assert_eq!(outcome.residual, dec!(100));
    assert_eq!(
        ctx.loan_repository.get_by_id(&l1.id).unwrap().status,
        LoanStatus::Completed
    );

    // The savings deposit carries the provider code as its reference.
    let ledger = TransactionRepository::new(ctx.pool.clone())
        .list_by_reference("TXN10001")
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, dec!(100));
}

#[test]
fn duplicate_delivery_does_not_touch_the_ledger_again() {
    let ctx = setup("duplicate_delivery");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 1, 10),
        date(2025, 12, 31),
        None,
    );

    let first = ctx
        .ingest_service
        .ingest(payload("TXN20001", "SAV-cust-1", dec!(200)))
        .unwrap();
    assert!(matches!(first, IngestOutcome::Accepted { .. }));

    let second = ctx
        .ingest_service
        .ingest(payload("TXN20001", "SAV-cust-1", dec!(200)))
        .unwrap();
    assert!(matches!(second, IngestOutcome::AlreadyProcessed(_)));

    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.balance, dec!(300));
    assert_eq!(ctx.payment_service.list_for_loan(&loan.id).unwrap().len(), 1);
}

#[test]
fn unknown_account_reference_is_stored_and_rejected() {
    let ctx = setup("unknown_reference");

    let result = ctx
        .ingest_service
        .ingest(payload("TXN30001", "SAV-nobody", dec!(200)))
        .unwrap();

    let IngestOutcome::Rejected { event, reason } = result else {
        panic!("expected the event to be rejected");
    };
    assert!(!event.processed);
    assert!(reason.contains("SAV-nobody"));

    // The rejection reason is recorded on the stored row for operators.
    let repository = EventRepository::new(ctx.pool.clone());
    let mut conn = db::get_connection(&ctx.pool).unwrap();
    let stored = repository.get_by_code_in_tx(&mut conn, "TXN30001").unwrap();
    assert!(stored.processing_error.is_some());
}

#[test]
fn retry_applies_an_event_once_the_account_exists() {
    let ctx = setup("retry_unprocessed");

    let first = ctx
        .ingest_service
        .ingest(payload("TXN31001", "SAV-cust-1", dec!(250)))
        .unwrap();
    assert!(matches!(first, IngestOutcome::Rejected { .. }));

    // The account reference resolves after onboarding catches up.
    seed_customer(&ctx, "cust-1");
    let applied = ctx.ingest_service.retry_unprocessed(10).unwrap();
    assert_eq!(applied, 1);

    let (savings, _) = ctx.account_service.get_accounts("cust-1").unwrap();
    assert_eq!(savings.balance, dec!(250));

    // A second retry pass finds nothing left to do.
    assert_eq!(ctx.ingest_service.retry_unprocessed(10).unwrap(), 0);
}

#[test]
fn amount_below_the_minimum_is_rejected() {
    let ctx = setup("below_minimum");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 1, 10),
        date(2025, 12, 31),
        None,
    );

    let result = ctx
        .ingest_service
        .ingest(payload("TXN40001", "SAV-cust-1", dec!(0.50)))
        .unwrap();
    assert!(matches!(result, IngestOutcome::Rejected { .. }));

    // The rejection is terminal: the retry pass must not apply it either.
    assert_eq!(ctx.ingest_service.retry_unprocessed(10).unwrap(), 0);
    assert_eq!(
        ctx.loan_repository.get_by_id(&loan.id).unwrap().balance,
        dec!(500)
    );
    let (savings, _) = ctx.account_service.get_accounts("cust-1").unwrap();
    assert_eq!(savings.balance, Decimal::ZERO);
}

#[test]
fn validation_checks_account_and_minimum_without_writing() {
    let ctx = setup("validation_endpoint");
    seed_customer(&ctx, "cust-1");

    let account = ctx.ingest_service.validate("SAV-cust-1", dec!(10)).unwrap();
    assert_eq!(account.customer_id, "cust-1");

    assert!(matches!(
        ctx.ingest_service.validate("SAV-nobody", dec!(10)),
        Err(IngestError::NotFound(_))
    ));
    assert!(matches!(
        ctx.ingest_service.validate("SAV-cust-1", dec!(0.10)),
        Err(IngestError::InvalidPayload(_))
    ));
}

#[test]
fn simulation_runs_the_full_ingestion_path() {
    let ctx = setup("simulation");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 1, 10),
        date(2025, 12, 31),
        None,
    );

    let result = ctx.ingest_service.simulate("SAV-cust-1", dec!(300)).unwrap();
    let IngestOutcome::Accepted { event, .. } = result else {
        panic!("expected the simulated event to be accepted");
    };
    assert!(event.is_simulation);
    assert!(event.provider_txn_code.starts_with("SIM-"));
    assert_eq!(
        ctx.loan_repository.get_by_id(&loan.id).unwrap().balance,
        dec!(200)
    );
}

#[test]
fn concurrent_duplicate_deliveries_apply_exactly_once() {
    let ctx = setup("concurrent_duplicates");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 1, 10),
        date(2025, 12, 31),
        None,
    );

    let accepted = std::sync::atomic::AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let result = ctx
                    .ingest_service
                    .ingest(payload("TXN50001", "SAV-cust-1", dec!(200)))
                    .unwrap();
                if matches!(result, IngestOutcome::Accepted { .. }) {
                    accepted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.balance, dec!(300));
    assert_eq!(ctx.payment_service.list_for_loan(&loan.id).unwrap().len(), 1);
}
