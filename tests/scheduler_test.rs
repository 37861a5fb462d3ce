mod common;

use chrono::Duration;
use common::{
    date, fund_account, seed_customer, seed_loan, setup, setup_with_notifier, RecordingNotifier,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use microlend_core::arrears::{ArrearRepository, ArrearStatus, NewArrear};
use microlend_core::db;
use microlend_core::loans::LoanStatus;
use microlend_core::notifications::NotificationEvent;
use microlend_core::payments::{PaymentMethod, PaymentStatus};

#[test]
fn due_sweep_collects_from_a_funded_drawdown_account() {
    let ctx = setup("sweep_collects");
    let (_, drawdown) = seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );
    fund_account(&ctx, &drawdown.id, dec!(1000));

    let stats = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(stats.collected, 1);
    assert_eq!(stats.failed, 0);

    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.balance, dec!(300));
    // The next installment moved one period out.
    assert_eq!(loan.next_payment_date, Some(date(2025, 7, 2)));

    let (_, drawdown) = ctx.account_service.get_accounts("cust-1").unwrap();
    assert_eq!(drawdown.balance, dec!(800));

    let payments = ctx.payment_service.list_for_loan(&loan.id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].method, PaymentMethod::DrawdownAuto);
    assert_eq!(payments[0].status, PaymentStatus::Confirmed);
    assert!(payments[0].auto_processed);

    // Nothing is due any more, so a second sweep is a no-op.
    let again = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(again.collected, 0);
}

#[test]
fn missed_debit_opens_exactly_one_grace_period() {
    let ctx = setup("grace_once");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );

    let stats = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(stats.grace_opened, 1);

    let arrear_repository = ArrearRepository::new(ctx.pool.clone());
    let arrear = arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .expect("a grace-period arrear should exist");
    assert_eq!(arrear.status, ArrearStatus::GracePeriod);
    let deadline = arrear.grace_period_end.expect("grace deadline should be set");
    assert_eq!(
        deadline,
        (common::start_of_test_time() + ctx.settings.grace_period()).naive_utc()
    );

    // The loan stays active during grace, and further sweeps only wait.
    ctx.clock.advance(Duration::minutes(10));
    let again = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(again.grace_opened, 0);
    assert_eq!(again.waiting, 1);
    assert_eq!(arrear_repository.list_for_loan(&loan.id).unwrap().len(), 1);
    assert_eq!(
        ctx.loan_repository.get_by_id(&loan.id).unwrap().status,
        LoanStatus::Active
    );
}

#[test]
fn funding_drawdown_during_grace_collects_and_resolves() {
    let ctx = setup("grace_recovery");
    let (_, drawdown) = seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );

    ctx.scheduler.run_due_sweep().unwrap();
    ctx.clock.advance(Duration::minutes(30));
    fund_account(&ctx, &drawdown.id, dec!(300));

    let stats = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(stats.collected, 1);
    assert_eq!(stats.escalated, 0);

    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.balance, dec!(300));

    let arrear_repository = ArrearRepository::new(ctx.pool.clone());
    assert!(arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .is_none());
    let history = arrear_repository.list_for_loan(&loan.id).unwrap();
    assert_eq!(history[0].status, ArrearStatus::Resolved);
}

#[test]
fn expired_grace_period_escalates_to_arrears_once() {
    let ctx = setup("grace_escalates");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );

    ctx.scheduler.run_due_sweep().unwrap();
    ctx.clock.advance(Duration::hours(2));

    let stats = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(stats.escalated, 1);

    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.status, LoanStatus::Arrears);

    let arrear_repository = ArrearRepository::new(ctx.pool.clone());
    let arrear = arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .unwrap();
    assert_eq!(arrear.status, ArrearStatus::New);

    // Arrears loans leave the due list, so nothing escalates twice.
    let again = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(again.escalated, 0);
    assert_eq!(arrear_repository.list_for_loan(&loan.id).unwrap().len(), 1);
}

#[test]
fn paying_off_an_arrears_loan_resolves_the_arrear() {
    let ctx = setup("arrears_payoff");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );

    ctx.scheduler.run_due_sweep().unwrap();
    ctx.clock.advance(Duration::hours(2));
    ctx.scheduler.run_due_sweep().unwrap();

    ctx.payment_service
        .apply_waterfall_payment("cust-1", dec!(500), PaymentMethod::Mpesa, None)
        .unwrap();

    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.status, LoanStatus::Completed);

    let arrear_repository = ArrearRepository::new(ctx.pool.clone());
    assert!(arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .is_none());
    let history = arrear_repository.list_for_loan(&loan.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ArrearStatus::Resolved);
    assert!(history[0].resolved_at.is_some());
}

#[test]
fn aging_classifies_overdue_loans_and_refreshes_day_counts() {
    let ctx = setup("aging_classifies");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 1, 1),
        date(2025, 5, 1),
        None,
    );

    let stats = ctx.scheduler.run_arrears_aging().unwrap();
    assert_eq!(stats.classified, 1);

    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.status, LoanStatus::Arrears);

    let arrear_repository = ArrearRepository::new(ctx.pool.clone());
    let arrear = arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .unwrap();
    assert_eq!(arrear.status, ArrearStatus::New);
    assert_eq!(arrear.days_overdue, 32);
    assert_eq!(arrear.amount_overdue, dec!(500));

    ctx.clock.advance(Duration::days(3));
    let again = ctx.scheduler.run_arrears_aging().unwrap();
    assert_eq!(again.classified, 0);
    assert_eq!(again.aged, 1);

    let arrear = arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .unwrap();
    assert_eq!(arrear.days_overdue, 35);
}

#[test]
fn reminder_pass_covers_three_one_and_zero_days_out() {
    let ctx = setup("reminders");
    seed_customer(&ctx, "cust-1");
    for (i, offset) in [0i64, 1, 3, 5].into_iter().enumerate() {
        seed_loan(
            &ctx,
            "cust-1",
            &format!("LN-00{}", i + 1),
            dec!(400),
            date(2025, 4, 1),
            date(2025, 12, 31),
            Some((date(2025, 6, 2) + Duration::days(offset), dec!(100))),
        );
    }

    // Due in 5 days falls outside every reminder offset.
    let sent = ctx.scheduler.run_reminder_pass().unwrap();
    assert_eq!(sent, 3);
}

#[test]
fn sweep_survives_a_borrower_with_a_broken_account_pair() {
    let ctx = setup("sweep_partial_failure");
    // A loan whose borrower has no accounts at all, next to a healthy one.
    seed_loan(
        &ctx,
        "ghost",
        "LN-GHOST",
        dec!(300),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(100))),
    );
    let (_, drawdown) = seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );
    fund_account(&ctx, &drawdown.id, dec!(500));

    let stats = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(stats.collected, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(
        ctx.loan_repository.get_by_id(&loan.id).unwrap().balance,
        dec!(300)
    );
}

#[test]
fn drawdown_is_never_overdrawn() {
    let ctx = setup("no_overdraft");
    let (_, drawdown) = seed_customer(&ctx, "cust-1");
    seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );
    // Funded, but short of the 200 installment.
    fund_account(&ctx, &drawdown.id, dec!(150));

    let stats = ctx.scheduler.run_due_sweep().unwrap();
    assert_eq!(stats.collected, 0);
    assert_eq!(stats.grace_opened, 1);

    let (_, drawdown) = ctx.account_service.get_accounts("cust-1").unwrap();
    assert_eq!(drawdown.balance, dec!(150));
    assert_eq!(Decimal::ZERO.max(drawdown.balance), drawdown.balance);
}

#[test]
fn grace_arrear_on_an_overdue_loan_escalates_and_ages() {
    let ctx = setup("grace_past_due_date");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 6, 10),
        Some((date(2025, 6, 1), dec!(200))),
    );

    // The missed installment opens a grace period on the active loan.
    ctx.scheduler.run_due_sweep().unwrap();
    let arrear_repository = ArrearRepository::new(ctx.pool.clone());
    assert_eq!(
        arrear_repository
            .find_open_for_loan(&loan.id)
            .unwrap()
            .unwrap()
            .status,
        ArrearStatus::GracePeriod
    );

    // The loan passes its final due date while the arrear is still in grace.
    ctx.clock.advance(Duration::days(9));
    let stats = ctx.scheduler.run_arrears_aging().unwrap();
    assert_eq!(stats.classified, 1);
    assert_eq!(stats.aged, 1);

    let loan = ctx.loan_repository.get_by_id(&loan.id).unwrap();
    assert_eq!(loan.status, LoanStatus::Arrears);
    let arrear = arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .unwrap();
    assert_eq!(arrear.status, ArrearStatus::New);
    assert_eq!(arrear.days_overdue, 1);
    assert_eq!(arrear.amount_overdue, dec!(500));

    // Day counts keep moving on later passes.
    ctx.clock.advance(Duration::days(3));
    ctx.scheduler.run_arrears_aging().unwrap();
    let arrear = arrear_repository
        .find_open_for_loan(&loan.id)
        .unwrap()
        .unwrap();
    assert_eq!(arrear.days_overdue, 4);
}

#[test]
fn grace_notification_reports_the_shortfall_once() {
    let recorder = Arc::new(RecordingNotifier::default());
    let ctx = setup_with_notifier("grace_shortfall", recorder.clone());
    let (_, drawdown) = seed_customer(&ctx, "cust-1");
    seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        Some((date(2025, 6, 1), dec!(200))),
    );
    fund_account(&ctx, &drawdown.id, dec!(150));

    ctx.scheduler.run_due_sweep().unwrap();
    ctx.clock.advance(Duration::minutes(10));
    ctx.scheduler.run_due_sweep().unwrap();

    let grace_events: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            NotificationEvent::GracePeriodStarted {
                shortfall,
                deadline,
                ..
            } => Some((shortfall, deadline)),
            _ => None,
        })
        .collect();
    assert_eq!(grace_events.len(), 1);
    assert_eq!(grace_events[0].0, dec!(50));
    assert_eq!(
        grace_events[0].1,
        (common::start_of_test_time() + ctx.settings.grace_period()).naive_utc()
    );
}

#[test]
fn opening_an_arrear_twice_returns_the_existing_row() {
    let ctx = setup("arrear_open_twice");
    seed_customer(&ctx, "cust-1");
    let loan = seed_loan(
        &ctx,
        "cust-1",
        "LN-001",
        dec!(500),
        date(2025, 4, 1),
        date(2025, 12, 31),
        None,
    );

    let arrear_repository = ArrearRepository::new(ctx.pool.clone());
    let mut conn = db::get_connection(&ctx.pool).unwrap();
    let open = |days| NewArrear {
        loan_id: loan.id.clone(),
        amount_overdue: dec!(500),
        days_overdue: days,
        status: ArrearStatus::New,
        grace_period_end: None,
    };

    let (first, created) = arrear_repository
        .create_if_absent_in_tx(&mut conn, open(1))
        .unwrap();
    assert!(created);

    let (second, created_again) = arrear_repository
        .create_if_absent_in_tx(&mut conn, open(2))
        .unwrap();
    assert!(!created_again);
    assert_eq!(second.id, first.id);
    assert_eq!(second.days_overdue, 1);
}
