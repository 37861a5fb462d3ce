use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use diesel::Connection;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

use microlend_core::accounts::{Account, AccountService};
use microlend_core::clock::FixedClock;
use microlend_core::db::{self, DbPool};
use microlend_core::ingestion::IngestService;
use microlend_core::loans::{Loan, LoanRepository, NewLoan};
use microlend_core::locks::BorrowerLocks;
use microlend_core::notifications::{LogNotifier, NotificationEvent, Notifier};
use microlend_core::payments::PaymentService;
use microlend_core::scheduler::SchedulerService;
use microlend_core::settings::Settings;
use microlend_core::transactions::TransactionType;

/// Fixed "now" every test starts from: 2025-06-02 09:00 UTC.
pub fn start_of_test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Fully wired service stack over a throwaway database file.
pub struct TestContext {
    pub pool: Arc<DbPool>,
    pub clock: Arc<FixedClock>,
    pub settings: Settings,
    pub locks: Arc<BorrowerLocks>,
    pub account_service: Arc<AccountService>,
    pub payment_service: Arc<PaymentService>,
    pub ingest_service: Arc<IngestService>,
    pub scheduler: SchedulerService,
    pub loan_repository: LoanRepository,
}

pub fn get_test_db_path(test_id: &str) -> String {
    let now = Local::now();
    now.format(&format!("./tests/output/%Y%m%d/%H%M%S%.9f-{}/", test_id))
        .to_string()
}

/// Notifier that records every delivered event for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent) -> microlend_core::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub fn setup(test_id: &str) -> TestContext {
    setup_with_notifier(test_id, Arc::new(LogNotifier))
}

pub fn setup_with_notifier(test_id: &str, notifier: Arc<dyn Notifier>) -> TestContext {
    let dir = get_test_db_path(test_id);
    let db_path = db::init(&dir).expect("Failed to initialize database");
    let pool = db::create_pool(&db_path).expect("Failed to create database pool");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let settings = Settings::default();
    let clock = Arc::new(FixedClock::new(start_of_test_time()));
    let locks = Arc::new(BorrowerLocks::new());

    let account_service = Arc::new(AccountService::new(pool.clone(), settings.clone()));
    let payment_service = Arc::new(PaymentService::new(
        pool.clone(),
        account_service.clone(),
        notifier.clone(),
        clock.clone(),
        locks.clone(),
        settings.clone(),
    ));
    let ingest_service = Arc::new(IngestService::new(
        pool.clone(),
        account_service.clone(),
        payment_service.clone(),
        notifier.clone(),
        clock.clone(),
        locks.clone(),
        settings.clone(),
    ));
    let scheduler = SchedulerService::new(
        pool.clone(),
        payment_service.clone(),
        notifier,
        clock.clone(),
        locks.clone(),
        settings.clone(),
    );

    TestContext {
        loan_repository: LoanRepository::new(pool.clone()),
        pool,
        clock,
        settings,
        locks,
        account_service,
        payment_service,
        ingest_service,
        scheduler,
    }
}

/// Opens the savings/drawdown pair for a test customer.
pub fn seed_customer(ctx: &TestContext, customer_id: &str) -> (Account, Account) {
    ctx.account_service
        .open_customer_accounts(
            customer_id,
            &format!("SAV-{}", customer_id),
            &format!("DRW-{}", customer_id),
        )
        .expect("Failed to open customer accounts")
}

/// Creates an installment loan with its first payment already scheduled.
pub fn seed_loan(
    ctx: &TestContext,
    borrower_id: &str,
    loan_number: &str,
    principal: Decimal,
    start_date: NaiveDate,
    due_date: NaiveDate,
    next_payment: Option<(NaiveDate, Decimal)>,
) -> Loan {
    ctx.loan_repository
        .create(NewLoan {
            loan_number: loan_number.to_string(),
            borrower_id: borrower_id.to_string(),
            principal_amount: principal,
            interest_amount: Decimal::ZERO,
            fee_amount: Decimal::ZERO,
            start_date,
            due_date,
            next_payment_date: next_payment.map(|(d, _)| d),
            next_payment_amount: next_payment.map(|(_, a)| a),
            allows_installments: true,
        })
        .expect("Failed to create loan")
}

/// Deposits funds into an account directly, outside the payment path.
pub fn fund_account(ctx: &TestContext, account_id: &str, amount: Decimal) {
    let mut conn = db::get_connection(&ctx.pool).expect("Failed to get connection");
    let conn = &mut *conn;
    conn.transaction::<_, microlend_core::Error, _>(|tx| {
        ctx.account_service.credit_in_tx(
            tx,
            account_id,
            amount,
            TransactionType::Deposit,
            None,
            Some("Test funding".to_string()),
        )?;
        Ok(())
    })
    .expect("Failed to fund account");
}
