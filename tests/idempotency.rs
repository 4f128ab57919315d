use std::sync::Arc;

use gateway_ledger::config::AppConfig;
use gateway_ledger::directory::StaticDirectory;
use gateway_ledger::domain::context::CallContext;
use gateway_ledger::domain::payment::TransactionStatus;
use gateway_ledger::domain::properties::Properties;
use gateway_ledger::gateway::mock::{MockBehavior, MockGateway};
use gateway_ledger::service::orchestrator::PaymentOrchestrator;
use gateway_ledger::store::memory::MemoryStore;
use gateway_ledger::store::{NewPaymentMethod, PaymentMethodStore, TransactionLedger};
use uuid::Uuid;

#[tokio::test]
async fn second_charge_replays_without_gateway_call() {
    let (orchestrator, store, gateway) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;

    let payment_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4();
    let props = Properties::new();

    let first = orchestrator
        .charge(&ctx, account_id, payment_id, transaction_id, pm_id, 100, "USD", &props)
        .await
        .unwrap();
    assert_eq!(first.status, TransactionStatus::Processed);
    assert_eq!(first.amount_minor, Some(100));
    assert_eq!(gateway.call_count("purchase"), 1);

    let second = orchestrator
        .charge(&ctx, account_id, payment_id, transaction_id, pm_id, 100, "USD", &props)
        .await
        .unwrap();
    assert_eq!(second.status, TransactionStatus::Processed);
    assert_eq!(second.amount_minor, Some(100));
    assert_eq!(second.currency.as_deref(), Some("USD"));
    assert_eq!(second.second_reference_id, first.second_reference_id);
    // the replay never reached the gateway
    assert_eq!(gateway.call_count("purchase"), 1);

    let ledger: &dyn TransactionLedger = store.as_ref();
    let rows = ledger.transactions_for(ctx.tenant_id, payment_id).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn concurrent_charges_create_one_ledger_row() {
    let (orchestrator, store, _gateway) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;

    let payment_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4();
    let props = Properties::new();

    let (a, b) = tokio::join!(
        orchestrator.charge(&ctx, account_id, payment_id, transaction_id, pm_id, 250, "USD", &props),
        orchestrator.charge(&ctx, account_id, payment_id, transaction_id, pm_id, 250, "USD", &props),
    );
    assert_eq!(a.unwrap().status, TransactionStatus::Processed);
    assert_eq!(b.unwrap().status, TransactionStatus::Processed);

    let ledger: &dyn TransactionLedger = store.as_ref();
    let rows = ledger.transactions_for(ctx.tenant_id, payment_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount_minor, Some(250));
}

#[tokio::test]
async fn declined_charge_leaves_no_ledger_row_and_retry_reaches_gateway() {
    let (orchestrator, store, gateway) = setup(MockGateway::declining());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;

    let payment_id = Uuid::new_v4();
    let transaction_id = Uuid::new_v4();
    let props = Properties::new();

    let declined = orchestrator
        .charge(&ctx, account_id, payment_id, transaction_id, pm_id, 100, "USD", &props)
        .await
        .unwrap();
    assert_eq!(declined.status, TransactionStatus::Error);
    assert_eq!(declined.gateway_error.as_deref(), Some("Your card was declined"));
    assert_eq!(declined.gateway_error_code.as_deref(), Some("card_error"));

    let ledger: &dyn TransactionLedger = store.as_ref();
    let rows = ledger.transactions_for(ctx.tenant_id, payment_id).await.unwrap();
    assert!(rows.is_empty());

    // a failure never pins the pair; the retry goes back to the gateway
    gateway.script("purchase", MockBehavior::Approve);
    let retried = orchestrator
        .charge(&ctx, account_id, payment_id, transaction_id, pm_id, 100, "USD", &props)
        .await
        .unwrap();
    assert_eq!(retried.status, TransactionStatus::Processed);
    assert_eq!(gateway.call_count("purchase"), 2);
}

#[tokio::test]
async fn authorize_then_capture_references_the_authorization() {
    let (orchestrator, store, gateway) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;

    let payment_id = Uuid::new_v4();
    let props = Properties::new();

    let auth = orchestrator
        .authorize(&ctx, account_id, payment_id, Uuid::new_v4(), pm_id, 500, "USD", &props)
        .await
        .unwrap();
    assert_eq!(auth.status, TransactionStatus::Processed);

    let capture = orchestrator
        .capture(&ctx, account_id, payment_id, Uuid::new_v4(), 500, "USD", &props)
        .await
        .unwrap();
    assert_eq!(capture.status, TransactionStatus::Processed);
    assert_eq!(gateway.call_count("capture"), 1);

    let void = orchestrator
        .void(&ctx, account_id, payment_id, Uuid::new_v4(), &props)
        .await
        .unwrap();
    assert_eq!(void.status, TransactionStatus::Processed);
    assert_eq!(void.amount_minor, None);

    let ledger: &dyn TransactionLedger = store.as_ref();
    let rows = ledger.transactions_for(ctx.tenant_id, payment_id).await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn payment_info_rebuilds_from_the_ledger() {
    let (orchestrator, store, _) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;

    let payment_id = Uuid::new_v4();
    let props = Properties::new();
    let charge = orchestrator
        .charge(&ctx, account_id, payment_id, Uuid::new_v4(), pm_id, 750, "EUR", &props)
        .await
        .unwrap();

    let info = orchestrator.payment_info(&ctx, payment_id).await.unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].status, TransactionStatus::Processed);
    assert_eq!(info[0].amount_minor, Some(750));
    assert_eq!(info[0].currency.as_deref(), Some("EUR"));
    assert_eq!(info[0].second_reference_id, charge.second_reference_id);
}

#[tokio::test]
async fn payment_info_reports_declined_attempts() {
    let (orchestrator, store, _) = setup(MockGateway::declining());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;

    let payment_id = Uuid::new_v4();
    let props = Properties::new();
    orchestrator
        .charge(&ctx, account_id, payment_id, Uuid::new_v4(), pm_id, 100, "USD", &props)
        .await
        .unwrap();

    // no ledger row exists, yet the decline detail is still reported
    let info = orchestrator.payment_info(&ctx, payment_id).await.unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].status, TransactionStatus::Error);
    assert_eq!(info[0].amount_minor, None);
    assert_eq!(info[0].gateway_error.as_deref(), Some("Your card was declined"));
    assert_eq!(info[0].gateway_error_code.as_deref(), Some("card_error"));
}

fn setup(gateway: MockGateway) -> (PaymentOrchestrator, Arc<MemoryStore>, Arc<MockGateway>) {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(gateway);
    let orchestrator = PaymentOrchestrator {
        gateway: gateway.clone(),
        responses: store.clone(),
        ledger: store.clone(),
        payment_methods: store.clone(),
        directory: Arc::new(StaticDirectory::new()),
        config: AppConfig::default(),
    };
    (orchestrator, store, gateway)
}

async fn seed_payment_method(store: &MemoryStore, ctx: &CallContext, account_id: Uuid) -> Uuid {
    let pm_id = Uuid::new_v4();
    store
        .create(NewPaymentMethod {
            account_id,
            tenant_id: ctx.tenant_id,
            payment_method_id: Some(pm_id),
            external_instrument_id: format!("card_{}", Uuid::new_v4().simple()),
            customer_ref: Some("cus_seed".to_string()),
            details: None,
            is_default: false,
        })
        .await
        .unwrap();
    pm_id
}
