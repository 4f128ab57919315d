use std::sync::Arc;

use gateway_ledger::config::AppConfig;
use gateway_ledger::directory::StaticDirectory;
use gateway_ledger::domain::context::CallContext;
use gateway_ledger::domain::payment::TransactionStatus;
use gateway_ledger::domain::properties::Properties;
use gateway_ledger::error::CoreError;
use gateway_ledger::gateway::mock::MockGateway;
use gateway_ledger::service::orchestrator::PaymentOrchestrator;
use gateway_ledger::store::memory::MemoryStore;
use gateway_ledger::store::{NewPaymentMethod, PaymentMethodStore, TransactionLedger};
use uuid::Uuid;

#[tokio::test]
async fn refunds_never_exceed_charges() {
    let (orchestrator, store, _) = setup();
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;
    let payment_id = Uuid::new_v4();
    let props = Properties::new();

    let charge = orchestrator
        .charge(&ctx, account_id, payment_id, Uuid::new_v4(), pm_id, 100, "USD", &props)
        .await
        .unwrap();
    assert_eq!(charge.status, TransactionStatus::Processed);

    // more than was ever charged
    let over = orchestrator
        .refund(&ctx, account_id, payment_id, Uuid::new_v4(), 150, "USD", &props)
        .await;
    assert!(matches!(
        over,
        Err(CoreError::RefundExceedsCharge { requested: 150, .. })
    ));

    // full refund is fine
    let full = orchestrator
        .refund(&ctx, account_id, payment_id, Uuid::new_v4(), 100, "USD", &props)
        .await
        .unwrap();
    assert_eq!(full.status, TransactionStatus::Processed);
    assert_eq!(full.amount_minor, Some(100));

    // nothing left to refund
    let one_more = orchestrator
        .refund(&ctx, account_id, payment_id, Uuid::new_v4(), 1, "USD", &props)
        .await;
    assert!(matches!(
        one_more,
        Err(CoreError::RefundExceedsCharge { requested: 1, remaining: 0, .. })
    ));
}

#[tokio::test]
async fn refund_without_charge_fails_fast() {
    let (orchestrator, _, gateway) = setup();
    let ctx = CallContext::new(Uuid::new_v4());
    let payment_id = Uuid::new_v4();
    let props = Properties::new();

    let result = orchestrator
        .refund(&ctx, Uuid::new_v4(), payment_id, Uuid::new_v4(), 100, "USD", &props)
        .await;
    assert!(matches!(result, Err(CoreError::NoChargeFound { .. })));
    // the business failure never reached the gateway
    assert_eq!(gateway.call_count("refund"), 0);
}

#[tokio::test]
async fn oldest_qualifying_charge_wins() {
    let (orchestrator, store, _) = setup();
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;
    let payment_id = Uuid::new_v4();
    let props = Properties::new();

    let first = orchestrator
        .charge(&ctx, account_id, payment_id, Uuid::new_v4(), pm_id, 100, "USD", &props)
        .await
        .unwrap();
    let second = orchestrator
        .charge(&ctx, account_id, payment_id, Uuid::new_v4(), pm_id, 300, "USD", &props)
        .await
        .unwrap();

    let ledger: &dyn TransactionLedger = store.as_ref();
    let candidate = ledger
        .find_candidate_for_refund(ctx.tenant_id, payment_id, 50)
        .await
        .unwrap();
    assert_eq!(
        candidate.gateway_reference_id, first.second_reference_id,
        "tie-break must pick the oldest qualifying charge"
    );

    // only the larger charge covers this one
    let candidate = ledger
        .find_candidate_for_refund(ctx.tenant_id, payment_id, 200)
        .await
        .unwrap();
    assert_eq!(candidate.gateway_reference_id, second.second_reference_id);
}

#[tokio::test]
async fn repeated_refund_with_same_transaction_id_replays() {
    let (orchestrator, store, gateway) = setup();
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = seed_payment_method(&store, &ctx, account_id).await;
    let payment_id = Uuid::new_v4();
    let refund_txn_id = Uuid::new_v4();
    let props = Properties::new();

    orchestrator
        .charge(&ctx, account_id, payment_id, Uuid::new_v4(), pm_id, 100, "USD", &props)
        .await
        .unwrap();

    let first = orchestrator
        .refund(&ctx, account_id, payment_id, refund_txn_id, 100, "USD", &props)
        .await
        .unwrap();
    let replay = orchestrator
        .refund(&ctx, account_id, payment_id, refund_txn_id, 100, "USD", &props)
        .await
        .unwrap();

    assert_eq!(gateway.call_count("refund"), 1);
    assert_eq!(replay.second_reference_id, first.second_reference_id);

    let info = orchestrator.refund_info(&ctx, payment_id).await.unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].amount_minor, Some(100));
}

fn setup() -> (PaymentOrchestrator, Arc<MemoryStore>, Arc<MockGateway>) {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(MockGateway::approving());
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
