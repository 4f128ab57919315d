use std::sync::Arc;

use gateway_ledger::config::AppConfig;
use gateway_ledger::directory::StaticDirectory;
use gateway_ledger::domain::context::CallContext;
use gateway_ledger::domain::payment::ApiCall;
use gateway_ledger::gateway::mock::MockGateway;
use gateway_ledger::service::orchestrator::PaymentOrchestrator;
use gateway_ledger::store::memory::MemoryStore;
use gateway_ledger::store::ResponseLog;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn notification_is_recorded_verbatim() {
    let (orchestrator, store) = setup();
    let ctx = CallContext::new(Uuid::new_v4());

    let payload = json!({
        "id": "evt_1",
        "type": "charge.refunded",
        "livemode": false,
        "request": "req_7",
        "data": { "object": { "id": "ch_1", "amount": 100 } },
        "x_forward_compat": "kept as-is",
    });

    let record = orchestrator
        .process_notification(&ctx, payload.clone())
        .await
        .unwrap();

    assert_eq!(record.api_call, ApiCall::Webhook);
    assert!(record.success);
    assert_eq!(record.transaction_type.as_deref(), Some("charge.refunded"));
    // livemode=false means a test event
    assert!(record.test_mode);
    assert_eq!(record.gateway_reference_id.as_deref(), Some("req_7"));
    // unknown keys survive untouched
    assert_eq!(record.raw_fields, payload);

    let log: &dyn ResponseLog = store.as_ref();
    let found = log
        .find_by_gateway_reference(ctx.tenant_id, "req_7")
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, record.id);
}

#[tokio::test]
async fn live_notification_without_request_falls_back_to_event_id() {
    let (orchestrator, _) = setup();
    let ctx = CallContext::new(Uuid::new_v4());

    let record = orchestrator
        .process_notification(
            &ctx,
            json!({ "id": "evt_2", "type": "customer.deleted", "livemode": true }),
        )
        .await
        .unwrap();

    assert!(!record.test_mode);
    assert_eq!(record.gateway_reference_id.as_deref(), Some("evt_2"));
    assert_eq!(record.payment_id, None);
}

fn setup() -> (PaymentOrchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = PaymentOrchestrator {
        gateway: Arc::new(MockGateway::approving()),
        responses: store.clone(),
        ledger: store.clone(),
        payment_methods: store.clone(),
        directory: Arc::new(StaticDirectory::new()),
        config: AppConfig::default(),
    };
    (orchestrator, store)
}
