use std::sync::Arc;

use gateway_ledger::config::AppConfig;
use gateway_ledger::directory::{AccountInfo, StaticDirectory};
use gateway_ledger::domain::context::CallContext;
use gateway_ledger::domain::instrument::{InstrumentDetails, NewInstrument};
use gateway_ledger::domain::properties::Properties;
use gateway_ledger::error::CoreError;
use gateway_ledger::gateway::mock::{MockBehavior, MockGateway};
use gateway_ledger::service::orchestrator::PaymentOrchestrator;
use gateway_ledger::store::memory::MemoryStore;
use gateway_ledger::store::{NewPaymentMethod, PaymentMethodStore};
use uuid::Uuid;

#[tokio::test]
async fn add_payment_method_stores_the_tokenized_instrument() {
    let (orchestrator, store, gateway, directory) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    seed_account(&directory, &ctx, account_id);

    let pm_id = Uuid::new_v4();
    let record = orchestrator
        .add_payment_method(
            &ctx,
            account_id,
            pm_id,
            NewInstrument::Token("tok_visa".to_string()),
            false,
            &Properties::new(),
        )
        .await
        .unwrap();

    assert_eq!(record.payment_method_id, Some(pm_id));
    assert_eq!(record.external_instrument_id, "tok_visa");
    assert!(record.customer_ref.as_deref().is_some_and(|c| c.starts_with("cus_")));
    assert!(!record.is_default);
    assert_eq!(gateway.calls(), vec!["store"]);

    let detail = orchestrator.payment_method_detail(&ctx, pm_id).await.unwrap();
    assert_eq!(detail.id, record.id);

    let active = store.active_by_account(ctx.tenant_id, account_id).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn default_flag_updates_the_customer_at_the_gateway() {
    let (orchestrator, store, gateway, directory) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    seed_account(&directory, &ctx, account_id);

    let first_id = Uuid::new_v4();
    orchestrator
        .add_payment_method(
            &ctx,
            account_id,
            first_id,
            NewInstrument::Token("tok_first".to_string()),
            true,
            &Properties::new(),
        )
        .await
        .unwrap();
    assert_eq!(gateway.calls(), vec!["store", "update_customer_default"]);

    let second_id = Uuid::new_v4();
    orchestrator
        .add_payment_method(
            &ctx,
            account_id,
            second_id,
            NewInstrument::Token("tok_second".to_string()),
            false,
            &Properties::new(),
        )
        .await
        .unwrap();

    orchestrator
        .set_default_payment_method(&ctx, account_id, second_id, &Properties::new())
        .await
        .unwrap();

    let active = store.active_by_account(ctx.tenant_id, account_id).await.unwrap();
    let defaults: Vec<_> = active.iter().filter(|pm| pm.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].payment_method_id, Some(second_id));
}

#[tokio::test]
async fn failing_follow_up_rejects_the_whole_registration() {
    let (orchestrator, store, gateway, directory) = setup(MockGateway::approving());
    gateway.script("update_customer_default", MockBehavior::Decline);
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    seed_account(&directory, &ctx, account_id);

    let result = orchestrator
        .add_payment_method(
            &ctx,
            account_id,
            Uuid::new_v4(),
            NewInstrument::Token("tok_visa".to_string()),
            true,
            &Properties::new(),
        )
        .await;

    // the failing sub-call supplies the error detail
    match result {
        Err(CoreError::GatewayRejected { message, code }) => {
            assert_eq!(message, "Your card was declined");
            assert_eq!(code.as_deref(), Some("card_declined"));
        }
        other => panic!("expected GatewayRejected, got {other:?}"),
    }

    // both sub-calls happened, but no local record survives the failure
    assert_eq!(gateway.calls(), vec!["store", "update_customer_default"]);
    let active = store.active_by_account(ctx.tenant_id, account_id).await.unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn delete_soft_deletes_and_refuses_a_second_pass() {
    let (orchestrator, store, gateway, directory) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    seed_account(&directory, &ctx, account_id);

    let pm_id = Uuid::new_v4();
    orchestrator
        .add_payment_method(
            &ctx,
            account_id,
            pm_id,
            NewInstrument::Token("tok_visa".to_string()),
            false,
            &Properties::new(),
        )
        .await
        .unwrap();

    orchestrator
        .delete_payment_method(&ctx, account_id, pm_id, &Properties::new())
        .await
        .unwrap();
    assert_eq!(gateway.call_count("unstore"), 1);

    let active = store.active_by_account(ctx.tenant_id, account_id).await.unwrap();
    assert!(active.is_empty());

    // the record is gone from the active view, so a second delete cannot
    // resolve the logical id
    let again = orchestrator
        .delete_payment_method(&ctx, account_id, pm_id, &Properties::new())
        .await;
    assert!(matches!(again, Err(CoreError::NotFound { .. })));
    assert_eq!(gateway.call_count("unstore"), 1);
}

#[tokio::test]
async fn duplicate_active_binding_is_reported_not_resolved() {
    let (orchestrator, store, _, _) = setup(MockGateway::approving());
    let ctx = CallContext::new(Uuid::new_v4());
    let account_id = Uuid::new_v4();
    let pm_id = Uuid::new_v4();

    for instrument in ["card_a", "card_b"] {
        store
            .create(NewPaymentMethod {
                account_id,
                tenant_id: ctx.tenant_id,
                payment_method_id: Some(pm_id),
                external_instrument_id: instrument.to_string(),
                customer_ref: None,
                details: None,
                is_default: false,
            })
            .await
            .unwrap();
    }

    let detail = orchestrator.payment_method_detail(&ctx, pm_id).await;
    assert!(matches!(
        detail,
        Err(CoreError::AmbiguousMapping { count: 2, .. })
    ));

    let deleted = orchestrator
        .delete_payment_method(&ctx, account_id, pm_id, &Properties::new())
        .await;
    assert!(matches!(deleted, Err(CoreError::AmbiguousMapping { .. })));
}

#[test]
fn card_details_drop_out_of_range_expiry_fields() {
    let raw = serde_json::json!({
        "brand": "Visa",
        "last4": "4242",
        "exp_month": 4294967298_u64,
        "exp_year": 99999999_u64,
    });
    let details = InstrumentDetails::from_card_object(raw.as_object().unwrap());

    match details {
        InstrumentDetails::Card { brand, last4, exp_month, exp_year, .. } => {
            assert_eq!(brand.as_deref(), Some("Visa"));
            assert_eq!(last4.as_deref(), Some("4242"));
            // malformed numbers degrade to None instead of wrapping
            assert_eq!(exp_month, None);
            assert_eq!(exp_year, None);
        }
        other => panic!("expected card details, got {other:?}"),
    }
}

#[test]
fn card_details_keep_in_range_expiry_fields() {
    let raw = serde_json::json!({ "exp_month": 12_u64, "exp_year": 2030_u64 });
    let details = InstrumentDetails::from_card_object(raw.as_object().unwrap());

    match details {
        InstrumentDetails::Card { exp_month, exp_year, .. } => {
            assert_eq!(exp_month, Some(12));
            assert_eq!(exp_year, Some(2030));
        }
        other => panic!("expected card details, got {other:?}"),
    }
}

fn setup(
    gateway: MockGateway,
) -> (
    PaymentOrchestrator,
    Arc<MemoryStore>,
    Arc<MockGateway>,
    Arc<StaticDirectory>,
) {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(gateway);
    let directory = Arc::new(StaticDirectory::new());
    let orchestrator = PaymentOrchestrator {
        gateway: gateway.clone(),
        responses: store.clone(),
        ledger: store.clone(),
        payment_methods: store.clone(),
        directory: directory.clone(),
        config: AppConfig::default(),
    };
    (orchestrator, store, gateway, directory)
}

fn seed_account(directory: &StaticDirectory, ctx: &CallContext, account_id: Uuid) {
    directory.insert(
        ctx.tenant_id,
        account_id,
        AccountInfo {
            email: Some("buyer@example.com".to_string()),
            external_key: Some("buyer-1".to_string()),
        },
    );
}
