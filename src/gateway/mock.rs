use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::json;
use uuid::Uuid;

use crate::domain::instrument::{InstrumentRef, NewInstrument};
use crate::error::Result;
use crate::gateway::{CallOptions, GatewayFacade, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Approve,
    Decline,
    NetworkTimeout,
}

/// Scripted gateway used by tests and demos. Every call is appended to an
/// inspectable log so tests can assert how often the gateway was reached.
pub struct MockGateway {
    pub behavior: MockBehavior,
    per_call: Mutex<HashMap<&'static str, MockBehavior>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockGateway {
    pub fn approving() -> Self {
        Self::with_behavior(MockBehavior::Approve)
    }

    pub fn declining() -> Self {
        Self::with_behavior(MockBehavior::Decline)
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            per_call: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the behavior for one named call, e.g. make only
    /// `update_customer_default` fail while `store` succeeds.
    pub fn script(&self, call: &'static str, behavior: MockBehavior) {
        self.per_call.lock().unwrap().insert(call, behavior);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    fn outcome_for(&self, call: &'static str, reference_prefix: &str) -> Outcome {
        self.calls.lock().unwrap().push(call);
        let behavior = self
            .per_call
            .lock()
            .unwrap()
            .get(call)
            .copied()
            .unwrap_or(self.behavior);

        match behavior {
            MockBehavior::Approve => {
                let reference = format!("{}_{}", reference_prefix, Uuid::new_v4().simple());
                Outcome {
                    success: true,
                    message: Some("Transaction approved".to_string()),
                    gateway_reference_id: Some(reference.clone()),
                    error_code: None,
                    test_mode: true,
                    raw_fields: json!({
                        "id": reference,
                        "object": call,
                        "created": 1_700_000_000,
                        "livemode": false,
                        "balance_transaction": format!("bal_{}", Uuid::new_v4().simple()),
                    }),
                }
            }
            MockBehavior::Decline => Outcome {
                success: false,
                message: Some("Your card was declined".to_string()),
                gateway_reference_id: None,
                error_code: Some("card_declined".to_string()),
                test_mode: true,
                raw_fields: json!({
                    "error": {
                        "type": "card_error",
                        "message": "Your card was declined",
                        "code": "card_declined",
                    }
                }),
            },
            MockBehavior::NetworkTimeout => Outcome {
                success: false,
                message: Some("gateway timeout".to_string()),
                gateway_reference_id: None,
                error_code: Some("TIMEOUT".to_string()),
                test_mode: true,
                raw_fields: json!({
                    "error": { "type": "api_connection_error", "message": "gateway timeout" }
                }),
            },
        }
    }
}

#[async_trait::async_trait]
impl GatewayFacade for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn purchase(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _instrument: &InstrumentRef,
        _options: &CallOptions,
    ) -> Result<Outcome> {
        Ok(self.outcome_for("purchase", "ch"))
    }

    async fn authorize(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _instrument: &InstrumentRef,
        _options: &CallOptions,
    ) -> Result<Outcome> {
        Ok(self.outcome_for("authorize", "auth"))
    }

    async fn capture(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _gateway_reference_id: &str,
        _options: &CallOptions,
    ) -> Result<Outcome> {
        Ok(self.outcome_for("capture", "cap"))
    }

    async fn void(&self, _gateway_reference_id: &str, _options: &CallOptions) -> Result<Outcome> {
        Ok(self.outcome_for("void", "void"))
    }

    async fn refund(
        &self,
        _amount_minor: i64,
        _gateway_reference_id: &str,
        _options: &CallOptions,
    ) -> Result<Outcome> {
        Ok(self.outcome_for("refund", "re"))
    }

    async fn store(&self, instrument: &NewInstrument, options: &CallOptions) -> Result<Outcome> {
        let mut outcome = self.outcome_for("store", "card");
        if outcome.success {
            // Echo back the token when one was supplied, like a real
            // tokenizing gateway would.
            if let NewInstrument::Token(token) = instrument {
                outcome.gateway_reference_id = Some(token.clone());
                if let Some(obj) = outcome.raw_fields.as_object_mut() {
                    obj.insert("id".to_string(), serde_json::Value::String(token.clone()));
                }
            }
            let customer = options
                .customer
                .clone()
                .unwrap_or_else(|| format!("cus_{}", Uuid::new_v4().simple()));
            if let Some(obj) = outcome.raw_fields.as_object_mut() {
                obj.insert("customer".to_string(), serde_json::Value::String(customer));
            }
        }
        Ok(outcome)
    }

    async fn update_customer_default(
        &self,
        _customer_ref: &str,
        _instrument_ref: &str,
        _options: &CallOptions,
    ) -> Result<Outcome> {
        Ok(self.outcome_for("update_customer_default", "cus"))
    }

    async fn unstore(
        &self,
        _customer_ref: Option<&str>,
        _instrument_ref: &str,
        _options: &CallOptions,
    ) -> Result<Outcome> {
        Ok(self.outcome_for("unstore", "del"))
    }
}
