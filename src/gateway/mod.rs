use serde_json::Value;

use crate::domain::instrument::{InstrumentRef, NewInstrument};
use crate::domain::properties;
use crate::error::Result;

pub mod mock;

/// Per-call overrides resolved by the orchestrator from the caller's
/// property bag plus static configuration before the facade is invoked.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub processor_account_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub customer: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub destination: Option<String>,
    pub application_fee: Option<i64>,
    pub reverse_transfer: Option<bool>,
    pub refund_application_fee: Option<bool>,
    pub extra: properties::Properties,
}

/// Normalized outcome of one gateway call. Transport failures are folded
/// into an unsuccessful outcome by the facade implementation; `Err` is
/// reserved for local faults.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub message: Option<String>,
    pub gateway_reference_id: Option<String>,
    pub error_code: Option<String>,
    pub test_mode: bool,
    /// Verbatim gateway payload; unknown keys preserved, insertion-ordered.
    pub raw_fields: Value,
}

impl Outcome {
    /// Merges a follow-up sub-call into this outcome so a composite gateway
    /// interaction (e.g. store a card, then update the customer default) is
    /// recorded exactly once. The combined outcome succeeds only if both
    /// did, and a failing follow-up supplies the message and error detail.
    pub fn merge_follow_up(self, follow_up: Outcome) -> Outcome {
        if follow_up.success {
            Outcome {
                success: self.success,
                gateway_reference_id: self.gateway_reference_id.or(follow_up.gateway_reference_id),
                ..self
            }
        } else {
            Outcome {
                success: false,
                message: follow_up.message,
                error_code: follow_up.error_code,
                gateway_reference_id: self.gateway_reference_id,
                test_mode: self.test_mode,
                raw_fields: follow_up.raw_fields,
            }
        }
    }
}

/// Boundary to the external payment gateway. The wire protocol behind it is
/// out of scope here; implementations normalize whatever the processor
/// returns into an [`Outcome`].
#[async_trait::async_trait]
pub trait GatewayFacade: Send + Sync {
    fn name(&self) -> &'static str;

    async fn purchase(
        &self,
        amount_minor: i64,
        currency: &str,
        instrument: &InstrumentRef,
        options: &CallOptions,
    ) -> Result<Outcome>;

    async fn authorize(
        &self,
        amount_minor: i64,
        currency: &str,
        instrument: &InstrumentRef,
        options: &CallOptions,
    ) -> Result<Outcome>;

    async fn capture(
        &self,
        amount_minor: i64,
        currency: &str,
        gateway_reference_id: &str,
        options: &CallOptions,
    ) -> Result<Outcome>;

    async fn void(&self, gateway_reference_id: &str, options: &CallOptions) -> Result<Outcome>;

    async fn refund(
        &self,
        amount_minor: i64,
        gateway_reference_id: &str,
        options: &CallOptions,
    ) -> Result<Outcome>;

    async fn store(&self, instrument: &NewInstrument, options: &CallOptions) -> Result<Outcome>;

    async fn update_customer_default(
        &self,
        customer_ref: &str,
        instrument_ref: &str,
        options: &CallOptions,
    ) -> Result<Outcome>;

    async fn unstore(
        &self,
        customer_ref: Option<&str>,
        instrument_ref: &str,
        options: &CallOptions,
    ) -> Result<Outcome>;
}
