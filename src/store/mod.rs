use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::instrument::InstrumentDetails;
use crate::domain::payment::ApiCall;
use crate::error::{CoreError, Result};

pub mod memory;

/// One row per gateway call attempt, success or failure. Append-only: the
/// core never updates or deletes a response once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: i64,
    pub api_call: ApiCall,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub transaction_type: Option<String>,
    pub processor_account_id: Option<String>,
    pub message: Option<String>,
    pub gateway_reference_id: Option<String>,
    pub success: bool,
    pub test_mode: bool,
    pub raw_fields: Value,
    pub tenant_id: Uuid,
    pub account_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewResponse {
    pub api_call: ApiCall,
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub transaction_type: Option<String>,
    pub processor_account_id: Option<String>,
    pub message: Option<String>,
    pub gateway_reference_id: Option<String>,
    pub success: bool,
    pub test_mode: bool,
    pub raw_fields: Value,
    pub tenant_id: Uuid,
    pub account_id: Option<Uuid>,
}

/// One row per successful monetary operation; the idempotency unit. At most
/// one row ever exists for a `(tenant, payment, transaction)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub response_id: i64,
    pub api_call: ApiCall,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub gateway_reference_id: Option<String>,
    pub tenant_id: Uuid,
    pub account_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub response_id: i64,
    pub api_call: ApiCall,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub gateway_reference_id: Option<String>,
    pub tenant_id: Uuid,
    pub account_id: Option<Uuid>,
}

/// One row per stored instrument. Soft-deleted, never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodRecord {
    pub id: i64,
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    /// Caller-assigned logical id; unset until the caller confirms the
    /// instrument (reconciliation fills it in later).
    pub payment_method_id: Option<Uuid>,
    pub external_instrument_id: String,
    pub customer_ref: Option<String>,
    pub details: Option<InstrumentDetails>,
    pub is_default: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentMethod {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub payment_method_id: Option<Uuid>,
    pub external_instrument_id: String,
    pub customer_ref: Option<String>,
    pub details: Option<InstrumentDetails>,
    pub is_default: bool,
}

#[async_trait::async_trait]
pub trait ResponseLog: Send + Sync {
    /// Durable append. No dedup, no overwrite; failures are recorded too.
    async fn record(&self, new: NewResponse) -> Result<ResponseRecord>;

    async fn get(&self, id: i64) -> Result<ResponseRecord>;

    async fn find_by_gateway_reference(
        &self,
        tenant_id: Uuid,
        reference: &str,
    ) -> Result<Vec<ResponseRecord>>;

    /// All responses for a payment and call class, ordered by id ascending.
    async fn find_for_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        api_call: ApiCall,
    ) -> Result<Vec<ResponseRecord>>;

    /// Distinct count over the same predicate `search_batch` pages through.
    async fn search_count(&self, tenant_id: Uuid, api_call: ApiCall, key: &str) -> Result<i64>;

    async fn search_batch(
        &self,
        tenant_id: Uuid,
        api_call: ApiCall,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ResponseRecord>>;
}

#[async_trait::async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Inserts the transaction unless one already exists for the logical
    /// pair, in which case the existing row is returned with `false`. The
    /// loser of a concurrent race reads back the winner's row; the backing
    /// store enforces uniqueness.
    async fn record_if_absent(&self, new: NewTransaction) -> Result<(TransactionRecord, bool)>;

    async fn find_by_transaction(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionRecord>>;

    /// Ledger rows for a payment, ordered by created_at then id ascending.
    async fn transactions_for(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<TransactionRecord>>;

    /// Picks the charge a refund is taken against, validating the request
    /// against the payment's cumulative charge/refund history. Backends with
    /// real transactions override this to serialize concurrent refund
    /// decisions per payment.
    async fn find_candidate_for_refund(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        amount_minor: i64,
    ) -> Result<TransactionRecord> {
        let rows = self.transactions_for(tenant_id, payment_id).await?;
        select_refund_candidate(&rows, payment_id, amount_minor).cloned()
    }
}

#[async_trait::async_trait]
pub trait PaymentMethodStore: Send + Sync {
    async fn create(&self, new: NewPaymentMethod) -> Result<PaymentMethodRecord>;

    /// Binds a previously unlinked local record to the caller's logical id.
    async fn link_payment_method_id(&self, id: i64, payment_method_id: Uuid) -> Result<()>;

    /// Soft delete. Zero active matches is `NotFound`; more than one active
    /// record under the same logical id is a data-integrity fault and is
    /// never silently resolved.
    async fn mark_deleted(&self, tenant_id: Uuid, payment_method_id: Uuid) -> Result<()>;

    async fn set_default(&self, tenant_id: Uuid, account_id: Uuid, id: i64) -> Result<()>;

    async fn active_by_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<PaymentMethodRecord>>;

    /// Resolves a logical id to exactly one active record.
    async fn active_by_payment_method_id(
        &self,
        tenant_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<PaymentMethodRecord>;

    async fn search_count(&self, tenant_id: Uuid, key: &str) -> Result<i64>;

    async fn search_batch(
        &self,
        tenant_id: Uuid,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PaymentMethodRecord>>;
}

/// Refund eligibility over a payment's full ledger history.
///
/// Candidates are successful charge-class rows whose amount covers the
/// requested refund; eligibility compares the candidates' total against what
/// was already refunded across the payment. The oldest qualifying charge
/// wins, so repeated attempts pick deterministically.
pub fn select_refund_candidate(
    rows: &[TransactionRecord],
    payment_id: Uuid,
    amount_minor: i64,
) -> Result<&TransactionRecord> {
    let charges: Vec<&TransactionRecord> = rows
        .iter()
        .filter(|t| t.api_call.is_charge_class() && t.amount_minor.is_some())
        .collect();
    if charges.is_empty() {
        return Err(CoreError::NoChargeFound { payment_id });
    }

    let already_refunded: i64 = rows
        .iter()
        .filter(|t| t.api_call == ApiCall::Refund)
        .filter_map(|t| t.amount_minor)
        .sum();

    let candidates: Vec<&TransactionRecord> = charges
        .iter()
        .copied()
        .filter(|t| t.amount_minor.is_some_and(|a| a >= amount_minor))
        .collect();

    let Some(first) = candidates.first() else {
        // Charges exist, just none large enough to carry this refund.
        let remaining: i64 = charges.iter().filter_map(|t| t.amount_minor).sum::<i64>()
            - already_refunded;
        return Err(CoreError::RefundExceedsCharge {
            payment_id,
            requested: amount_minor,
            remaining,
        });
    };

    let candidate_total: i64 = candidates.iter().filter_map(|t| t.amount_minor).sum();
    let remaining = candidate_total - already_refunded;
    if remaining < amount_minor {
        return Err(CoreError::RefundExceedsCharge {
            payment_id,
            requested: amount_minor,
            remaining,
        });
    }

    Ok(first)
}
