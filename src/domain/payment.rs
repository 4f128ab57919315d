use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::properties;
use crate::store::{ResponseRecord, TransactionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiCall {
    Purchase,
    Refund,
    Authorize,
    Capture,
    Void,
    AddPaymentMethod,
    DeletePaymentMethod,
    SetDefaultPaymentMethod,
    Webhook,
    GetBalance,
    CreateManagedAccount,
}

impl ApiCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCall::Purchase => "purchase",
            ApiCall::Refund => "refund",
            ApiCall::Authorize => "authorize",
            ApiCall::Capture => "capture",
            ApiCall::Void => "void",
            ApiCall::AddPaymentMethod => "add_payment_method",
            ApiCall::DeletePaymentMethod => "delete_payment_method",
            ApiCall::SetDefaultPaymentMethod => "set_default_payment_method",
            ApiCall::Webhook => "webhook",
            ApiCall::GetBalance => "get_balance",
            ApiCall::CreateManagedAccount => "create_managed_account",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "purchase" => ApiCall::Purchase,
            "refund" => ApiCall::Refund,
            "authorize" => ApiCall::Authorize,
            "capture" => ApiCall::Capture,
            "void" => ApiCall::Void,
            "add_payment_method" => ApiCall::AddPaymentMethod,
            "delete_payment_method" => ApiCall::DeletePaymentMethod,
            "set_default_payment_method" => ApiCall::SetDefaultPaymentMethod,
            "webhook" => ApiCall::Webhook,
            "get_balance" => ApiCall::GetBalance,
            "create_managed_account" => ApiCall::CreateManagedAccount,
            _ => return None,
        })
    }

    /// Calls that move money towards us and are therefore refundable.
    pub fn is_charge_class(&self) -> bool {
        matches!(self, ApiCall::Purchase | ApiCall::Capture)
    }

    /// Calls tracked in the transaction ledger.
    pub fn is_ledger_class(&self) -> bool {
        matches!(
            self,
            ApiCall::Purchase | ApiCall::Refund | ApiCall::Authorize | ApiCall::Capture | ApiCall::Void
        )
    }
}

impl std::fmt::Display for ApiCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Processed,
    Error,
}

/// Normalized outcome handed back to the caller for every monetary
/// operation, whether served from the ledger or from a fresh gateway call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub api_call: ApiCall,
    pub status: TransactionStatus,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub gateway_error: Option<String>,
    pub gateway_error_code: Option<String>,
    /// Gateway-side settlement reference, when the gateway exposes one.
    pub first_reference_id: Option<String>,
    /// Gateway transaction id usable for later refund lookups.
    pub second_reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub effective_date: DateTime<Utc>,
}

impl PaymentResult {
    /// Rebuilds the caller-facing result from a recorded response and, when
    /// one exists, the ledger row derived from it. The response alone is
    /// enough for failed calls; amounts come from the ledger row only.
    pub fn from_records(response: &ResponseRecord, transaction: Option<&TransactionRecord>) -> Self {
        let (amount_minor, currency, created_at, first_reference_id, second_reference_id) =
            match transaction {
                Some(txn) => (
                    txn.amount_minor,
                    txn.currency.clone(),
                    txn.created_at,
                    properties::extract_str(&response.raw_fields, &["balance_transaction"])
                        .map(str::to_string),
                    txn.gateway_reference_id.clone(),
                ),
                None => (None, None, response.created_at, None, None),
            };

        // Gateways report their own creation timestamp as epoch seconds;
        // prefer it when present so replays agree with the gateway's books.
        let effective_date = properties::extract_i64(&response.raw_fields, &["created"])
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or(created_at);

        let gateway_error = response
            .message
            .clone()
            .or_else(|| {
                properties::extract_str(&response.raw_fields, &["error", "message"])
                    .map(str::to_string)
            })
            .filter(|m| !m.is_empty());
        let gateway_error_code =
            properties::extract_str(&response.raw_fields, &["error", "type"]).map(str::to_string);

        PaymentResult {
            payment_id: response.payment_id,
            transaction_id: response.transaction_id,
            api_call: response.api_call,
            status: if response.success {
                TransactionStatus::Processed
            } else {
                TransactionStatus::Error
            },
            amount_minor,
            currency,
            gateway_error,
            gateway_error_code,
            first_reference_id,
            second_reference_id,
            created_at,
            effective_date,
        }
    }
}
