use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata kept about a stored instrument. Sensitive material (full PAN,
/// account numbers) never lands here; the gateway token is the reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentDetails {
    Card {
        brand: Option<String>,
        last4: Option<String>,
        exp_month: Option<u8>,
        exp_year: Option<u16>,
        holder_name: Option<String>,
        address1: Option<String>,
        address2: Option<String>,
        city: Option<String>,
        state: Option<String>,
        zip: Option<String>,
        country: Option<String>,
    },
    BankAccount {
        bank_name: Option<String>,
        account_last4: Option<String>,
        routing_number: Option<String>,
        account_type: Option<String>,
        holder_name: Option<String>,
    },
}

impl InstrumentDetails {
    /// Card metadata from the raw object a gateway echoes back. Out-of-range
    /// numeric fields degrade to `None` rather than wrapping.
    pub fn from_card_object(card: &serde_json::Map<String, serde_json::Value>) -> Self {
        use serde_json::Value;
        let get = |key: &str| card.get(key).and_then(Value::as_str).map(str::to_string);
        InstrumentDetails::Card {
            brand: get("brand").or_else(|| get("type")),
            last4: get("last4"),
            exp_month: card
                .get("exp_month")
                .and_then(Value::as_u64)
                .and_then(|v| u8::try_from(v).ok()),
            exp_year: card
                .get("exp_year")
                .and_then(Value::as_u64)
                .and_then(|v| u16::try_from(v).ok()),
            holder_name: get("name"),
            address1: get("address_line1"),
            address2: get("address_line2"),
            city: get("address_city"),
            state: get("address_state"),
            zip: get("address_zip"),
            country: get("address_country"),
        }
    }
}

/// What the caller hands us when registering a new instrument: either a
/// token minted client-side, or raw bank account details (the one flow the
/// gateway accepts untokenized).
#[derive(Debug, Clone)]
pub enum NewInstrument {
    Token(String),
    BankAccount {
        bank_name: Option<String>,
        routing_number: String,
        account_number: String,
        account_type: String,
    },
}

/// Reference to an instrument for a monetary call.
#[derive(Debug, Clone)]
pub struct InstrumentRef {
    pub external_instrument_id: String,
    pub customer_ref: Option<String>,
}

/// One entry of the authoritative payment-method list supplied by the
/// external caller during reconciliation.
#[derive(Debug, Clone)]
pub struct KnownInstrument {
    pub external_instrument_id: String,
    pub payment_method_id: Uuid,
    pub is_default: bool,
}
