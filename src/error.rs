use uuid::Uuid;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure taxonomy of the core. Business failures carry enough detail for
/// the caller to act on; infrastructure failures convert from the driver
/// errors untouched.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("no successful charge found for payment {payment_id}")]
    NoChargeFound { payment_id: Uuid },

    #[error(
        "refund of {requested} exceeds refundable amount for payment {payment_id} ({remaining} remaining)"
    )]
    RefundExceedsCharge {
        payment_id: Uuid,
        requested: i64,
        remaining: i64,
    },

    #[error("{count} active records mapped to payment method {payment_method_id}")]
    AmbiguousMapping {
        payment_method_id: Uuid,
        count: usize,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("multiple gateway customers attached to account {account_id}")]
    AmbiguousCustomer { account_id: Uuid },

    #[error("gateway rejected the request: {message}")]
    GatewayRejected {
        message: String,
        code: Option<String>,
    },

    #[error("unknown api call `{0}`")]
    UnknownApiCall(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
