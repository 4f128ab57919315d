use uuid::Uuid;

/// Tenant partition key threaded through every operation. Tenancy is opaque
/// to the core: it scopes lookups and uniqueness, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub tenant_id: Uuid,
}

impl CallContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }
}
