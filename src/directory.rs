use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Default)]
pub struct AccountInfo {
    pub email: Option<String>,
    pub external_key: Option<String>,
}

/// Read-only view of the host's account directory. The core only pulls
/// descriptive metadata from it (email for instrument registration).
#[async_trait::async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn account_by_id(&self, tenant_id: Uuid, account_id: Uuid) -> Result<AccountInfo>;
}

/// Fixed directory for tests and demos.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: Mutex<HashMap<(Uuid, Uuid), AccountInfo>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: Uuid, account_id: Uuid, info: AccountInfo) {
        self.accounts
            .lock()
            .unwrap()
            .insert((tenant_id, account_id), info);
    }
}

#[async_trait::async_trait]
impl AccountDirectory for StaticDirectory {
    async fn account_by_id(&self, tenant_id: Uuid, account_id: Uuid) -> Result<AccountInfo> {
        self.accounts
            .lock()
            .unwrap()
            .get(&(tenant_id, account_id))
            .cloned()
            .ok_or_else(|| CoreError::not_found("account", account_id))
    }
}
