pub mod config;
pub mod directory;
pub mod domain {
    pub mod context;
    pub mod instrument;
    pub mod payment;
    pub mod properties;
}
pub mod error;
pub mod gateway;
pub mod reconcile;
pub mod repo {
    pub mod payment_methods_repo;
    pub mod responses_repo;
    pub mod transactions_repo;
}
pub mod search;
pub mod service {
    pub mod orchestrator;
}
pub mod store;

pub use config::AppConfig;
pub use error::{CoreError, Result};
pub use service::orchestrator::PaymentOrchestrator;
