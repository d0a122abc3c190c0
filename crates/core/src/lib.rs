//! HostForge core: shared domain types, error taxonomy, configuration,
//! and the notification sink used by the provisioning engine.

pub mod config;
pub mod error;
pub mod notify;
pub mod types;

pub use config::AppConfig;
pub use error::{ProvisionError, ProvisionResult};
