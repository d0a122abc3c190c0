use thiserror::Error;
use uuid::Uuid;

use crate::types::ServiceStatus;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Error taxonomy for the provisioning path. None of these are retried
/// automatically; every variant is terminal for the operation that raised it.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("no server assigned to service")]
    MissingServer,

    #[error("product not found for service")]
    MissingProduct,

    #[error("server {0} not found")]
    ServerNotFound(Uuid),

    #[error("client {0} not found")]
    ClientNotFound(Uuid),

    #[error("server {server} is at capacity ({accounts}/{capacity})")]
    CapacityExceeded { server: Uuid, accounts: u32, capacity: u32 },

    #[error("provisioning module `{0}` not found")]
    ModuleNotFound(String),

    #[error("stored credential could not be decrypted")]
    CorruptCredential,

    #[error("illegal transition {from} -> {to}")]
    InvalidTransition { from: ServiceStatus, to: ServiceStatus },

    #[error("operation requires an active service (service is {0})")]
    ServiceNotActive(ServiceStatus),

    #[error("provisioning timed out after {0}s")]
    Timeout(u64),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
