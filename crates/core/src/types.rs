use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A billing client who owns one or more services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub email: String,
    pub address1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            company: None,
            email: email.into(),
            address1: None,
            city: None,
            state: None,
            postcode: None,
            country: None,
            phone: None,
            created_at: Utc::now(),
        }
    }
}

/// A sellable hosting plan. Read-only input to the provisioning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Which provisioning module backs this product (e.g. "cpanel", "hetzner").
    pub module_name: String,
    /// Per-module configuration: package name, disk quota, bandwidth, image, etc.
    pub module_config: HashMap<String, String>,
    pub active: bool,
}

impl Product {
    pub fn new(name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            module_name: module_name.into(),
            module_config: HashMap::new(),
            active: true,
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.module_config.insert(key.into(), value.into());
        self
    }
}

/// A provisioning target: a control-panel box, a cloud region account,
/// or a GPU marketplace credential. Account counters are mutated only by
/// the capacity admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    /// Access username for the provider API (root user, token owner, ...).
    pub username: String,
    /// Access credential, encrypted at rest by the vault.
    pub password_enc: Option<String>,
    /// Whether provider API calls use TLS.
    pub secure: bool,
    /// Accounts currently provisioned and serving.
    pub active_accounts: u32,
    /// Slots reserved by in-flight provisioning attempts, not yet committed.
    pub reserved_accounts: u32,
    /// Maximum account capacity; 0 means unlimited.
    pub max_accounts: u32,
    pub module_name: String,
    pub is_active: bool,
}

impl Server {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            hostname: hostname.into(),
            ip: String::new(),
            port: 0,
            username: String::new(),
            password_enc: None,
            secure: true,
            active_accounts: 0,
            reserved_accounts: 0,
            max_accounts: 0,
            module_name: module_name.into(),
            is_active: true,
        }
    }
}

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Active,
    Suspended,
    Terminated,
    Cancelled,
    Failed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin-requested lifecycle action carried by domain events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Suspend,
    Unsuspend,
    Terminate,
}

/// A provisioned unit of hosting owned by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub client_id: Uuid,
    pub product_id: Uuid,
    /// Assigned only once; never reassigned while active.
    pub server_id: Option<Uuid>,
    /// The invoice whose settlement triggers activation.
    pub invoice_id: Option<Uuid>,
    pub domain: String,
    pub username: String,
    /// Service password, encrypted at rest by the vault.
    pub password_enc: Option<String>,
    pub status: ServiceStatus,
    pub activated_at: Option<DateTime<Utc>>,
    /// Free-text notes; the engine records failure reasons here.
    pub notes: Option<String>,
    /// Per-service overrides merged over the product's module config.
    pub config_options: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized outcome of a provider module call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleResult {
    pub success: bool,
    /// Some providers generate their own account username.
    pub username: Option<String>,
    /// Some providers generate their own account password.
    pub password: Option<String>,
    pub message: Option<String>,
}

impl ModuleResult {
    pub fn ok() -> Self {
        Self { success: true, username: None, password: None, message: None }
    }

    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            success: true,
            username: Some(username.into()),
            password: Some(password.into()),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, username: None, password: None, message: Some(message.into()) }
    }
}

/// Client identity fields passed to provider modules.
#[derive(Debug, Clone)]
pub struct ClientDetails {
    pub client_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub email: String,
    pub address1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
}

impl From<&Client> for ClientDetails {
    fn from(c: &Client) -> Self {
        Self {
            client_id: c.id,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            company: c.company.clone(),
            email: c.email.clone(),
            address1: c.address1.clone(),
            city: c.city.clone(),
            state: c.state.clone(),
            postcode: c.postcode.clone(),
            country: c.country.clone(),
            phone: c.phone.clone(),
        }
    }
}

/// Provider-agnostic parameter bag built fresh per module call.
///
/// Holds decrypted secrets for the duration of a single operation, which is
/// why it is never serialized and its `Debug` impl redacts credentials.
#[derive(Clone)]
pub struct ParameterBag {
    pub service_id: Uuid,
    pub product_id: Uuid,
    pub server_id: Uuid,
    pub domain: String,
    pub username: String,
    pub password: String,
    pub server_host: String,
    pub server_ip: String,
    pub server_port: u16,
    pub server_secure: bool,
    pub server_username: String,
    pub server_password: String,
    pub client: ClientDetails,
    /// Product module config merged with service overrides (service wins).
    pub config_options: HashMap<String, String>,
}

impl ParameterBag {
    /// Look up a merged config option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.config_options.get(key).map(String::as_str)
    }

    /// Look up a merged config option with a fallback default.
    pub fn option_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.option(key).unwrap_or(default)
    }
}

impl std::fmt::Debug for ParameterBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterBag")
            .field("service_id", &self.service_id)
            .field("server_id", &self.server_id)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("server_username", &self.server_username)
            .field("server_password", &"<redacted>")
            .finish()
    }
}
