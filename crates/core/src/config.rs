use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `HOSTFORGE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    /// Upper bound on a single provider module call. A call that exceeds it
    /// is treated as a provider failure.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Provision services automatically when their invoice settles.
    #[serde(default = "default_auto_provision")]
    pub auto_provision: bool,
    /// Reason passed to provider modules on suspension.
    #[serde(default = "default_suspend_reason")]
    pub suspend_reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Base64-encoded 256-bit master key. Empty means generate an ephemeral
    /// key at startup (secrets will not survive a restart).
    #[serde(default = "default_master_key")]
    pub master_key: String,
}

fn default_call_timeout_secs() -> u64 {
    30
}
fn default_auto_provision() -> bool {
    true
}
fn default_suspend_reason() -> String {
    "Administrative action".to_string()
}
fn default_master_key() -> String {
    String::new()
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            auto_provision: default_auto_provision(),
            suspend_reason: default_suspend_reason(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key: default_master_key(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provisioning: ProvisioningConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("HOSTFORGE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
