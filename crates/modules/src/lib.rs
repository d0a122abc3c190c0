//! Provisioning modules: one backend-specific implementation of the
//! provisioning capability set per supported provider, plus the registry
//! that resolves a module name to an implementation and the adapter for the
//! legacy function-naming convention.

pub mod cpanel;
pub mod hetzner;
pub mod legacy;
pub mod registry;
pub mod vastai;

use async_trait::async_trait;
use hostforge_core::types::{ModuleResult, ParameterBag};

pub use legacy::{LegacyFunction, LegacyModuleAdapter, Operation};
pub use registry::ModuleRegistry;

/// The provisioning capability set every provider backend implements.
///
/// Implementations are stateless across calls: the registry may hand out one
/// shared instance or a fresh one per call. Provider-reported errors come
/// back as failed `ModuleResult`s; `Err` is reserved for transport faults
/// (connection refused, DNS, TLS) that never reached the provider.
#[async_trait]
pub trait ProvisioningModule: Send + Sync {
    fn name(&self) -> &str;

    async fn create_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult>;
    async fn suspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult>;
    async fn unsuspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult>;
    async fn terminate_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult>;
    async fn change_password(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult>;
}

/// Generate a random alphanumeric password for providers that require one
/// when the service record has none yet.
pub(crate) fn generate_password(length: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Derive an account username from a domain name: leading alphanumerics,
/// lowercased, at most eight characters.
pub(crate) fn username_from_domain(domain: &str) -> String {
    let derived: String = domain
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_lowercase();
    if derived.is_empty() {
        generate_password(8).to_lowercase()
    } else {
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_from_domain() {
        assert_eq!(username_from_domain("example.com"), "examplec");
        assert_eq!(username_from_domain("my-site.io"), "mysiteio");
        // Non-ASCII-alphanumeric domains still yield something usable.
        assert_eq!(username_from_domain("...").len(), 8);
    }

    #[test]
    fn test_generate_password_length() {
        let password = generate_password(16);
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
