//! Module registry and resolver: maps a module name to a provisioning
//! implementation. Native, statically-known backends resolve first; names
//! with registered `{module}_{Operation}` functions fall back to the legacy
//! adapter. Unknown names are a permanent configuration defect.

use std::sync::Arc;

use dashmap::DashMap;
use hostforge_core::{ProvisionError, ProvisionResult};
use tracing::info;

use crate::cpanel::CpanelModule;
use crate::hetzner::HetznerModule;
use crate::legacy::{LegacyFunction, LegacyModuleAdapter, Operation};
use crate::vastai::VastAiModule;
use crate::ProvisioningModule;

/// Registry of provisioning implementations, shared across orchestration
/// tasks. Resolution is cheap; resolved handles are stateless and safe to
/// reuse or re-resolve per call.
pub struct ModuleRegistry {
    native: DashMap<String, Arc<dyn ProvisioningModule>>,
    legacy: Arc<DashMap<String, LegacyFunction>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            native: DashMap::new(),
            legacy: Arc::new(DashMap::new()),
        }
    }

    /// Create a registry pre-populated with every built-in backend.
    pub fn with_default_modules() -> Self {
        let registry = Self::new();
        registry.register_native(Arc::new(CpanelModule::new()));
        registry.register_native(Arc::new(HetznerModule::new()));
        registry.register_native(Arc::new(VastAiModule::new()));
        info!(
            module_count = registry.native.len(),
            "Module registry initialized"
        );
        registry
    }

    /// Register a native module under its own name.
    pub fn register_native(&self, module: Arc<dyn ProvisioningModule>) {
        self.native.insert(module.name().to_string(), module);
    }

    /// Register a single legacy operation under the `{module}_{Operation}`
    /// naming convention.
    pub fn register_legacy_function(
        &self,
        module: &str,
        operation: Operation,
        function: LegacyFunction,
    ) {
        self.legacy
            .insert(format!("{module}_{operation}"), function);
    }

    /// Resolve a module name to an implementation. Native registrations win;
    /// otherwise any legacy function registered under the module's prefix
    /// makes the name resolvable through the adapter.
    pub fn resolve(&self, name: &str) -> ProvisionResult<Arc<dyn ProvisioningModule>> {
        if let Some(module) = self.native.get(name) {
            return Ok(Arc::clone(module.value()));
        }

        let prefix = format!("{name}_");
        let has_legacy = self.legacy.iter().any(|entry| entry.key().starts_with(&prefix));
        if has_legacy {
            return Ok(Arc::new(LegacyModuleAdapter::new(
                name,
                Arc::clone(&self.legacy),
            )));
        }

        Err(ProvisionError::ModuleNotFound(name.to_string()))
    }

    /// Names of all resolvable native modules, for diagnostics.
    pub fn module_names(&self) -> Vec<String> {
        self.native.iter().map(|entry| entry.key().clone()).collect()
    }
}
