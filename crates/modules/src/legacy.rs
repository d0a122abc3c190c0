//! Legacy module convention: providers inherited from the prior platform
//! generation register each operation as a separate callable named
//! `{module}_{Operation}`. `LegacyModuleAdapter` presents that table behind
//! the normal [`ProvisioningModule`] contract so callers never see the
//! difference.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hostforge_core::types::{ModuleResult, ParameterBag};
use tracing::debug;

use crate::ProvisioningModule;

/// A single legacy operation: a synchronous callable taking the parameter
/// bag and returning a normalized result.
pub type LegacyFunction = Arc<dyn Fn(&ParameterBag) -> ModuleResult + Send + Sync>;

/// The five operations of the legacy naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateAccount,
    SuspendAccount,
    UnsuspendAccount,
    TerminateAccount,
    ChangePassword,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateAccount => "CreateAccount",
            Self::SuspendAccount => "SuspendAccount",
            Self::UnsuspendAccount => "UnsuspendAccount",
            Self::TerminateAccount => "TerminateAccount",
            Self::ChangePassword => "ChangePassword",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapts a table of `{module}_{Operation}` callables to the capability
/// contract. A registered module missing one operation reports a failed
/// result naming the absent function rather than panicking.
pub struct LegacyModuleAdapter {
    module: String,
    table: Arc<DashMap<String, LegacyFunction>>,
}

impl LegacyModuleAdapter {
    pub fn new(module: impl Into<String>, table: Arc<DashMap<String, LegacyFunction>>) -> Self {
        Self {
            module: module.into(),
            table,
        }
    }

    fn call(&self, operation: Operation, params: &ParameterBag) -> ModuleResult {
        let function_name = format!("{}_{}", self.module, operation);
        match self.table.get(&function_name) {
            Some(function) => {
                debug!(module = %self.module, operation = %operation, "Dispatching legacy module function");
                function(params)
            }
            None => ModuleResult::failure(format!(
                "function {function_name} not defined in module {}",
                self.module
            )),
        }
    }
}

#[async_trait]
impl ProvisioningModule for LegacyModuleAdapter {
    fn name(&self) -> &str {
        &self.module
    }

    async fn create_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        Ok(self.call(Operation::CreateAccount, params))
    }

    async fn suspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        Ok(self.call(Operation::SuspendAccount, params))
    }

    async fn unsuspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        Ok(self.call(Operation::UnsuspendAccount, params))
    }

    async fn terminate_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        Ok(self.call(Operation::TerminateAccount, params))
    }

    async fn change_password(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        Ok(self.call(Operation::ChangePassword, params))
    }
}
