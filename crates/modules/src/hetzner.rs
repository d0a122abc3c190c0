//! Hetzner Cloud backend: provisions cloud compute servers through the
//! public Hetzner Cloud API. The assigned server record's access credential
//! is the API token; accounts are addressed by instance name.

use async_trait::async_trait;
use hostforge_core::types::{ModuleResult, ParameterBag};
use serde_json::Value;
use tracing::debug;

use crate::{username_from_domain, ProvisioningModule};

const API_BASE: &str = "https://api.hetzner.cloud/v1";

pub struct HetznerModule {
    http: reqwest::Client,
    base_url: String,
}

impl Default for HetznerModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HetznerModule {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Override the API base URL (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn instance_name(params: &ParameterBag) -> String {
        if params.username.is_empty() {
            username_from_domain(&params.domain)
        } else {
            params.username.clone()
        }
    }

    /// Instances are addressed by name: list with the name filter and take
    /// the single match.
    async fn find_instance_id(&self, params: &ParameterBag) -> anyhow::Result<Option<i64>> {
        let name = Self::instance_name(params);
        let url = format!("{}/servers?name={}", self.base_url, name);
        let body: Value = self
            .http
            .get(&url)
            .bearer_auth(&params.server_password)
            .send()
            .await?
            .json()
            .await?;

        Ok(body
            .pointer("/servers/0/id")
            .and_then(Value::as_i64))
    }

    async fn server_action(
        &self,
        params: &ParameterBag,
        action: &str,
    ) -> anyhow::Result<ModuleResult> {
        let Some(id) = self.find_instance_id(params).await? else {
            return Ok(ModuleResult::failure(format!(
                "instance `{}` not found",
                Self::instance_name(params)
            )));
        };

        let url = format!("{}/servers/{}/actions/{}", self.base_url, id, action);
        debug!(module = "hetzner", action, instance = id, "Calling Hetzner Cloud API");
        let body: Value = self
            .http
            .post(&url)
            .bearer_auth(&params.server_password)
            .send()
            .await?
            .json()
            .await?;

        Ok(parse_hetzner_response(&body))
    }
}

fn parse_hetzner_response(body: &Value) -> ModuleResult {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        ModuleResult::failure(message)
    } else {
        ModuleResult::ok()
    }
}

#[async_trait]
impl ProvisioningModule for HetznerModule {
    fn name(&self) -> &str {
        "hetzner"
    }

    async fn create_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let name = Self::instance_name(params);
        let payload = serde_json::json!({
            "name": name,
            "server_type": params.option_or("server_type", "cx22"),
            "image": params.option_or("image", "ubuntu-24.04"),
            "location": params.option_or("location", "fsn1"),
        });

        let url = format!("{}/servers", self.base_url);
        debug!(module = "hetzner", instance = %name, "Creating cloud server");
        let body: Value = self
            .http
            .post(&url)
            .bearer_auth(&params.server_password)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
            return Ok(ModuleResult::failure(message));
        }

        let mut result = ModuleResult::ok();
        result.username = Some(name);
        // Hetzner generates a root password unless an SSH key was injected.
        if let Some(root_password) = body.get("root_password").and_then(Value::as_str) {
            result.password = Some(root_password.to_string());
        }
        Ok(result)
    }

    async fn suspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        self.server_action(params, "poweroff").await
    }

    async fn unsuspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        self.server_action(params, "poweron").await
    }

    async fn terminate_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let Some(id) = self.find_instance_id(params).await? else {
            return Ok(ModuleResult::failure(format!(
                "instance `{}` not found",
                Self::instance_name(params)
            )));
        };

        let url = format!("{}/servers/{}", self.base_url, id);
        let body: Value = self
            .http
            .delete(&url)
            .bearer_auth(&params.server_password)
            .send()
            .await?
            .json()
            .await?;

        Ok(parse_hetzner_response(&body))
    }

    async fn change_password(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let Some(id) = self.find_instance_id(params).await? else {
            return Ok(ModuleResult::failure(format!(
                "instance `{}` not found",
                Self::instance_name(params)
            )));
        };

        let url = format!("{}/servers/{}/actions/reset_password", self.base_url, id);
        let body: Value = self
            .http
            .post(&url)
            .bearer_auth(&params.server_password)
            .send()
            .await?
            .json()
            .await?;

        if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
            return Ok(ModuleResult::failure(message));
        }

        let mut result = ModuleResult::ok();
        if let Some(root_password) = body.get("root_password").and_then(Value::as_str) {
            result.password = Some(root_password.to_string());
        }
        Ok(result)
    }
}
