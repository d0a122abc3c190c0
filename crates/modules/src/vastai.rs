//! Vast.ai backend: rents GPU instances from the marketplace. Instances are
//! created against a machine offer configured on the product and addressed by
//! label afterwards. The server record's access credential is the API key,
//! which Vast.ai takes as a query parameter.

use async_trait::async_trait;
use hostforge_core::types::{ModuleResult, ParameterBag};
use serde_json::Value;
use tracing::debug;

use crate::ProvisioningModule;

const API_BASE: &str = "https://console.vast.ai/api/v0";

pub struct VastAiModule {
    http: reqwest::Client,
    base_url: String,
}

impl Default for VastAiModule {
    fn default() -> Self {
        Self::new()
    }
}

impl VastAiModule {
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

    fn url(&self, params: &ParameterBag, path: &str) -> String {
        format!("{}{}?api_key={}", self.base_url, path, params.server_password)
    }

    async fn find_instance_id(&self, params: &ParameterBag) -> anyhow::Result<Option<i64>> {
        let body: Value = self
            .http
            .get(self.url(params, "/instances/"))
            .send()
            .await?
            .json()
            .await?;

        let instances = body.get("instances").and_then(Value::as_array);
        Ok(instances.and_then(|list| {
            list.iter()
                .find(|i| i.get("label").and_then(Value::as_str) == Some(&params.username))
                .and_then(|i| i.get("id").and_then(Value::as_i64))
        }))
    }

    async fn set_instance_state(
        &self,
        params: &ParameterBag,
        state: &str,
    ) -> anyhow::Result<ModuleResult> {
        let Some(id) = self.find_instance_id(params).await? else {
            return Ok(ModuleResult::failure(format!(
                "instance labelled `{}` not found",
                params.username
            )));
        };

        debug!(module = "vastai", instance = id, state, "Changing instance state");
        let body: Value = self
            .http
            .put(self.url(params, &format!("/instances/{id}/")))
            .json(&serde_json::json!({ "state": state }))
            .send()
            .await?
            .json()
            .await?;

        Ok(parse_vast_response(&body))
    }
}

fn parse_vast_response(body: &Value) -> ModuleResult {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    if success {
        ModuleResult::ok()
    } else {
        let message = body
            .get("msg")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown Vast.ai error");
        ModuleResult::failure(message)
    }
}

#[async_trait]
impl ProvisioningModule for VastAiModule {
    fn name(&self) -> &str {
        "vastai"
    }

    async fn create_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let Some(offer_id) = params.option("offer_id") else {
            return Ok(ModuleResult::failure(
                "no machine offer configured for this product",
            ));
        };

        let payload = serde_json::json!({
            "client_id": "me",
            "image": params.option_or("image", "pytorch/pytorch"),
            "disk": params.option_or("disk", "32"),
            "label": params.username,
        });

        debug!(module = "vastai", offer_id, label = %params.username, "Renting GPU instance");
        let body: Value = self
            .http
            .put(self.url(params, &format!("/asks/{offer_id}/")))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        let mut result = parse_vast_response(&body);
        if result.success {
            if let Some(contract) = body.get("new_contract").and_then(Value::as_i64) {
                result.message = Some(format!("contract {contract}"));
            }
        }
        Ok(result)
    }

    async fn suspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        self.set_instance_state(params, "stopped").await
    }

    async fn unsuspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        self.set_instance_state(params, "running").await
    }

    async fn terminate_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let Some(id) = self.find_instance_id(params).await? else {
            return Ok(ModuleResult::failure(format!(
                "instance labelled `{}` not found",
                params.username
            )));
        };

        let body: Value = self
            .http
            .delete(self.url(params, &format!("/instances/{id}/")))
            .send()
            .await?
            .json()
            .await?;

        Ok(parse_vast_response(&body))
    }

    async fn change_password(&self, _params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        // Marketplace instances authenticate by SSH key; there is no account
        // password to rotate.
        Ok(ModuleResult::failure(
            "password changes are not supported by vastai",
        ))
    }
}
