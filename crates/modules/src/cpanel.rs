//! cPanel/WHM backend: shared-hosting control panel provisioning over the
//! WHM JSON API (`createacct`, `suspendacct`, `unsuspendacct`, `removeacct`,
//! `passwd`).

use async_trait::async_trait;
use hostforge_core::types::{ModuleResult, ParameterBag};
use serde_json::Value;
use tracing::debug;

use crate::{generate_password, username_from_domain, ProvisioningModule};

const DEFAULT_WHM_PORT: u16 = 2087;

pub struct CpanelModule {
    http: reqwest::Client,
}

impl Default for CpanelModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CpanelModule {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn api_url(&self, params: &ParameterBag, endpoint: &str) -> String {
        let scheme = if params.server_secure { "https" } else { "http" };
        let host = if params.server_ip.is_empty() {
            &params.server_host
        } else {
            &params.server_ip
        };
        let port = if params.server_port == 0 {
            DEFAULT_WHM_PORT
        } else {
            params.server_port
        };
        format!("{scheme}://{host}:{port}/json-api/{endpoint}")
    }

    async fn call(
        &self,
        params: &ParameterBag,
        endpoint: &str,
        form: &[(&str, String)],
    ) -> anyhow::Result<ModuleResult> {
        let url = self.api_url(params, endpoint);
        debug!(module = "cpanel", endpoint, domain = %params.domain, "Calling WHM API");

        let response = self
            .http
            .post(&url)
            .basic_auth(&params.server_username, Some(&params.server_password))
            .form(form)
            .send()
            .await?;

        let body: Value = response.json().await?;
        Ok(parse_whm_response(&body))
    }
}

/// WHM wraps every call in `metadata.result` (1 = success) with a
/// human-readable `metadata.reason` on failure.
fn parse_whm_response(body: &Value) -> ModuleResult {
    let result = body
        .pointer("/metadata/result")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if result == 1 {
        ModuleResult::ok()
    } else {
        let reason = body
            .pointer("/metadata/reason")
            .and_then(Value::as_str)
            .unwrap_or("Unknown WHM error");
        ModuleResult::failure(reason)
    }
}

#[async_trait]
impl ProvisioningModule for CpanelModule {
    fn name(&self) -> &str {
        "cpanel"
    }

    async fn create_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let username = if params.username.is_empty() {
            username_from_domain(&params.domain)
        } else {
            params.username.clone()
        };
        let password = if params.password.is_empty() {
            generate_password(16)
        } else {
            params.password.clone()
        };

        let form = [
            ("username", username.clone()),
            ("domain", params.domain.clone()),
            ("plan", params.option_or("package", "default").to_string()),
            ("password", password.clone()),
            ("quota", params.option_or("diskspace", "1000").to_string()),
            ("bwlimit", params.option_or("bandwidth", "10000").to_string()),
            ("contactemail", params.client.email.clone()),
        ];

        let mut result = self.call(params, "createacct", &form).await?;
        if result.success {
            // Hand generated credentials back so the service record adopts them.
            result.username = Some(username);
            result.password = Some(password);
        }
        Ok(result)
    }

    async fn suspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let form = [
            ("user", params.username.clone()),
            (
                "reason",
                params
                    .option_or("suspendreason", "Administrative action")
                    .to_string(),
            ),
        ];
        self.call(params, "suspendacct", &form).await
    }

    async fn unsuspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let form = [("user", params.username.clone())];
        self.call(params, "unsuspendacct", &form).await
    }

    async fn terminate_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let form = [("user", params.username.clone())];
        self.call(params, "removeacct", &form).await
    }

    async fn change_password(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
        let form = [
            ("user", params.username.clone()),
            ("password", params.password.clone()),
        ];
        self.call(params, "passwd", &form).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostforge_core::types::{Client, ClientDetails};
    use httpmock::prelude::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn bag_for(server: &MockServer) -> ParameterBag {
        let client = Client::new("Ada", "Lovelace", "ada@example.com");
        ParameterBag {
            service_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            domain: "example.com".into(),
            username: "example1".into(),
            password: "hunter2".into(),
            server_host: server.host(),
            server_ip: server.host(),
            server_port: server.port(),
            server_secure: false,
            server_username: "root".into(),
            server_password: "whm-token".into(),
            client: ClientDetails::from(&client),
            config_options: HashMap::from([("package".to_string(), "gold".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_create_account_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/json-api/createacct")
                .body_contains("username=example1")
                .body_contains("plan=gold");
            then.status(200)
                .json_body(serde_json::json!({"metadata": {"result": 1, "reason": "OK"}}));
        });

        let module = CpanelModule::new();
        let result = module.create_account(&bag_for(&server)).await.unwrap();

        mock.assert();
        assert!(result.success);
        assert_eq!(result.username.as_deref(), Some("example1"));
        assert_eq!(result.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_create_account_provider_rejection() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/json-api/createacct");
            then.status(200).json_body(serde_json::json!({
                "metadata": {"result": 0, "reason": "Domain already exists"}
            }));
        });

        let module = CpanelModule::new();
        let result = module.create_account(&bag_for(&server)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("Domain already exists"));
        assert!(result.password.is_none());
    }

    #[tokio::test]
    async fn test_suspend_account_passes_reason() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/json-api/suspendacct")
                .body_contains("user=example1")
                .body_contains("reason=");
            then.status(200)
                .json_body(serde_json::json!({"metadata": {"result": 1}}));
        });

        let module = CpanelModule::new();
        let result = module.suspend_account(&bag_for(&server)).await.unwrap();
        mock.assert();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let server = MockServer::start();
        let mut bag = bag_for(&server);
        // Point at a port nothing listens on.
        bag.server_port = 1;

        let module = CpanelModule::new();
        assert!(module.terminate_account(&bag).await.is_err());
    }
}
