//! Event bridge: translates billing and admin domain events into
//! provisioning work. An invoice settlement fans out to every pending
//! service billed on that invoice; admin requests map one-to-one onto
//! lifecycle operations. Redelivered events are safe because every engine
//! operation is idempotent against its target state.

use std::sync::Arc;

use hostforge_core::config::ProvisioningConfig;
use hostforge_core::types::LifecycleAction;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::ProvisioningEngine;

/// Events the provisioning side consumes from the rest of the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An invoice was paid in full.
    InvoiceSettled { invoice_id: Uuid },
    /// An operator requested a lifecycle change on one service.
    AdminLifecycleRequested {
        service_id: Uuid,
        action: LifecycleAction,
    },
}

/// Consumes domain events and drives the engine.
#[derive(Clone)]
pub struct EventBridge {
    engine: Arc<ProvisioningEngine>,
    config: ProvisioningConfig,
}

impl EventBridge {
    pub fn new(engine: Arc<ProvisioningEngine>, config: ProvisioningConfig) -> Self {
        Self { engine, config }
    }

    /// Handle one event to completion. Per-service failures are logged and
    /// recorded on the service; they never abort the remaining fan-out.
    pub async fn handle(&self, event: DomainEvent) {
        match event {
            DomainEvent::InvoiceSettled { invoice_id } => {
                self.on_invoice_settled(invoice_id).await;
            }
            DomainEvent::AdminLifecycleRequested { service_id, action } => {
                self.on_admin_request(service_id, action).await;
            }
        }
    }

    async fn on_invoice_settled(&self, invoice_id: Uuid) {
        let pending = self.engine.pending_services_for_invoice(invoice_id);
        if pending.is_empty() {
            return;
        }
        if !self.config.auto_provision {
            info!(
                invoice = %invoice_id,
                services = pending.len(),
                "Auto-provisioning disabled; leaving services pending"
            );
            return;
        }

        info!(invoice = %invoice_id, services = pending.len(), "Invoice settled");
        let tasks: Vec<_> = pending
            .into_iter()
            .map(|service_id| {
                let engine = Arc::clone(&self.engine);
                tokio::spawn(async move {
                    if let Err(err) = engine.provision(service_id).await {
                        warn!(service = %service_id, error = %err, "Provisioning from invoice failed");
                    }
                })
            })
            .collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Provisioning task panicked");
            }
        }
    }

    async fn on_admin_request(&self, service_id: Uuid, action: LifecycleAction) {
        let outcome = match action {
            LifecycleAction::Suspend => self.engine.suspend(service_id).await,
            LifecycleAction::Unsuspend => self.engine.unsuspend(service_id).await,
            LifecycleAction::Terminate => self.engine.terminate(service_id).await,
        };
        if let Err(err) = outcome {
            warn!(service = %service_id, ?action, error = %err, "Admin lifecycle request failed");
        }
    }
}
