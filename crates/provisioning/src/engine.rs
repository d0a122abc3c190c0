//! Provisioning orchestrator: the single entry point for creating,
//! suspending, reinstating, and tearing down services on backend providers.
//!
//! Every lifecycle operation follows the same shape: load the service and
//! its collaborators, check the transition against the state machine, make
//! exactly one provider module call under a timeout, then persist the
//! outcome and notify. Provider calls happen with no map guard held.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use hostforge_core::config::ProvisioningConfig;
use hostforge_core::notify::{noop_sink, Notification, NotificationKind, NotificationSink};
use hostforge_core::types::{
    Client, ModuleResult, Product, Server, Service, ServiceStatus,
};
use hostforge_core::{ProvisionError, ProvisionResult};
use hostforge_modules::ModuleRegistry;
use hostforge_vault::CredentialVault;
use metrics::counter;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capacity::CapacityController;
use crate::marshaller;
use crate::state_machine::ServiceStateMachine;

/// Orchestrates the full service lifecycle over in-memory client, product,
/// server, and service tables. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProvisioningEngine {
    clients: Arc<DashMap<Uuid, Client>>,
    products: Arc<DashMap<Uuid, Product>>,
    servers: Arc<DashMap<Uuid, Server>>,
    services: Arc<DashMap<Uuid, Service>>,
    registry: Arc<ModuleRegistry>,
    vault: Arc<CredentialVault>,
    state_machine: ServiceStateMachine,
    capacity: CapacityController,
    /// Services with a provisioning attempt currently in flight.
    in_flight: Arc<DashMap<Uuid, ()>>,
    notifier: Arc<dyn NotificationSink>,
    config: ProvisioningConfig,
}

impl std::fmt::Debug for ProvisioningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningEngine")
            .field("clients", &self.clients.len())
            .field("products", &self.products.len())
            .field("servers", &self.servers.len())
            .field("services", &self.services.len())
            .finish()
    }
}

impl ProvisioningEngine {
    pub fn new(registry: Arc<ModuleRegistry>, vault: Arc<CredentialVault>) -> Self {
        let servers: Arc<DashMap<Uuid, Server>> = Arc::new(DashMap::new());
        Self {
            clients: Arc::new(DashMap::new()),
            products: Arc::new(DashMap::new()),
            capacity: CapacityController::new(Arc::clone(&servers)),
            servers,
            services: Arc::new(DashMap::new()),
            registry,
            vault,
            state_machine: ServiceStateMachine::new(),
            in_flight: Arc::new(DashMap::new()),
            notifier: noop_sink(),
            config: ProvisioningConfig::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_config(mut self, config: ProvisioningConfig) -> Self {
        self.config = config;
        self
    }

    // ─── Intake ───

    pub fn add_client(&self, client: Client) -> Uuid {
        let id = client.id;
        self.clients.insert(id, client);
        id
    }

    pub fn add_product(&self, product: Product) -> Uuid {
        let id = product.id;
        self.products.insert(id, product);
        id
    }

    pub fn add_server(&self, server: Server) -> Uuid {
        let id = server.id;
        self.servers.insert(id, server);
        id
    }

    /// Register a newly sold service in `Pending`. Provisioning happens
    /// later, when the service's invoice settles or an operator asks for it.
    pub fn create_service(
        &self,
        client_id: Uuid,
        product_id: Uuid,
        server_id: Option<Uuid>,
        invoice_id: Option<Uuid>,
        domain: impl Into<String>,
    ) -> ProvisionResult<Uuid> {
        if !self.clients.contains_key(&client_id) {
            return Err(ProvisionError::ClientNotFound(client_id));
        }
        if !self.products.contains_key(&product_id) {
            return Err(ProvisionError::MissingProduct);
        }
        if let Some(server_id) = server_id {
            if !self.servers.contains_key(&server_id) {
                return Err(ProvisionError::ServerNotFound(server_id));
            }
        }

        let now = Utc::now();
        let service = Service {
            id: Uuid::new_v4(),
            client_id,
            product_id,
            server_id,
            invoice_id,
            domain: domain.into(),
            username: String::new(),
            password_enc: None,
            status: ServiceStatus::Pending,
            activated_at: None,
            notes: None,
            config_options: Default::default(),
            created_at: now,
            updated_at: now,
        };
        let id = service.id;
        self.services.insert(id, service);
        debug!(service = %id, "Service registered");
        Ok(id)
    }

    /// Set the service account credentials ahead of provisioning. The
    /// password is encrypted before it touches the service record.
    pub fn set_credentials(
        &self,
        service_id: Uuid,
        username: impl Into<String>,
        password: &str,
    ) -> ProvisionResult<()> {
        let mut service = self
            .services
            .get_mut(&service_id)
            .ok_or(ProvisionError::ServiceNotFound(service_id))?;
        service.username = username.into();
        service.password_enc = Some(self.vault.encrypt(password));
        service.updated_at = Utc::now();
        Ok(())
    }

    pub fn service(&self, service_id: Uuid) -> ProvisionResult<Service> {
        self.services
            .get(&service_id)
            .map(|s| s.clone())
            .ok_or(ProvisionError::ServiceNotFound(service_id))
    }

    pub fn server(&self, server_id: Uuid) -> ProvisionResult<Server> {
        self.servers
            .get(&server_id)
            .map(|s| s.clone())
            .ok_or(ProvisionError::ServerNotFound(server_id))
    }

    /// Pending services billed against the given invoice.
    pub fn pending_services_for_invoice(&self, invoice_id: Uuid) -> Vec<Uuid> {
        self.services
            .iter()
            .filter(|s| s.invoice_id == Some(invoice_id) && s.status == ServiceStatus::Pending)
            .map(|s| s.id)
            .collect()
    }

    // ─── Lifecycle operations ───

    /// Create the account on the backing provider and activate the service.
    ///
    /// A non-pending service is left untouched, so redelivered billing
    /// events are harmless. A capacity slot is reserved before the provider
    /// call and committed only when the provider reports success.
    pub async fn provision(&self, service_id: Uuid) -> ProvisionResult<()> {
        // Atomically claim the service. A concurrent attempt on the same
        // service loses the claim and collapses to a no-op, so at most one
        // provider call is ever in flight per service.
        if self.in_flight.insert(service_id, ()).is_some() {
            debug!(service = %service_id, "Provisioning already in flight");
            return Ok(());
        }
        let outcome = self.provision_claimed(service_id).await;
        self.in_flight.remove(&service_id);
        outcome
    }

    async fn provision_claimed(&self, service_id: Uuid) -> ProvisionResult<()> {
        let service = self.service(service_id)?;
        if service.status != ServiceStatus::Pending {
            debug!(service = %service_id, status = %service.status, "Skipping provision of non-pending service");
            return Ok(());
        }

        let Some(server_id) = service.server_id else {
            let err = ProvisionError::MissingServer;
            self.mark_failed(service_id, &err.to_string());
            return Err(err);
        };
        let (product, server, client) = match self.context(&service) {
            Ok(ctx) => ctx,
            Err(err) => {
                self.mark_failed(service_id, &err.to_string());
                return Err(err);
            }
        };

        let reservation = match self.capacity.reserve(server_id) {
            Ok(reservation) => reservation,
            Err(err) => {
                counter!("provisioning_capacity_rejections_total").increment(1);
                self.mark_failed(service_id, &err.to_string());
                return Err(err);
            }
        };

        let prepared = self
            .registry
            .resolve(&product.module_name)
            .and_then(|module| {
                marshaller::build(&service, &product, &server, &client, &self.vault)
                    .map(|bag| (module, bag))
            });
        let (module, bag) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.release_quietly(reservation);
                self.mark_failed(service_id, &err.to_string());
                return Err(err);
            }
        };

        counter!("provisioning_attempts_total", "module" => product.module_name.clone())
            .increment(1);
        info!(service = %service_id, module = %product.module_name, "Provisioning service");

        match self.call_module(module.create_account(&bag)).await {
            Ok(result) if result.success => {
                self.capacity.commit(reservation)?;
                self.activate(service_id, &result)?;
                counter!("provisioning_success_total", "module" => product.module_name.clone())
                    .increment(1);
                self.notifier
                    .emit(Notification::new(NotificationKind::ServiceActivated, service_id));
                Ok(())
            }
            Ok(result) => {
                let reason = result
                    .message
                    .unwrap_or_else(|| "provider reported failure".to_string());
                self.release_quietly(reservation);
                self.mark_failed(service_id, &reason);
                Err(ProvisionError::Provider(reason))
            }
            Err(err) => {
                self.release_quietly(reservation);
                self.mark_failed(service_id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Suspend an active service. The provider call comes first; the service
    /// only moves to `Suspended` once the provider confirms, so a failed
    /// call leaves the account serving and the record accurate.
    pub async fn suspend(&self, service_id: Uuid) -> ProvisionResult<()> {
        let service = self.service(service_id)?;
        if service.status == ServiceStatus::Suspended {
            return Ok(());
        }
        self.state_machine
            .ensure(service.status, ServiceStatus::Suspended)?;

        let (module, mut bag) = self.prepare_call(&service)?;
        bag.config_options
            .insert("suspendreason".to_string(), self.config.suspend_reason.clone());

        match self.call_module(module.suspend_account(&bag)).await {
            Ok(result) if result.success => {
                self.transition(service_id, ServiceStatus::Suspended)?;
                counter!("lifecycle_actions_total", "action" => "suspend").increment(1);
                self.notifier
                    .emit(Notification::new(NotificationKind::ServiceSuspended, service_id));
                Ok(())
            }
            Ok(result) => Err(self.record_provider_failure(service_id, result)),
            Err(err) => {
                self.note_failure(service_id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Reinstate a suspended service.
    pub async fn unsuspend(&self, service_id: Uuid) -> ProvisionResult<()> {
        let service = self.service(service_id)?;
        match service.status {
            ServiceStatus::Active => return Ok(()),
            ServiceStatus::Suspended => {}
            from => {
                return Err(ProvisionError::InvalidTransition {
                    from,
                    to: ServiceStatus::Active,
                })
            }
        }

        let (module, bag) = self.prepare_call(&service)?;
        match self.call_module(module.unsuspend_account(&bag)).await {
            Ok(result) if result.success => {
                self.transition(service_id, ServiceStatus::Active)?;
                counter!("lifecycle_actions_total", "action" => "unsuspend").increment(1);
                self.notifier
                    .emit(Notification::new(NotificationKind::ServiceReactivated, service_id));
                Ok(())
            }
            Ok(result) => Err(self.record_provider_failure(service_id, result)),
            Err(err) => {
                self.note_failure(service_id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Tear down the account on the provider and mark the service
    /// terminated. The server slot is freed and the assignment cleared.
    pub async fn terminate(&self, service_id: Uuid) -> ProvisionResult<()> {
        let service = self.service(service_id)?;
        if service.status == ServiceStatus::Terminated {
            return Ok(());
        }
        self.state_machine
            .ensure(service.status, ServiceStatus::Terminated)?;

        let (module, bag) = self.prepare_call(&service)?;
        match self.call_module(module.terminate_account(&bag)).await {
            Ok(result) if result.success => {
                if let Some(server_id) = service.server_id {
                    self.capacity.release_slot(server_id)?;
                }
                {
                    let mut record = self
                        .services
                        .get_mut(&service_id)
                        .ok_or(ProvisionError::ServiceNotFound(service_id))?;
                    record.status = ServiceStatus::Terminated;
                    record.server_id = None;
                    record.updated_at = Utc::now();
                }
                counter!("lifecycle_actions_total", "action" => "terminate").increment(1);
                info!(service = %service_id, "Service terminated");
                self.notifier
                    .emit(Notification::new(NotificationKind::ServiceTerminated, service_id));
                Ok(())
            }
            Ok(result) => Err(self.record_provider_failure(service_id, result)),
            Err(err) => {
                self.note_failure(service_id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Administrative cancellation. Purely a bookkeeping move: no provider
    /// call is made, but an occupied slot is handed back.
    pub fn cancel(&self, service_id: Uuid) -> ProvisionResult<()> {
        let service = self.service(service_id)?;
        if service.status == ServiceStatus::Cancelled {
            return Ok(());
        }
        self.state_machine
            .ensure(service.status, ServiceStatus::Cancelled)?;

        if matches!(service.status, ServiceStatus::Active | ServiceStatus::Suspended) {
            if let Some(server_id) = service.server_id {
                self.capacity.release_slot(server_id)?;
            }
        }
        self.transition(service_id, ServiceStatus::Cancelled)?;
        info!(service = %service_id, "Service cancelled");
        Ok(())
    }

    /// Rotate the service account password on the provider. The stored
    /// credential is only replaced once the provider confirms.
    pub async fn change_password(
        &self,
        service_id: Uuid,
        new_password: &str,
    ) -> ProvisionResult<()> {
        let service = self.service(service_id)?;
        if service.status != ServiceStatus::Active {
            return Err(ProvisionError::ServiceNotActive(service.status));
        }

        let (module, mut bag) = self.prepare_call(&service)?;
        bag.password = new_password.to_string();

        match self.call_module(module.change_password(&bag)).await {
            Ok(result) if result.success => {
                let mut record = self
                    .services
                    .get_mut(&service_id)
                    .ok_or(ProvisionError::ServiceNotFound(service_id))?;
                record.password_enc = Some(self.vault.encrypt(new_password));
                record.updated_at = Utc::now();
                Ok(())
            }
            Ok(result) => Err(self.record_provider_failure(service_id, result)),
            Err(err) => {
                self.note_failure(service_id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Operator reset after a failed provisioning attempt, returning the
    /// service to the queue for another try.
    pub fn reset_to_pending(&self, service_id: Uuid) -> ProvisionResult<()> {
        let service = self.service(service_id)?;
        self.state_machine
            .ensure(service.status, ServiceStatus::Pending)?;
        self.transition(service_id, ServiceStatus::Pending)?;
        Ok(())
    }

    // ─── Internals ───

    fn context(&self, service: &Service) -> ProvisionResult<(Product, Server, Client)> {
        let product = self
            .products
            .get(&service.product_id)
            .map(|p| p.clone())
            .ok_or(ProvisionError::MissingProduct)?;
        let server_id = service.server_id.ok_or(ProvisionError::MissingServer)?;
        let server = self.server(server_id)?;
        let client = self
            .clients
            .get(&service.client_id)
            .map(|c| c.clone())
            .ok_or(ProvisionError::ClientNotFound(service.client_id))?;
        Ok((product, server, client))
    }

    fn prepare_call(
        &self,
        service: &Service,
    ) -> ProvisionResult<(
        Arc<dyn hostforge_modules::ProvisioningModule>,
        hostforge_core::types::ParameterBag,
    )> {
        let (product, server, client) = self.context(service)?;
        let module = self.registry.resolve(&product.module_name)?;
        let bag = marshaller::build(service, &product, &server, &client, &self.vault)?;
        Ok((module, bag))
    }

    async fn call_module<F>(&self, call: F) -> ProvisionResult<ModuleResult>
    where
        F: Future<Output = anyhow::Result<ModuleResult>>,
    {
        let limit = Duration::from_secs(self.config.call_timeout_secs);
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(ProvisionError::Provider(err.to_string())),
            Err(_) => Err(ProvisionError::Timeout(self.config.call_timeout_secs)),
        }
    }

    fn activate(&self, service_id: Uuid, result: &ModuleResult) -> ProvisionResult<()> {
        let mut record = self
            .services
            .get_mut(&service_id)
            .ok_or(ProvisionError::ServiceNotFound(service_id))?;
        if let Some(username) = &result.username {
            record.username = username.clone();
        }
        if let Some(password) = &result.password {
            record.password_enc = Some(self.vault.encrypt(password));
        }
        record.status = ServiceStatus::Active;
        record.activated_at = Some(Utc::now());
        record.updated_at = Utc::now();
        info!(service = %service_id, username = %record.username, "Service activated");
        Ok(())
    }

    fn transition(&self, service_id: Uuid, to: ServiceStatus) -> ProvisionResult<()> {
        let mut record = self
            .services
            .get_mut(&service_id)
            .ok_or(ProvisionError::ServiceNotFound(service_id))?;
        record.status = to;
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Move the service to `Failed` (where legal), record the reason, and
    /// raise a failure notification.
    fn mark_failed(&self, service_id: Uuid, reason: &str) {
        if let Some(mut record) = self.services.get_mut(&service_id) {
            if self
                .state_machine
                .can_transition(record.status, ServiceStatus::Failed)
            {
                record.status = ServiceStatus::Failed;
            }
            append_note(&mut record, reason);
            record.updated_at = Utc::now();
        }
        counter!("provisioning_failures_total").increment(1);
        warn!(service = %service_id, reason, "Provisioning failed");
        self.notifier.emit(
            Notification::new(NotificationKind::ProvisioningFailed, service_id).with_note(reason),
        );
    }

    /// Record a provider failure without moving the service's state.
    fn note_failure(&self, service_id: Uuid, reason: &str) {
        if let Some(mut record) = self.services.get_mut(&service_id) {
            append_note(&mut record, reason);
            record.updated_at = Utc::now();
        }
        warn!(service = %service_id, reason, "Provider call failed");
        self.notifier.emit(
            Notification::new(NotificationKind::ProvisioningFailed, service_id).with_note(reason),
        );
    }

    fn record_provider_failure(&self, service_id: Uuid, result: ModuleResult) -> ProvisionError {
        let reason = result
            .message
            .unwrap_or_else(|| "provider reported failure".to_string());
        self.note_failure(service_id, &reason);
        ProvisionError::Provider(reason)
    }

    fn release_quietly(&self, reservation: crate::capacity::Reservation) {
        if let Err(err) = self.capacity.release(reservation) {
            warn!(error = %err, "Failed to release capacity reservation");
        }
    }
}

fn append_note(service: &mut Service, note: &str) {
    match &mut service.notes {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(note);
        }
        None => service.notes = Some(note.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hostforge_core::notify::capture_sink;
    use hostforge_core::types::ParameterBag;
    use hostforge_vault::VaultKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum StubOutcome {
        Succeed,
        SucceedSlowly,
        SucceedWithCredentials,
        Fail(&'static str),
        Hang,
    }

    struct StubModule {
        outcome: StubOutcome,
        calls: AtomicUsize,
        seen_options: Mutex<Vec<(String, String)>>,
    }

    impl StubModule {
        fn new(outcome: StubOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
                seen_options: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn respond(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_options.lock().unwrap().extend(
                params
                    .config_options
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            match self.outcome {
                StubOutcome::Succeed => Ok(ModuleResult::ok()),
                StubOutcome::SucceedSlowly => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(ModuleResult::ok())
                }
                StubOutcome::SucceedWithCredentials => {
                    Ok(ModuleResult::with_credentials("generated1", "g3nerated-pw"))
                }
                StubOutcome::Fail(reason) => Ok(ModuleResult::failure(reason)),
                StubOutcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ModuleResult::ok())
                }
            }
        }
    }

    #[async_trait]
    impl hostforge_modules::ProvisioningModule for StubModule {
        fn name(&self) -> &str {
            "stub"
        }

        async fn create_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
            self.respond(params).await
        }

        async fn suspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
            self.respond(params).await
        }

        async fn unsuspend_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
            self.respond(params).await
        }

        async fn terminate_account(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
            self.respond(params).await
        }

        async fn change_password(&self, params: &ParameterBag) -> anyhow::Result<ModuleResult> {
            self.respond(params).await
        }
    }

    struct Rig {
        engine: ProvisioningEngine,
        sink: Arc<hostforge_core::notify::CaptureSink>,
        stub: Arc<StubModule>,
        service_id: Uuid,
        server_id: Uuid,
    }

    fn rig(outcome: StubOutcome) -> Rig {
        rig_with(outcome, 10)
    }

    fn rig_with(outcome: StubOutcome, max_accounts: u32) -> Rig {
        let stub = StubModule::new(outcome);
        let registry = Arc::new(ModuleRegistry::new());
        registry.register_native(Arc::clone(&stub) as Arc<dyn hostforge_modules::ProvisioningModule>);

        let vault = Arc::new(CredentialVault::new(VaultKey::generate()));
        let sink = capture_sink();
        let engine = ProvisioningEngine::new(registry, vault)
            .with_notifier(Arc::clone(&sink) as Arc<dyn NotificationSink>);

        let client_id = engine.add_client(Client::new("Ada", "Lovelace", "ada@example.com"));
        let product_id = engine.add_product(Product::new("Gold Hosting", "stub"));
        let mut server = Server::new("stub01", "stub01.example.net", "stub");
        server.max_accounts = max_accounts;
        server.active_accounts = 3;
        let server_id = engine.add_server(server);

        let service_id = engine
            .create_service(client_id, product_id, Some(server_id), None, "example.com")
            .unwrap();
        engine
            .set_credentials(service_id, "example1", "hunter2")
            .unwrap();

        Rig { engine, sink, stub, service_id, server_id }
    }

    #[tokio::test]
    async fn test_provision_activates_and_commits_capacity() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.provision(rig.service_id).await.unwrap();

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Active);
        assert!(service.activated_at.is_some());

        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.active_accounts, 4);
        assert_eq!(server.reserved_accounts, 0);

        assert_eq!(rig.sink.count_kind(NotificationKind::ServiceActivated), 1);
        assert_eq!(rig.stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_provision_adopts_provider_credentials() {
        let rig = rig(StubOutcome::SucceedWithCredentials);
        rig.engine.provision(rig.service_id).await.unwrap();

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_eq!(service.username, "generated1");
        // Stored encrypted, not in the clear.
        let stored = service.password_enc.unwrap();
        assert!(!stored.contains("g3nerated-pw"));
    }

    #[tokio::test]
    async fn test_capacity_full_fails_without_module_call() {
        let rig = rig_with(StubOutcome::Succeed, 3);
        let err = rig.engine.provision(rig.service_id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::CapacityExceeded { .. }));

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Failed);
        assert!(service.notes.unwrap().contains("capacity"));
        assert_eq!(rig.stub.calls(), 0);
        assert_eq!(rig.sink.count_kind(NotificationKind::ProvisioningFailed), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_releases_reservation() {
        let rig = rig(StubOutcome::Fail("disk is full"));
        let err = rig.engine.provision(rig.service_id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Provider(_)));

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Failed);
        assert!(service.notes.unwrap().contains("disk is full"));

        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.active_accounts, 3);
        assert_eq!(server.reserved_accounts, 0);
    }

    #[tokio::test]
    async fn test_missing_server_fails_service() {
        let rig = rig(StubOutcome::Succeed);
        let client_id = rig.engine.add_client(Client::new("Grace", "Hopper", "grace@example.com"));
        let product_id = rig.engine.add_product(Product::new("Plan", "stub"));
        let orphan = rig
            .engine
            .create_service(client_id, product_id, None, None, "orphan.example.com")
            .unwrap();

        let err = rig.engine.provision(orphan).await.unwrap_err();
        assert!(matches!(err, ProvisionError::MissingServer));
        assert_eq!(rig.engine.service(orphan).unwrap().status, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_module_fails_service() {
        let rig = rig(StubOutcome::Succeed);
        let client_id = rig.engine.add_client(Client::new("Grace", "Hopper", "grace@example.com"));
        let product_id = rig.engine.add_product(Product::new("Plan", "plesk9000"));
        let service_id = rig
            .engine
            .create_service(client_id, product_id, Some(rig.server_id), None, "x.example.com")
            .unwrap();

        let err = rig.engine.provision(service_id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ModuleNotFound(_)));

        // The reservation taken before resolution was handed back.
        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.reserved_accounts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_provisions_of_one_service_collapse() {
        let rig = rig(StubOutcome::SucceedSlowly);
        let engine_a = rig.engine.clone();
        let engine_b = rig.engine.clone();

        let (a, b) = tokio::join!(
            engine_a.provision(rig.service_id),
            engine_b.provision(rig.service_id)
        );
        a.unwrap();
        b.unwrap();

        // Exactly one provider call and one occupied slot.
        assert_eq!(rig.stub.calls(), 1);
        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.active_accounts, 4);
        assert_eq!(server.reserved_accounts, 0);
        assert_eq!(rig.sink.count_kind(NotificationKind::ServiceActivated), 1);
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_once_active() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.provision(rig.service_id).await.unwrap();
        rig.engine.provision(rig.service_id).await.unwrap();

        assert_eq!(rig.stub.calls(), 1);
        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.active_accounts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_times_out() {
        let rig = rig(StubOutcome::Hang);
        let err = rig.engine.provision(rig.service_id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout(30)));

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Failed);
        assert!(service.notes.unwrap().contains("timed out"));

        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.reserved_accounts, 0);
    }

    #[tokio::test]
    async fn test_suspend_and_unsuspend_round_trip() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.provision(rig.service_id).await.unwrap();

        rig.engine.suspend(rig.service_id).await.unwrap();
        assert_eq!(
            rig.engine.service(rig.service_id).unwrap().status,
            ServiceStatus::Suspended
        );
        assert_eq!(rig.sink.count_kind(NotificationKind::ServiceSuspended), 1);

        // The configured suspension reason rode along on the provider call.
        let options = rig.stub.seen_options.lock().unwrap().clone();
        assert!(options
            .iter()
            .any(|(k, v)| k == "suspendreason" && v == "Administrative action"));

        rig.engine.unsuspend(rig.service_id).await.unwrap();
        assert_eq!(
            rig.engine.service(rig.service_id).unwrap().status,
            ServiceStatus::Active
        );
        assert_eq!(rig.sink.count_kind(NotificationKind::ServiceReactivated), 1);
    }

    #[tokio::test]
    async fn test_suspend_failure_leaves_service_active() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.provision(rig.service_id).await.unwrap();

        // Swap the backing module for one that refuses.
        let failing = StubModule::new(StubOutcome::Fail("api unreachable"));
        rig.engine
            .registry
            .register_native(Arc::clone(&failing) as Arc<dyn hostforge_modules::ProvisioningModule>);

        let err = rig.engine.suspend(rig.service_id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Provider(_)));

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Active);
        assert!(service.notes.unwrap().contains("api unreachable"));
        assert_eq!(rig.sink.count_kind(NotificationKind::ProvisioningFailed), 1);
    }

    #[tokio::test]
    async fn test_terminate_frees_slot_and_clears_server() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.provision(rig.service_id).await.unwrap();

        rig.engine.terminate(rig.service_id).await.unwrap();

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Terminated);
        assert!(service.server_id.is_none());

        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.active_accounts, 3);
        assert_eq!(rig.sink.count_kind(NotificationKind::ServiceTerminated), 1);
    }

    #[tokio::test]
    async fn test_suspend_pending_service_is_rejected() {
        let rig = rig(StubOutcome::Succeed);
        let err = rig.engine.suspend(rig.service_id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidTransition { .. }));
        assert_eq!(rig.stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_never_calls_provider() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.cancel(rig.service_id).unwrap();

        assert_eq!(
            rig.engine.service(rig.service_id).unwrap().status,
            ServiceStatus::Cancelled
        );
        assert_eq!(rig.stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_active_returns_the_slot() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.provision(rig.service_id).await.unwrap();
        rig.engine.cancel(rig.service_id).unwrap();

        let server = rig.engine.server(rig.server_id).unwrap();
        assert_eq!(server.active_accounts, 3);
        assert_eq!(rig.stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_change_password_reencrypts_on_success() {
        let rig = rig(StubOutcome::Succeed);
        rig.engine.provision(rig.service_id).await.unwrap();

        let before = rig.engine.service(rig.service_id).unwrap().password_enc;
        rig.engine
            .change_password(rig.service_id, "n3w-secret")
            .await
            .unwrap();

        let service = rig.engine.service(rig.service_id).unwrap();
        assert_ne!(service.password_enc, before);
        assert!(!service.password_enc.unwrap().contains("n3w-secret"));
    }

    #[tokio::test]
    async fn test_change_password_requires_active_service() {
        let rig = rig(StubOutcome::Succeed);
        let err = rig
            .engine
            .change_password(rig.service_id, "n3w-secret")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ServiceNotActive(ServiceStatus::Pending)));
        assert_eq!(rig.stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_reset_to_pending_allows_retry() {
        let rig = rig(StubOutcome::Fail("transient outage"));
        let _ = rig.engine.provision(rig.service_id).await;
        assert_eq!(
            rig.engine.service(rig.service_id).unwrap().status,
            ServiceStatus::Failed
        );

        rig.engine.reset_to_pending(rig.service_id).unwrap();
        assert_eq!(
            rig.engine.service(rig.service_id).unwrap().status,
            ServiceStatus::Pending
        );

        // A second attempt goes back through the full path.
        let _ = rig.engine.provision(rig.service_id).await;
        assert_eq!(rig.stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_notes_never_contain_plaintext_password() {
        let rig = rig(StubOutcome::Fail("provider said no"));
        let _ = rig.engine.provision(rig.service_id).await;

        let service = rig.engine.service(rig.service_id).unwrap();
        let notes = service.notes.unwrap_or_default();
        assert!(!notes.contains("hunter2"));
        for n in rig.sink.notifications() {
            assert!(!n.note.unwrap_or_default().contains("hunter2"));
        }
    }
}
