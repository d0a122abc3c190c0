//! Capacity admission control. Each server advertises a maximum account
//! count; a provisioning attempt must reserve a slot before any provider
//! call is made, and the reservation is either committed (account created)
//! or released (attempt failed). Counter updates happen under the server's
//! map entry write guard, so two racing attempts can never both squeeze
//! into the last slot.

use std::sync::Arc;

use dashmap::DashMap;
use hostforge_core::types::Server;
use hostforge_core::{ProvisionError, ProvisionResult};
use tracing::debug;
use uuid::Uuid;

/// A slot held for one in-flight provisioning attempt. The holder must call
/// [`CapacityController::commit`] or [`CapacityController::release`] with it
/// exactly once.
#[derive(Debug)]
pub struct Reservation {
    pub server_id: Uuid,
}

/// Admission controller over the shared server table.
#[derive(Clone)]
pub struct CapacityController {
    servers: Arc<DashMap<Uuid, Server>>,
}

impl CapacityController {
    pub fn new(servers: Arc<DashMap<Uuid, Server>>) -> Self {
        Self { servers }
    }

    /// Whether the server could currently admit one more account.
    /// `max_accounts == 0` means unlimited.
    pub fn has_capacity(&self, server_id: Uuid) -> ProvisionResult<bool> {
        let server = self
            .servers
            .get(&server_id)
            .ok_or(ProvisionError::ServerNotFound(server_id))?;
        Ok(admits(&server))
    }

    /// Reserve one slot. Fails with `CapacityExceeded` when active plus
    /// already-reserved accounts fill the server.
    pub fn reserve(&self, server_id: Uuid) -> ProvisionResult<Reservation> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ProvisionError::ServerNotFound(server_id))?;

        if !admits(&server) {
            return Err(ProvisionError::CapacityExceeded {
                server: server.id,
                accounts: server.active_accounts + server.reserved_accounts,
                capacity: server.max_accounts,
            });
        }

        server.reserved_accounts += 1;
        debug!(
            server = %server.name,
            reserved = server.reserved_accounts,
            active = server.active_accounts,
            "Reserved provisioning slot"
        );
        Ok(Reservation { server_id })
    }

    /// Convert a reservation into an active account.
    pub fn commit(&self, reservation: Reservation) -> ProvisionResult<()> {
        let mut server = self
            .servers
            .get_mut(&reservation.server_id)
            .ok_or(ProvisionError::ServerNotFound(reservation.server_id))?;
        server.reserved_accounts = server.reserved_accounts.saturating_sub(1);
        server.active_accounts += 1;
        Ok(())
    }

    /// Give back an unused reservation after a failed attempt.
    pub fn release(&self, reservation: Reservation) -> ProvisionResult<()> {
        let mut server = self
            .servers
            .get_mut(&reservation.server_id)
            .ok_or(ProvisionError::ServerNotFound(reservation.server_id))?;
        server.reserved_accounts = server.reserved_accounts.saturating_sub(1);
        Ok(())
    }

    /// Free an active slot after a termination.
    pub fn release_slot(&self, server_id: Uuid) -> ProvisionResult<()> {
        let mut server = self
            .servers
            .get_mut(&server_id)
            .ok_or(ProvisionError::ServerNotFound(server_id))?;
        server.active_accounts = server.active_accounts.saturating_sub(1);
        Ok(())
    }
}

fn admits(server: &Server) -> bool {
    server.max_accounts == 0
        || server.active_accounts + server.reserved_accounts < server.max_accounts
}
