use hostforge_core::types::ServiceStatus;
use hostforge_core::{ProvisionError, ProvisionResult};

/// Describes a single valid lifecycle transition for a service.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ServiceStatus,
    pub to: ServiceStatus,
    pub trigger: &'static str,
}

/// Guards the service lifecycle by enforcing a finite set of valid
/// transitions, decoupled from which provider executed the change.
#[derive(Debug, Clone)]
pub struct ServiceStateMachine {
    transitions: Vec<StateTransition>,
}

impl ServiceStateMachine {
    /// Creates the state machine with all valid transitions pre-configured.
    pub fn new() -> Self {
        use ServiceStatus::*;
        let transitions = vec![
            // Pending ->
            StateTransition { from: Pending, to: Active, trigger: "create_succeeded" },
            StateTransition { from: Pending, to: Failed, trigger: "provisioning_failed" },
            StateTransition { from: Pending, to: Cancelled, trigger: "admin_cancel" },
            // Active ->
            StateTransition { from: Active, to: Suspended, trigger: "suspend_succeeded" },
            StateTransition { from: Active, to: Terminated, trigger: "terminate_succeeded" },
            StateTransition { from: Active, to: Cancelled, trigger: "admin_cancel" },
            StateTransition { from: Active, to: Failed, trigger: "provisioning_failed" },
            // Suspended ->
            StateTransition { from: Suspended, to: Active, trigger: "unsuspend_succeeded" },
            StateTransition { from: Suspended, to: Terminated, trigger: "terminate_succeeded" },
            StateTransition { from: Suspended, to: Cancelled, trigger: "admin_cancel" },
            // Failed ->
            StateTransition { from: Failed, to: Pending, trigger: "operator_reset" },
            StateTransition { from: Failed, to: Cancelled, trigger: "admin_cancel" },
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: ServiceStatus, to: ServiceStatus) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }

    /// Fails with `InvalidTransition` if the transition is not permitted.
    pub fn ensure(&self, from: ServiceStatus, to: ServiceStatus) -> ProvisionResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(ProvisionError::InvalidTransition { from, to })
        }
    }

    /// All states reachable from `from` in one transition.
    pub fn reachable_from(&self, from: ServiceStatus) -> Vec<ServiceStatus> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.to)
            .collect()
    }
}

impl Default for ServiceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
