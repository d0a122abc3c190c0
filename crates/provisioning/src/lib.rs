//! Provisioning orchestration: drives purchased services through creation,
//! suspension, and termination on heterogeneous backend providers: parameter
//! marshalling, capacity admission control, the service lifecycle state
//! machine, and the event bridge that ties billing events to infrastructure
//! side effects.

pub mod bridge;
pub mod capacity;
pub mod engine;
pub mod marshaller;
pub mod state_machine;

pub use bridge::{DomainEvent, EventBridge};
pub use capacity::{CapacityController, Reservation};
pub use engine::ProvisioningEngine;
pub use state_machine::ServiceStateMachine;
