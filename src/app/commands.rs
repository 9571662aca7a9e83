//! Inbound commands to the application core.
//!
//! [`CoreCommand`] is the typed entry point used by tests, the simulation
//! binary, and anything driving the core outside of the §6.1 wire frame
//! (which instead flows through [`crate::command_intake::CommandIntake`]
//! and is read directly from its [`ExternalCommandSlot`](crate::command_intake::ExternalCommandSlot)
//! each tick).

use crate::balancing::BalancingRequest;
use crate::pack::PackRequest;

/// Commands an external caller can issue directly against [`super::service::Core`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreCommand {
    /// Forward a mode request to the pack orchestrator.
    Pack(PackRequest),
    /// Forward a request to the balancing engine.
    Balancing(BalancingRequest),
    /// Clear every persistent diagnostics latch, task-health violation, and
    /// balancing illegal-request counter (§6.1 `clear_persistent_flags`).
    ClearPersistentFlags,
}
