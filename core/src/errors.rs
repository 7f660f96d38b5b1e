//! Error types for circuit lifecycle operations

use crate::CircuitId;
use thiserror::Error;

/// Errors that can occur while driving a circuit through its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitError {
    /// No circuit is registered under this id
    #[error("Circuit '{0}' not found")]
    NotFound(CircuitId),

    /// The circuit's current state does not accept the event
    #[error("Circuit '{circuit}' cannot handle '{event}' while {state}")]
    InvalidStateTransition {
        circuit: CircuitId,
        state: &'static str,
        event: &'static str,
    },

    /// A grace timer is already running for the circuit
    #[error("Circuit '{0}' already has an armed grace timer")]
    TimerAlreadyArmed(CircuitId),

    /// Reconnection targeted a circuit that has already terminated
    #[error("Circuit '{0}' is already terminated")]
    AlreadyTerminated(CircuitId),

    /// Reconnection targeted a circuit that still has a live transport
    #[error("Circuit '{0}' is already active")]
    AlreadyActive(CircuitId),

    /// Admission control rejected a new circuit
    #[error("Circuit capacity reached (limit: {limit})")]
    CapacityReached { limit: usize },

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The manager was built outside of a Tokio runtime
    #[error("No Tokio runtime available to schedule grace timers")]
    NoRuntime,
}

/// Why a reconnection attempt was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("unknown circuit")]
    NotFound,
    #[error("circuit is not disconnected")]
    AlreadyActive,
    #[error("circuit already terminated")]
    AlreadyTerminated,
}

impl RejectReason {
    /// Attach the circuit id to produce a full [`CircuitError`]
    pub fn into_error(self, circuit: CircuitId) -> CircuitError {
        match self {
            RejectReason::NotFound => CircuitError::NotFound(circuit),
            RejectReason::AlreadyActive => CircuitError::AlreadyActive(circuit),
            RejectReason::AlreadyTerminated => CircuitError::AlreadyTerminated(circuit),
        }
    }
}
