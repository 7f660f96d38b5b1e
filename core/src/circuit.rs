//! Circuit lifecycle state machine
//!
//! Each circuit runs its own dynamic state machine:
//!
//! ```text
//!   Active ──disconnect──▶ Disconnected ──expire──▶ Terminated
//!     ▲                        │
//!     └───────reconnect────────┘
//!   Active | Disconnected ──evict | close──▶ Terminated
//! ```
//!
//! [`CircuitEntry`] wraps the machine together with the resources the
//! circuit owns (session payload, transport handle, admission permit). An
//! entry is only ever touched under its per-circuit lock, which is what
//! makes it the single authority for the circuit's state.

use crate::{
    CircuitId,
    admission::AdmissionPermit,
    errors::{CircuitError, RejectReason},
    timer::TimerHandle,
};
use serde::{Deserialize, Serialize};
use state_machines::state_machine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a disconnected circuit is retained for reconnection
    pub grace_period_secs: f64,

    /// Maximum number of live circuits (Active or Disconnected)
    /// If None, admission is unlimited
    pub max_circuits: Option<usize>,

    /// Maximum number of circuits waiting out a grace period at once
    /// The circuit closest to expiry is evicted when a new disconnect exceeds it
    pub max_disconnected: Option<usize>,

    /// Extra expiry delay factor (0.0 = none, 1.0 = up to one more grace period)
    /// Spreads expiry of circuits that dropped together; never fires early
    pub expiry_jitter: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grace_period_secs: 180.0,
            max_circuits: None,
            max_disconnected: Some(100),
            expiry_jitter: 0.0,
        }
    }
}

/// Longest accepted grace period (one year)
pub const MAX_GRACE_PERIOD_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

impl Config {
    /// Grace period as a [`Duration`]
    pub fn grace_period(&self) -> Result<Duration, CircuitError> {
        if !(0.0..=MAX_GRACE_PERIOD_SECS).contains(&self.grace_period_secs) {
            return Err(CircuitError::InvalidConfig(format!(
                "grace_period_secs must be within 0..={MAX_GRACE_PERIOD_SECS} (got {})",
                self.grace_period_secs
            )));
        }

        Duration::try_from_secs_f64(self.grace_period_secs).map_err(|_| {
            CircuitError::InvalidConfig(format!(
                "grace_period_secs must be a finite, non-negative number (got {})",
                self.grace_period_secs
            ))
        })
    }

    pub fn validate(&self) -> Result<(), CircuitError> {
        self.grace_period()?;

        if self.max_circuits == Some(0) {
            return Err(CircuitError::InvalidConfig(
                "max_circuits must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.expiry_jitter) {
            return Err(CircuitError::InvalidConfig(format!(
                "expiry_jitter must be within 0.0..=1.0 (got {})",
                self.expiry_jitter
            )));
        }

        Ok(())
    }
}

/// Why a circuit reached `Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The client shut down in an orderly way and will not return
    GracefulClient,
    /// Disconnected and not reconnected before the grace period ran out
    GracePeriodExpired,
    /// The server evicted the circuit
    ExplicitEviction,
}

impl TerminationReason {
    fn event(self) -> CircuitEvent {
        match self {
            TerminationReason::GracefulClient => CircuitEvent::Close,
            TerminationReason::GracePeriodExpired => CircuitEvent::Expire,
            TerminationReason::ExplicitEviction => CircuitEvent::Evict,
        }
    }

    fn event_name(self) -> &'static str {
        match self {
            TerminationReason::GracefulClient => "close",
            TerminationReason::GracePeriodExpired => "expire",
            TerminationReason::ExplicitEviction => "evict",
        }
    }
}

/// Shared data across all states
#[derive(Debug, Clone, Default)]
pub struct CircuitContext {
    pub circuit_id: CircuitId,
}

/// Data specific to the Disconnected state
#[derive(Debug, Clone, Default)]
pub struct DisconnectedData {
    pub deadline: Option<Instant>,
    pub timer: Option<TimerHandle>,
}

/// Data specific to the Terminated state
#[derive(Debug, Clone, Default)]
pub struct TerminatedData {
    pub reason: Option<TerminationReason>,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Active,
    states: [
        Active,
        Disconnected(DisconnectedData),
        Terminated(TerminatedData),
    ],
    events {
        disconnect {
            transition: { from: Active, to: Disconnected }
        }
        reconnect {
            transition: { from: Disconnected, to: Active }
        }
        expire {
            transition: { from: Disconnected, to: Terminated }
        }
        evict {
            transition: { from: [Active, Disconnected], to: Terminated }
        }
        close {
            transition: { from: [Active, Disconnected], to: Terminated }
        }
    }
}

/// Point-in-time view of a circuit's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Active,
    Disconnected { deadline: Instant },
    Terminated { reason: TerminationReason },
}

impl CircuitStatus {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitStatus::Active => "Active",
            CircuitStatus::Disconnected { .. } => "Disconnected",
            CircuitStatus::Terminated { .. } => "Terminated",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CircuitStatus::Active)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, CircuitStatus::Disconnected { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, CircuitStatus::Terminated { .. })
    }
}

/// Session and grace timer handed back by a successful reconnect
pub type Resumed<S> = (Arc<S>, Option<TimerHandle>);

/// A circuit and the resources it owns
pub struct CircuitEntry<S, T> {
    id: CircuitId,
    machine: DynamicCircuit,
    session: Option<Arc<S>>,
    transport: Option<T>,
    permit: Option<AdmissionPermit>,
    /// Set when termination had to bypass the state machine
    forced: Option<TerminationReason>,
}

impl<S, T> CircuitEntry<S, T> {
    pub fn new(
        id: CircuitId,
        session: Arc<S>,
        transport: T,
        permit: Option<AdmissionPermit>,
    ) -> Self {
        let context = CircuitContext { circuit_id: id };

        Self {
            id,
            machine: DynamicCircuit::new(context),
            session: Some(session),
            transport: Some(transport),
            permit,
            forced: None,
        }
    }

    pub fn id(&self) -> CircuitId {
        self.id
    }

    pub fn state_name(&self) -> &'static str {
        if self.forced.is_some() {
            return "Terminated";
        }
        self.machine.current_state()
    }

    pub fn status(&self) -> CircuitStatus {
        if let Some(reason) = self.forced {
            return CircuitStatus::Terminated { reason };
        }

        match self.machine.current_state() {
            "Disconnected" => {
                let deadline = self
                    .machine
                    .disconnected_data()
                    .and_then(|d| d.deadline)
                    .unwrap_or_else(Instant::now);
                CircuitStatus::Disconnected { deadline }
            }
            "Terminated" => {
                let reason = self
                    .machine
                    .terminated_data()
                    .and_then(|d| d.reason)
                    .unwrap_or(TerminationReason::ExplicitEviction);
                CircuitStatus::Terminated { reason }
            }
            _ => CircuitStatus::Active,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state_name() == "Terminated"
    }

    /// Session payload; `None` once the circuit has terminated
    pub fn session(&self) -> Option<&Arc<S>> {
        self.session.as_ref()
    }

    /// Transport currently bound to the circuit; `None` while disconnected
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn timer(&self) -> Option<&TimerHandle> {
        self.machine.disconnected_data().and_then(|d| d.timer.as_ref())
    }

    /// Active → Disconnected, recording the armed grace timer
    ///
    /// Drops the transport; the session stays put for a possible resume.
    pub fn disconnect(&mut self, timer: TimerHandle) -> Result<(), CircuitError> {
        if self.forced.is_some() || self.machine.handle(CircuitEvent::Disconnect).is_err() {
            return Err(self.invalid("disconnect"));
        }

        if let Some(data) = self.machine.disconnected_data_mut() {
            data.deadline = Some(timer.deadline);
            data.timer = Some(timer);
        }
        self.transport = None;
        Ok(())
    }

    /// Disconnected → Active with a fresh transport
    ///
    /// Returns the session and the timer that must now be canceled. On
    /// rejection the transport is handed back so the caller can reuse it.
    pub fn reconnect(&mut self, transport: T) -> Result<Resumed<S>, (RejectReason, T)> {
        match self.status() {
            CircuitStatus::Active => return Err((RejectReason::AlreadyActive, transport)),
            CircuitStatus::Terminated { .. } => {
                return Err((RejectReason::AlreadyTerminated, transport));
            }
            CircuitStatus::Disconnected { .. } => {}
        }

        let Some(session) = self.session.clone() else {
            return Err((RejectReason::AlreadyTerminated, transport));
        };
        let timer = self
            .machine
            .disconnected_data()
            .and_then(|d| d.timer.clone());

        if self.machine.handle(CircuitEvent::Reconnect).is_err() {
            return Err((RejectReason::AlreadyTerminated, transport));
        }

        self.transport = Some(transport);
        Ok((session, timer))
    }

    /// Move to Terminated and release everything the circuit owns
    ///
    /// Returns the grace timer that was running, if any, so the caller can
    /// cancel it.
    pub fn terminate(
        &mut self,
        reason: TerminationReason,
    ) -> Result<Option<TimerHandle>, CircuitError> {
        if self.is_terminated() {
            return Err(self.invalid(reason.event_name()));
        }

        let timer = self
            .machine
            .disconnected_data_mut()
            .and_then(|d| d.timer.take());

        if self.machine.handle(reason.event()).is_err() {
            return Err(self.invalid(reason.event_name()));
        }

        if let Some(data) = self.machine.terminated_data_mut() {
            data.reason = Some(reason);
        }
        self.release();
        Ok(timer)
    }

    /// Terminate without consulting the state machine
    ///
    /// Only for paths where the machine rejected a transition our own
    /// bookkeeping considered valid.
    pub fn force_terminate(&mut self, reason: TerminationReason) -> Option<TimerHandle> {
        let timer = self
            .machine
            .disconnected_data_mut()
            .and_then(|d| d.timer.take());
        self.forced = Some(reason);
        self.release();
        timer
    }

    fn release(&mut self) {
        self.session = None;
        self.transport = None;
        self.permit = None;
    }

    fn invalid(&self, event: &'static str) -> CircuitError {
        CircuitError::InvalidStateTransition {
            circuit: self.id,
            state: self.state_name(),
            event,
        }
    }
}

impl<S, T> std::fmt::Debug for CircuitEntry<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitEntry")
            .field("id", &self.id)
            .field("state", &self.state_name())
            .field("has_session", &self.session.is_some())
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}
