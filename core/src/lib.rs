//! circuit-lifecycle - server-side lifecycle manager for long-lived client circuits
//!
//! This crate keeps stateful client sessions ("circuits") alive across an
//! unreliable transport:
//! - Thread-safe circuit registry with per-circuit locking
//! - State machine for the circuit lifecycle (Active → Disconnected → Terminated)
//! - Grace period timers so a reloading or briefly offline client can resume
//! - Synchronous lifecycle event fan-out for observability and tests
//! - Optional admission control and disconnected-circuit retention limits
//!
//! # Example
//!
//! ```rust
//! use circuit_lifecycle::CircuitManager;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = CircuitManager::<String>::builder()
//!     .grace_period(Duration::from_millis(50))
//!     .on_event(|event| println!("{} {}", event.circuit_id, event.kind))
//!     .build()
//!     .unwrap();
//!
//! // First handshake creates a circuit
//! let conn = manager.on_connected(None, (), || "session".to_string()).unwrap();
//!
//! // The page reloads: transport drops, then comes back with the old id
//! manager.on_disconnected(conn.circuit_id).unwrap();
//! let again = manager.on_connected(Some(conn.circuit_id), (), String::new).unwrap();
//! assert!(again.resumed);
//!
//! // This time the client never returns
//! manager.on_disconnected(conn.circuit_id).unwrap();
//! tokio::time::sleep(Duration::from_millis(100)).await;
//! assert!(!manager.contains(conn.circuit_id));
//! # }
//! ```

pub mod admission;
pub mod builder;
pub mod circuit;
pub mod classifier;
pub mod errors;
pub mod manager;
pub mod reconnect;
pub mod registry;
pub mod sink;
pub mod timer;

pub use admission::{AdmissionControl, AdmissionPermit};
pub use builder::CircuitManagerBuilder;
pub use circuit::{CircuitEntry, CircuitStatus, Config, TerminationReason};
pub use classifier::{
    DefaultClassifier, DisconnectCause, DisconnectClassifier, DisconnectContext, Disposition,
    PredicateClassifier,
};
pub use errors::{CircuitError, RejectReason};
pub use manager::CircuitManager;
pub use reconnect::Connection;
pub use registry::CircuitRegistry;
pub use sink::{EventRecorder, EventSink, SubscriptionId};
pub use timer::{GraceTimer, TimerHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque circuit identifier, also the token a reconnecting client presents
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CircuitId(Uuid);

impl CircuitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CircuitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CircuitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Severity attached to a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<EventLevel> for tracing::Level {
    fn from(level: EventLevel) -> Self {
        match level {
            EventLevel::Debug => tracing::Level::DEBUG,
            EventLevel::Info => tracing::Level::INFO,
            EventLevel::Warning => tracing::Level::WARN,
            EventLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Lifecycle event names
///
/// Every terminated circuit produces `TerminatedGracefully` immediately
/// followed by `DisconnectedPermanently`, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    /// The circuit's teardown completed without error
    #[serde(rename = "CircuitTerminatedGracefully")]
    TerminatedGracefully,
    /// The circuit can no longer be resumed
    #[serde(rename = "CircuitDisconnectedPermanently")]
    DisconnectedPermanently,
}

impl LifecycleEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEventKind::TerminatedGracefully => "CircuitTerminatedGracefully",
            LifecycleEventKind::DisconnectedPermanently => "CircuitDisconnectedPermanently",
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single audit record emitted by the circuit manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub level: EventLevel,
    pub kind: LifecycleEventKind,
    pub circuit_id: CircuitId,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(circuit_id: CircuitId, kind: LifecycleEventKind, level: EventLevel) -> Self {
        Self {
            level,
            kind,
            circuit_id,
            timestamp: Utc::now(),
        }
    }
}
