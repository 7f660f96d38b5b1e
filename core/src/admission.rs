//! Admission control for concurrent circuits
//!
//! Caps how many circuits can be alive at once. Each circuit entry holds an
//! [`AdmissionPermit`]; the permit returns to the pool when the circuit
//! terminates and its entry lets go of it.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Non-blocking permit pool bounding the number of live circuits
#[derive(Debug)]
pub struct AdmissionControl {
    limit: usize,
    permits: Arc<Semaphore>,
}

impl AdmissionControl {
    /// Create admission control with the given circuit limit
    ///
    /// Limits above [`Semaphore::MAX_PERMITS`] are clamped to it.
    pub fn new(limit: usize) -> Self {
        let limit = limit.min(Semaphore::MAX_PERMITS);
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Try to admit one more circuit without waiting
    ///
    /// Returns `None` when the limit has been reached.
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Number of circuits currently admitted
    pub fn admitted(&self) -> usize {
        self.limit.saturating_sub(self.available())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Remaining capacity
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Slot held by a live circuit; dropping it frees the slot
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}
