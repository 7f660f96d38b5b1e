//! Grace period timers
//!
//! One countdown per disconnected circuit, each running as a Tokio task on
//! the runtime captured when the manager was built. The timer only delivers
//! the expiry; deciding whether that expiry still matters is the circuit's
//! job, so every arm carries a generation the circuit can compare against.

use crate::{CircuitId, errors::CircuitError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Notification delivered when a grace timer runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub circuit_id: CircuitId,
    pub generation: u64,
}

/// Cancellation handle for an armed timer
#[derive(Debug, Clone)]
pub struct TimerHandle {
    pub circuit_id: CircuitId,
    pub generation: u64,
    /// When the timer fires (grace period plus any jitter)
    pub deadline: Instant,
    abort: AbortHandle,
}

/// Per-circuit grace timer scheduler
pub struct GraceTimer {
    /// Generation and task of the armed timer, keyed by circuit
    armed: Mutex<HashMap<CircuitId, (u64, AbortHandle)>>,
    next_generation: AtomicU64,
    runtime: Handle,
    /// Extra delay factor (0.0 = none, 1.0 = up to one more grace period)
    jitter: f64,
}

impl GraceTimer {
    pub fn new(runtime: Handle) -> Self {
        Self::with_jitter(runtime, 0.0)
    }

    pub fn with_jitter(runtime: Handle, jitter: f64) -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            runtime,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Start the countdown for `circuit_id`
    ///
    /// `on_expire` runs once, on a runtime worker, when the timer fires and
    /// was not canceled first.
    pub fn arm<F>(
        &self,
        circuit_id: CircuitId,
        duration: Duration,
        on_expire: F,
    ) -> Result<TimerHandle, CircuitError>
    where
        F: FnOnce(Expiry) + Send + 'static,
    {
        let mut armed = self.armed.lock();
        if armed.contains_key(&circuit_id) {
            return Err(CircuitError::TimerAlreadyArmed(circuit_id));
        }

        let deadline = Instant::now()
            .checked_add(duration)
            .and_then(|at| at.checked_add(self.jitter_for(duration)))
            .ok_or_else(|| {
                CircuitError::InvalidConfig(format!(
                    "grace period of {duration:?} puts the deadline out of range"
                ))
            })?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let expiry = Expiry {
            circuit_id,
            generation,
        };

        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_expire(expiry);
        });

        let abort = task.abort_handle();
        armed.insert(circuit_id, (generation, abort.clone()));
        tracing::trace!(%circuit_id, generation, ?duration, "grace timer armed");

        Ok(TimerHandle {
            circuit_id,
            generation,
            deadline,
            abort,
        })
    }

    /// Stop a timer. Safe to call after it fired or was already canceled.
    pub fn cancel(&self, handle: &TimerHandle) {
        handle.abort.abort();
        if self.release(handle.circuit_id, handle.generation) {
            tracing::trace!(
                circuit_id = %handle.circuit_id,
                generation = handle.generation,
                "grace timer canceled"
            );
        }
    }

    /// Free the circuit's slot if it still belongs to `generation`
    ///
    /// Called from the expiry path so the circuit can be armed again. A
    /// stale generation leaves a newer timer untouched.
    pub fn release(&self, circuit_id: CircuitId, generation: u64) -> bool {
        let mut armed = self.armed.lock();
        match armed.get(&circuit_id) {
            Some((current, _)) if *current == generation => {
                armed.remove(&circuit_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, circuit_id: CircuitId) -> bool {
        self.armed.lock().contains_key(&circuit_id)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }

    // Full jitter over `duration * jitter`, so expiry is only ever delayed
    fn jitter_for(&self, duration: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return Duration::ZERO;
        }

        let spread_ms = (duration.as_secs_f64() * self.jitter * 1000.0) as u64;
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: spread_ms,
            multiplier: 1.0,
            max_delay_ms: spread_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, 1.0) as u64)
    }
}

impl Drop for GraceTimer {
    fn drop(&mut self) {
        for (_, (_, abort)) in self.armed.get_mut().drain() {
            abort.abort();
        }
    }
}

impl std::fmt::Debug for GraceTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraceTimer")
            .field("armed", &self.armed_count())
            .field("jitter", &self.jitter)
            .finish()
    }
}
