//! Circuit manager
//!
//! Drives every circuit through its lifecycle. Transport notifications and
//! grace timer expiries both land here and both go through the circuit's
//! own lock before touching its state, so for any one circuit there is a
//! single serialized stream of transitions. Terminal events are emitted
//! after that lock is released and before the registry forgets the circuit.

use crate::{
    CircuitId, EventLevel, LifecycleEventKind,
    admission::AdmissionControl,
    circuit::{CircuitEntry, CircuitStatus, Config, TerminationReason},
    classifier::{DisconnectCause, DisconnectClassifier, DisconnectContext, Disposition},
    errors::CircuitError,
    registry::CircuitRegistry,
    sink::{EventSink, SubscriptionId},
    timer::{Expiry, GraceTimer},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Shared state behind every clone of a [`CircuitManager`]
pub(crate) struct Inner<S, T> {
    pub(crate) registry: CircuitRegistry<S, T>,
    pub(crate) timer: GraceTimer,
    pub(crate) sink: Arc<EventSink>,
    pub(crate) classifier: Arc<dyn DisconnectClassifier>,
    pub(crate) admission: Option<Arc<AdmissionControl>>,
    pub(crate) config: Config,
    pub(crate) grace_period: Duration,
    /// Circuits currently in `Disconnected`
    pub(crate) disconnected: AtomicUsize,
}

/// Owns all circuits and their lifecycle
///
/// `S` is the application's session payload, `T` the transport handle bound
/// to the circuit while it is connected. Cloning is cheap and every clone
/// drives the same set of circuits.
pub struct CircuitManager<S, T = ()> {
    pub(crate) inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for CircuitManager<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> CircuitManager<S, T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Create a manager with default collaborators (use builder() for more options)
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config) -> Result<Self, CircuitError> {
        crate::builder::CircuitManagerBuilder::new()
            .config(config)
            .build()
    }

    /// Create a new manager builder
    pub fn builder() -> crate::builder::CircuitManagerBuilder<S, T> {
        crate::builder::CircuitManagerBuilder::new()
    }

    pub(crate) fn from_parts(
        config: Config,
        timer: GraceTimer,
        sink: Arc<EventSink>,
        classifier: Arc<dyn DisconnectClassifier>,
    ) -> Result<Self, CircuitError> {
        config.validate()?;
        let grace_period = config.grace_period()?;
        let admission = config
            .max_circuits
            .map(|limit| Arc::new(AdmissionControl::new(limit)));

        Ok(Self {
            inner: Arc::new(Inner {
                registry: CircuitRegistry::new(),
                timer,
                sink,
                classifier,
                admission,
                config,
                grace_period,
                disconnected: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    /// Event sink lifecycle events are published to
    pub fn events(&self) -> &Arc<EventSink> {
        &self.inner.sink
    }

    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&crate::LifecycleEvent) + Send + Sync + 'static,
    {
        self.inner.sink.subscribe(f)
    }

    /// Register a brand-new circuit in the `Active` state
    pub fn create(&self, session: S, transport: T) -> Result<CircuitId, CircuitError> {
        self.create_shared(Arc::new(session), transport)
    }

    pub(crate) fn create_shared(
        &self,
        session: Arc<S>,
        transport: T,
    ) -> Result<CircuitId, CircuitError> {
        let permit = match &self.inner.admission {
            Some(admission) => Some(admission.try_admit().ok_or(CircuitError::CapacityReached {
                limit: admission.limit(),
            })?),
            None => None,
        };

        let (circuit_id, _) = self
            .inner
            .registry
            .create(|id| CircuitEntry::new(id, session, transport, permit));

        tracing::debug!(%circuit_id, "circuit created");
        Ok(circuit_id)
    }

    /// The transport for `circuit_id` went away without further detail
    pub fn on_disconnected(&self, circuit_id: CircuitId) -> Result<CircuitStatus, CircuitError> {
        self.on_disconnected_with(circuit_id, DisconnectCause::TransportLost)
    }

    /// The transport for `circuit_id` went away
    ///
    /// Transient disconnects move the circuit to `Disconnected` and start
    /// its grace timer. Permanent ones terminate it right away.
    pub fn on_disconnected_with(
        &self,
        circuit_id: CircuitId,
        cause: DisconnectCause,
    ) -> Result<CircuitStatus, CircuitError> {
        let ctx = DisconnectContext {
            circuit_id,
            cause,
            disconnected_circuits: self.disconnected_count(),
        };

        if self.inner.classifier.classify(&ctx) == Disposition::Terminate {
            self.inner
                .terminate(circuit_id, TerminationReason::GracefulClient)?;
            return Ok(CircuitStatus::Terminated {
                reason: TerminationReason::GracefulClient,
            });
        }

        let status = self.inner.disconnect(circuit_id, cause)?;
        self.inner.enforce_retention();
        Ok(status)
    }

    /// Server-side eviction, e.g. under resource pressure
    pub fn evict(&self, circuit_id: CircuitId) -> Result<(), CircuitError> {
        self.inner
            .terminate(circuit_id, TerminationReason::ExplicitEviction)
    }

    /// The client announced an orderly shutdown
    pub fn close(&self, circuit_id: CircuitId) -> Result<(), CircuitError> {
        self.inner
            .terminate(circuit_id, TerminationReason::GracefulClient)
    }

    /// Evict every live circuit. Returns how many were terminated.
    pub fn shutdown(&self) -> usize {
        let evicted = self
            .inner
            .registry
            .ids()
            .into_iter()
            .filter(|id| self.evict(*id).is_ok())
            .count();

        tracing::info!(evicted, "circuit manager shut down");
        evicted
    }

    pub fn status(&self, circuit_id: CircuitId) -> Result<CircuitStatus, CircuitError> {
        let entry = self
            .inner
            .registry
            .try_get(circuit_id)
            .ok_or(CircuitError::NotFound(circuit_id))?;
        let status = entry.lock().status();
        Ok(status)
    }

    /// Run `f` against the circuit's session under the circuit lock
    ///
    /// `f` must not call back into the manager for the same circuit.
    pub fn with_session<R, F>(&self, circuit_id: CircuitId, f: F) -> Result<R, CircuitError>
    where
        F: FnOnce(&S) -> R,
    {
        let entry = self
            .inner
            .registry
            .try_get(circuit_id)
            .ok_or(CircuitError::NotFound(circuit_id))?;
        let guard = entry.lock();
        let session = guard
            .session()
            .ok_or(CircuitError::AlreadyTerminated(circuit_id))?;
        Ok(f(session))
    }

    pub fn contains(&self, circuit_id: CircuitId) -> bool {
        self.inner.registry.contains(circuit_id)
    }

    /// Live circuits (Active or Disconnected)
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    pub fn disconnected_count(&self) -> usize {
        self.inner.disconnected.load(Ordering::Acquire)
    }

    /// Remaining admission capacity, if a limit is configured
    pub fn available_capacity(&self) -> Option<usize> {
        self.inner.admission.as_ref().map(|a| a.available())
    }
}

impl<S, T> Inner<S, T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
{
    fn disconnect(
        self: &Arc<Self>,
        circuit_id: CircuitId,
        cause: DisconnectCause,
    ) -> Result<CircuitStatus, CircuitError> {
        let entry = self
            .registry
            .try_get(circuit_id)
            .ok_or(CircuitError::NotFound(circuit_id))?;
        let mut guard = entry.lock();

        let state = guard.status();
        if !state.is_active() {
            return Err(CircuitError::InvalidStateTransition {
                circuit: circuit_id,
                state: state.name(),
                event: "disconnect",
            });
        }

        let weak = Arc::downgrade(self);
        let handle = self.timer.arm(circuit_id, self.grace_period, move |expiry| {
            if let Some(inner) = weak.upgrade() {
                inner.expire(expiry);
            }
        })?;

        if let Err(err) = guard.disconnect(handle.clone()) {
            self.timer.cancel(&handle);
            tracing::error!(%circuit_id, error = %err, "active circuit refused disconnect; forcing termination");
            guard.force_terminate(TerminationReason::ExplicitEviction);
            drop(guard);
            self.finalize(circuit_id, TerminationReason::ExplicitEviction);
            return Err(err);
        }

        self.disconnected.fetch_add(1, Ordering::AcqRel);
        let status = guard.status();
        drop(guard);

        tracing::debug!(
            %circuit_id,
            ?cause,
            grace_period = ?self.grace_period,
            "circuit disconnected"
        );
        Ok(status)
    }

    /// Grace timer delivery
    ///
    /// Only acts if the circuit is still disconnected under the same timer
    /// generation; anything else means a reconnect or termination won.
    pub(crate) fn expire(&self, expiry: Expiry) {
        let circuit_id = expiry.circuit_id;
        self.timer.release(circuit_id, expiry.generation);

        let Some(entry) = self.registry.try_get(circuit_id) else {
            tracing::trace!(%circuit_id, "grace timer fired for removed circuit");
            return;
        };
        let mut guard = entry.lock();

        if guard.timer().map(|t| t.generation) != Some(expiry.generation) {
            tracing::trace!(
                %circuit_id,
                generation = expiry.generation,
                "stale grace timer expiry ignored"
            );
            return;
        }

        let reason = TerminationReason::GracePeriodExpired;
        if let Err(err) = guard.terminate(reason) {
            tracing::error!(%circuit_id, error = %err, "grace period expiry rejected; forcing termination");
            guard.force_terminate(reason);
        }
        self.disconnected.fetch_sub(1, Ordering::AcqRel);
        drop(guard);

        self.finalize(circuit_id, reason);
    }

    pub(crate) fn terminate(
        &self,
        circuit_id: CircuitId,
        reason: TerminationReason,
    ) -> Result<(), CircuitError> {
        let entry = self
            .registry
            .try_get(circuit_id)
            .ok_or(CircuitError::NotFound(circuit_id))?;
        let mut guard = entry.lock();

        let was_disconnected = guard.status().is_disconnected();
        if let Some(timer) = guard.terminate(reason)? {
            self.timer.cancel(&timer);
        }
        if was_disconnected {
            self.disconnected.fetch_sub(1, Ordering::AcqRel);
        }
        drop(guard);

        self.finalize(circuit_id, reason);
        Ok(())
    }

    /// Emit the terminal pair, then forget the circuit
    fn finalize(&self, circuit_id: CircuitId, reason: TerminationReason) {
        self.sink.emit(
            circuit_id,
            LifecycleEventKind::TerminatedGracefully,
            EventLevel::Debug,
        );
        self.sink.emit(
            circuit_id,
            LifecycleEventKind::DisconnectedPermanently,
            EventLevel::Debug,
        );
        self.registry.remove(circuit_id);

        tracing::info!(%circuit_id, ?reason, "circuit terminated");
    }

    /// Evict the disconnected circuits closest to expiry until the
    /// retention limit holds again
    fn enforce_retention(&self) {
        let Some(limit) = self.config.max_disconnected else {
            return;
        };

        let excess = self.disconnected.load(Ordering::Acquire).saturating_sub(limit);
        for _ in 0..excess {
            let oldest = self
                .registry
                .entries()
                .into_iter()
                .filter_map(|entry| {
                    let guard = entry.lock();
                    match guard.status() {
                        CircuitStatus::Disconnected { deadline } => Some((deadline, guard.id())),
                        _ => None,
                    }
                })
                .min();

            let Some((_, circuit_id)) = oldest else {
                return;
            };

            tracing::info!(%circuit_id, limit, "retention limit reached; evicting disconnected circuit");
            // Losing a race with a reconnect or expiry is fine here
            let _ = self.terminate(circuit_id, TerminationReason::ExplicitEviction);
        }
    }
}

impl<S, T> std::fmt::Debug for CircuitManager<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitManager")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("timer", &self.inner.timer)
            .field("sink", &self.inner.sink)
            .field("classifier", &self.inner.classifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::EventRecorder;

    const GRACE: Duration = Duration::from_secs(1);

    fn manager_with(config: Config) -> (CircuitManager<String>, Arc<EventRecorder>) {
        let manager = CircuitManager::new(config).unwrap();
        let recorder = EventRecorder::new();
        recorder.attach(manager.events());
        (manager, recorder)
    }

    fn manager() -> (CircuitManager<String>, Arc<EventRecorder>) {
        manager_with(Config {
            grace_period_secs: GRACE.as_secs_f64(),
            ..Default::default()
        })
    }

    fn terminal_pair(recorder: &EventRecorder, id: CircuitId) -> Vec<(EventLevel, &'static str)> {
        recorder
            .events_for(id)
            .iter()
            .map(|e| (e.level, e.kind.name()))
            .collect()
    }

    const PAIR: [(EventLevel, &str); 2] = [
        (EventLevel::Debug, "CircuitTerminatedGracefully"),
        (EventLevel::Debug, "CircuitDisconnectedPermanently"),
    ];

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_without_reconnect_terminates_after_grace() {
        let (manager, recorder) = manager();
        let c1 = manager.create("c1".to_string(), ()).unwrap();

        let status = manager.on_disconnected(c1).unwrap();
        assert!(status.is_disconnected());
        assert_eq!(manager.disconnected_count(), 1);

        tokio::time::sleep(GRACE - Duration::from_millis(1)).await;
        assert!(recorder.events_for(c1).is_empty(), "grace period still running");
        assert!(manager.status(c1).unwrap().is_disconnected());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(terminal_pair(&recorder, c1), PAIR);
        assert_eq!(manager.status(c1), Err(CircuitError::NotFound(c1)));
        assert_eq!(manager.disconnected_count(), 0);
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_keeps_circuit() {
        let (manager, recorder) = manager();
        let c2 = manager.create("c2".to_string(), ()).unwrap();
        let original = manager.with_session(c2, |s| s as *const String).unwrap();

        manager.on_disconnected(c2).unwrap();
        tokio::time::sleep(GRACE / 2).await;

        let session = manager.resume(c2, ()).unwrap();
        assert_eq!(&*session as *const String, original, "same payload");
        assert_eq!(manager.status(c2).unwrap(), CircuitStatus::Active);

        // Well past the original deadline
        tokio::time::sleep(GRACE * 3).await;
        assert!(recorder.events_for(c2).is_empty());
        assert_eq!(manager.status(c2).unwrap(), CircuitStatus::Active);
        assert_eq!(manager.disconnected_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_drop_and_resume_cycles() {
        let (manager, recorder) = manager();
        let id = manager.create("session".to_string(), ()).unwrap();

        for _ in 0..5 {
            manager.on_disconnected(id).unwrap();
            tokio::time::sleep(GRACE / 2).await;
            manager.resume(id, ()).unwrap();
        }

        tokio::time::sleep(GRACE * 2).await;
        assert!(recorder.events().is_empty());

        manager.on_disconnected(id).unwrap();
        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(terminal_pair(&recorder, id), PAIR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_eviction_emits_pair_once() {
        let (manager, recorder) = manager();
        let id = manager.create("evicted".to_string(), ()).unwrap();

        manager.evict(id).unwrap();
        assert_eq!(terminal_pair(&recorder, id), PAIR);
        assert!(!manager.contains(id));

        // Already gone: no second pair
        assert_eq!(manager.evict(id), Err(CircuitError::NotFound(id)));
        assert_eq!(recorder.events_for(id).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicting_disconnected_circuit_cancels_timer() {
        let (manager, recorder) = manager();
        let id = manager.create("evicted".to_string(), ()).unwrap();

        manager.on_disconnected(id).unwrap();
        manager.evict(id).unwrap();
        assert_eq!(manager.disconnected_count(), 0);
        assert!(!manager.inner.timer.is_armed(id));

        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(terminal_pair(&recorder, id), PAIR, "expiry must not add events");
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_close_terminates_immediately() {
        let (manager, recorder) = manager();
        let id = manager.create("closing".to_string(), ()).unwrap();

        let status = manager
            .on_disconnected_with(id, DisconnectCause::ClientClosed)
            .unwrap();

        assert_eq!(
            status,
            CircuitStatus::Terminated {
                reason: TerminationReason::GracefulClient
            }
        );
        assert_eq!(terminal_pair(&recorder, id), PAIR);
        assert!(!manager.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_close_after_transport_loss() {
        let (manager, recorder) = manager();
        let id = manager.create("closing".to_string(), ()).unwrap();

        manager.on_disconnected(id).unwrap();
        manager
            .on_disconnected_with(id, DisconnectCause::ClientClosed)
            .unwrap();

        assert_eq!(terminal_pair(&recorder, id), PAIR);
        assert_eq!(manager.disconnected_count(), 0);

        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(recorder.events_for(id).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_disconnect_is_invalid() {
        let (manager, _) = manager();
        let id = manager.create("twice".to_string(), ()).unwrap();

        manager.on_disconnected(id).unwrap();
        let second = manager.on_disconnected(id);

        assert!(matches!(
            second,
            Err(CircuitError::InvalidStateTransition {
                state: "Disconnected",
                event: "disconnect",
                ..
            })
        ));
        assert_eq!(manager.disconnected_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_circuit() {
        let (manager, _) = manager();
        let id = CircuitId::new();

        assert_eq!(manager.on_disconnected(id), Err(CircuitError::NotFound(id)));
        assert_eq!(manager.close(id), Err(CircuitError::NotFound(id)));
        assert_eq!(manager.status(id), Err(CircuitError::NotFound(id)));
        assert_eq!(
            manager.with_session(id, |_| ()),
            Err(CircuitError::NotFound(id))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_is_released_on_termination() {
        let (manager, _) = manager_with(Config {
            grace_period_secs: 1.0,
            max_circuits: Some(1),
            ..Default::default()
        });

        let first = manager.create("first".to_string(), ()).unwrap();
        assert_eq!(manager.available_capacity(), Some(0));
        assert_eq!(
            manager.create("second".to_string(), ()),
            Err(CircuitError::CapacityReached { limit: 1 })
        );

        // A disconnected circuit still holds its slot
        manager.on_disconnected(first).unwrap();
        assert!(manager.create("second".to_string(), ()).is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.available_capacity(), Some(1));
        assert!(manager.create("second".to_string(), ()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_limit_evicts_closest_to_expiry() {
        let (manager, recorder) = manager_with(Config {
            grace_period_secs: 60.0,
            max_disconnected: Some(2),
            ..Default::default()
        });

        let ids: Vec<_> = (0..3)
            .map(|i| manager.create(format!("s{i}"), ()).unwrap())
            .collect();

        for id in &ids {
            manager.on_disconnected(*id).unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        assert_eq!(manager.disconnected_count(), 2);
        assert_eq!(terminal_pair(&recorder, ids[0]), PAIR);
        assert!(manager.status(ids[1]).unwrap().is_disconnected());
        assert!(manager.status(ids[2]).unwrap().is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_evicts_everything() {
        let (manager, recorder) = manager();
        let active = manager.create("a".to_string(), ()).unwrap();
        let dropped = manager.create("b".to_string(), ()).unwrap();
        manager.on_disconnected(dropped).unwrap();

        assert_eq!(manager.shutdown(), 2);
        assert!(manager.is_empty());
        assert_eq!(terminal_pair(&recorder, active), PAIR);
        assert_eq!(terminal_pair(&recorder, dropped), PAIR);
        assert_eq!(manager.inner.timer.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_can_call_back_into_manager() {
        let (manager, _) = manager();
        let observer = manager.clone();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_ref = Arc::clone(&seen);

        manager.subscribe(move |event| {
            // Circuit lock is released during emission
            seen_ref
                .lock()
                .push(observer.status(event.circuit_id).map(|s| s.name()));
        });

        let id = manager.create("reentrant".to_string(), ()).unwrap();
        manager.evict(id).unwrap();

        assert_eq!(*seen.lock(), vec![Ok("Terminated"), Ok("Terminated")]);
        assert!(!manager.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_grace_period_is_rejected_at_build() {
        let result = CircuitManager::<String>::new(Config {
            grace_period_secs: 1e19,
            ..Default::default()
        });
        assert!(matches!(result, Err(CircuitError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_longest_grace_period_disconnects_cleanly() {
        let (manager, recorder) = manager_with(Config {
            grace_period_secs: crate::circuit::MAX_GRACE_PERIOD_SECS,
            expiry_jitter: 1.0,
            ..Default::default()
        });
        let id = manager.create("patient".to_string(), ()).unwrap();

        assert!(manager.on_disconnected(id).unwrap().is_disconnected());
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(manager.status(id).unwrap().is_disconnected());
        assert!(recorder.events_for(id).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_evictions_racing_expiry_terminate_once() {
        let (manager, recorder) = manager_with(Config {
            grace_period_secs: 0.005,
            ..Default::default()
        });

        let mut ids = Vec::new();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let id = manager.create(format!("s{i}"), ()).unwrap();
            manager.on_disconnected(id).unwrap();
            ids.push(id);

            for _ in 0..2 {
                let manager = manager.clone();
                tasks.push(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = manager.evict(id);
                }));
            }
        }

        for task in tasks {
            task.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        for id in &ids {
            assert_eq!(terminal_pair(&recorder, *id), PAIR, "terminated exactly once");
            assert!(!manager.contains(*id));
        }
        assert_eq!(manager.disconnected_count(), 0);
        assert_eq!(manager.inner.timer.armed_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_circuits_terminate_independently() {
        let (manager, recorder) = manager_with(Config {
            grace_period_secs: 0.02,
            ..Default::default()
        });

        let mut tasks = Vec::new();
        for i in 0..32 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                let id = manager.create(format!("s{i}"), ()).unwrap();
                manager.on_disconnected(id).unwrap();
                id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        for id in &ids {
            assert!(
                recorder
                    .wait_for(
                        *id,
                        LifecycleEventKind::DisconnectedPermanently,
                        Duration::from_secs(5)
                    )
                    .await
            );
        }

        // Removal follows emission on the same worker
        tokio::time::sleep(Duration::from_millis(50)).await;
        for id in &ids {
            assert_eq!(terminal_pair(&recorder, *id), PAIR);
            assert!(!manager.contains(*id));
        }
    }
}
