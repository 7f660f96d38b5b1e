//! Lifecycle event fan-out
//!
//! [`EventSink`] delivers every [`LifecycleEvent`] synchronously to all
//! current subscribers before `emit` returns, and mirrors it to `tracing`.
//! The subscriber list is copy-on-write: emission walks a snapshot, so
//! subscribing or unsubscribing during an emission never disturbs it. An
//! event already in flight may still reach a subscriber that is being
//! removed; events emitted after `unsubscribe` returns never do.

use crate::{CircuitId, EventLevel, LifecycleEvent, LifecycleEventKind};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Callback invoked for every emitted event
pub type Subscriber = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Handle returned by [`EventSink::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SubscriberList = Arc<Vec<(SubscriptionId, Subscriber)>>;

/// Synchronous, copy-on-write event dispatcher
pub struct EventSink {
    subscribers: RwLock<SubscriberList>,
    next_id: AtomicU64,
}

impl EventSink {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber; it sees every event emitted after this returns
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.subscribers.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push((id, Arc::new(f) as Subscriber));
        *guard = Arc::new(next);
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.subscribers.write();
        if !guard.iter().any(|(sid, _)| *sid == id) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|(sid, _)| *sid != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Build an event, log it and deliver it to every subscriber
    pub fn emit(
        &self,
        circuit_id: CircuitId,
        kind: LifecycleEventKind,
        level: EventLevel,
    ) -> LifecycleEvent {
        let event = LifecycleEvent::new(circuit_id, kind, level);
        trace_event(&event);

        let snapshot = self.subscribers.read().clone();
        for (_, subscriber) in snapshot.iter() {
            subscriber(&event);
        }

        event
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn trace_event(event: &LifecycleEvent) {
    let circuit_id = event.circuit_id;
    let name = event.kind.name();
    match event.level {
        EventLevel::Debug => tracing::debug!(%circuit_id, event = name, "circuit lifecycle"),
        EventLevel::Info => tracing::info!(%circuit_id, event = name, "circuit lifecycle"),
        EventLevel::Warning => tracing::warn!(%circuit_id, event = name, "circuit lifecycle"),
        EventLevel::Error => tracing::error!(%circuit_id, event = name, "circuit lifecycle"),
    }
}

/// In-memory subscriber that keeps every event it sees
///
/// Async callers can wait for a specific event with [`EventRecorder::wait_for`],
/// which makes it the natural probe for tests that drive a circuit through
/// disconnects and want to observe the terminal pair.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<LifecycleEvent>>,
    notify: Notify,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe this recorder to `sink`
    pub fn attach(self: &Arc<Self>, sink: &EventSink) -> SubscriptionId {
        let recorder = Arc::clone(self);
        sink.subscribe(move |event| recorder.record(event))
    }

    pub fn record(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
        self.notify.notify_waiters();
    }

    /// All recorded events in emission order
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// Events recorded for one circuit, in emission order
    pub fn events_for(&self, circuit_id: CircuitId) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.circuit_id == circuit_id)
            .cloned()
            .collect()
    }

    /// `(level, name)` pairs, the shape log-based assertions usually want
    pub fn messages(&self) -> Vec<(EventLevel, &'static str)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.level, e.kind.name()))
            .collect()
    }

    pub fn contains(&self, circuit_id: CircuitId, kind: LifecycleEventKind) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.circuit_id == circuit_id && e.kind == kind)
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait until `kind` has been recorded for `circuit_id`
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for(
        &self,
        circuit_id: CircuitId,
        kind: LifecycleEventKind,
        timeout: Duration,
    ) -> bool {
        let wait = async {
            loop {
                let mut notified = std::pin::pin!(self.notify.notified());
                notified.as_mut().enable();
                if self.contains(circuit_id, kind) {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
