//! Builder API for ergonomic circuit manager configuration

use crate::{
    LifecycleEvent,
    circuit::Config,
    classifier::{DefaultClassifier, DisconnectClassifier},
    errors::CircuitError,
    manager::CircuitManager,
    sink::{EventSink, Subscriber},
    timer::GraceTimer,
};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Builder for creating circuit managers with fluent API
pub struct CircuitManagerBuilder<S, T = ()> {
    config: Config,
    sink: Option<Arc<EventSink>>,
    classifier: Option<Arc<dyn DisconnectClassifier>>,
    runtime: Option<Handle>,
    subscribers: Vec<Subscriber>,
    _payload: PhantomData<fn() -> (S, T)>,
}

impl<S, T> CircuitManagerBuilder<S, T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            sink: None,
            classifier: None,
            runtime: None,
            subscribers: Vec::new(),
            _payload: PhantomData,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the grace period in seconds
    pub fn grace_period_secs(mut self, seconds: f64) -> Self {
        self.config.grace_period_secs = seconds;
        self
    }

    pub fn grace_period(self, period: Duration) -> Self {
        self.grace_period_secs(period.as_secs_f64())
    }

    /// Cap the number of live circuits
    pub fn max_circuits(mut self, limit: usize) -> Self {
        self.config.max_circuits = Some(limit);
        self
    }

    /// Cap the number of circuits retained in a grace period
    pub fn max_disconnected(mut self, limit: usize) -> Self {
        self.config.max_disconnected = Some(limit);
        self
    }

    /// Retain every disconnected circuit until its own grace period ends
    pub fn unlimited_disconnected(mut self) -> Self {
        self.config.max_disconnected = None;
        self
    }

    /// Set the expiry jitter factor (0.0 = none, 1.0 = up to one extra grace period)
    pub fn expiry_jitter(mut self, factor: f64) -> Self {
        self.config.expiry_jitter = factor;
        self
    }

    /// Publish events to an existing sink instead of a private one
    pub fn event_sink(mut self, sink: Arc<EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set how disconnects are classified as transient or permanent
    ///
    /// # Examples
    ///
    /// ```rust
    /// use circuit_lifecycle::{CircuitManager, DisconnectCause, Disposition, PredicateClassifier};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let manager = CircuitManager::<String>::builder()
    ///     .classifier(Arc::new(PredicateClassifier::new(|ctx| match ctx.cause {
    ///         // Errored transports rarely come back
    ///         DisconnectCause::TransportError => Disposition::Terminate,
    ///         _ => Disposition::Retain,
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// # drop(manager);
    /// # }
    /// ```
    pub fn classifier(mut self, classifier: Arc<dyn DisconnectClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Runtime used for grace timers (defaults to the current one)
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Subscribe to lifecycle events from the start
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(f));
        self
    }

    /// Build the circuit manager
    pub fn build(self) -> Result<CircuitManager<S, T>, CircuitError> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| CircuitError::NoRuntime)?,
        };

        let sink = self.sink.unwrap_or_else(|| Arc::new(EventSink::new()));
        for subscriber in self.subscribers {
            sink.subscribe(move |event| subscriber(event));
        }

        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(DefaultClassifier));
        let timer = GraceTimer::with_jitter(runtime, self.config.expiry_jitter);

        CircuitManager::from_parts(self.config, timer, sink, classifier)
    }
}

impl<S, T> Default for CircuitManagerBuilder<S, T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
