//! Disconnect classification
//!
//! Decides whether a dropped transport is transient (keep the circuit for
//! the grace period so the client can come back) or permanent (terminate
//! right away). Clients that announce their own shutdown, such as a tab
//! being closed, never come back, so holding their state is wasted memory.

/// What the transport knows about why a connection went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Connection dropped without notice (network loss, reload in flight)
    TransportLost,
    /// The client announced an orderly shutdown before leaving
    ClientClosed,
    /// The connection failed with a protocol or I/O error
    TransportError,
}

/// Outcome of classifying a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the circuit disconnected for the grace period
    Retain,
    /// Terminate the circuit immediately
    Terminate,
}

/// Context handed to classifiers
#[derive(Debug, Clone, Copy)]
pub struct DisconnectContext {
    pub circuit_id: crate::CircuitId,
    pub cause: DisconnectCause,
    /// Circuits currently waiting out a grace period
    pub disconnected_circuits: usize,
}

/// Decides what happens to a circuit whose transport went away
///
/// # Examples
///
/// ```rust
/// use circuit_lifecycle::{DisconnectClassifier, DisconnectContext, Disposition};
///
/// #[derive(Debug)]
/// struct NeverRetain;
///
/// impl DisconnectClassifier for NeverRetain {
///     fn classify(&self, _ctx: &DisconnectContext) -> Disposition {
///         Disposition::Terminate
///     }
/// }
/// ```
pub trait DisconnectClassifier: Send + Sync + std::fmt::Debug {
    fn classify(&self, ctx: &DisconnectContext) -> Disposition;
}

/// Retains every disconnect except an explicit client close
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl DisconnectClassifier for DefaultClassifier {
    fn classify(&self, ctx: &DisconnectContext) -> Disposition {
        match ctx.cause {
            DisconnectCause::ClientClosed => Disposition::Terminate,
            DisconnectCause::TransportLost | DisconnectCause::TransportError => {
                Disposition::Retain
            }
        }
    }
}

/// Closure-based classifier
pub struct PredicateClassifier<F>
where
    F: Fn(&DisconnectContext) -> Disposition + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&DisconnectContext) -> Disposition + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> DisconnectClassifier for PredicateClassifier<F>
where
    F: Fn(&DisconnectContext) -> Disposition + Send + Sync,
{
    fn classify(&self, ctx: &DisconnectContext) -> Disposition {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&DisconnectContext) -> Disposition + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CircuitId;

    fn ctx(cause: DisconnectCause) -> DisconnectContext {
        DisconnectContext {
            circuit_id: CircuitId::new(),
            cause,
            disconnected_circuits: 0,
        }
    }

    #[test]
    fn test_default_retains_transport_loss() {
        let classifier = DefaultClassifier;

        assert_eq!(
            classifier.classify(&ctx(DisconnectCause::TransportLost)),
            Disposition::Retain
        );
        assert_eq!(
            classifier.classify(&ctx(DisconnectCause::TransportError)),
            Disposition::Retain
        );
        assert_eq!(
            classifier.classify(&ctx(DisconnectCause::ClientClosed)),
            Disposition::Terminate
        );
    }

    #[test]
    fn test_predicate_classifier() {
        // Drop errored transports instead of waiting for them
        let classifier = PredicateClassifier::new(|ctx| match ctx.cause {
            DisconnectCause::TransportLost => Disposition::Retain,
            _ => Disposition::Terminate,
        });

        assert_eq!(
            classifier.classify(&ctx(DisconnectCause::TransportLost)),
            Disposition::Retain
        );
        assert_eq!(
            classifier.classify(&ctx(DisconnectCause::TransportError)),
            Disposition::Terminate
        );
    }
}
