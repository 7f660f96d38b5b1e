//! Reconnection handling
//!
//! A client that lost its transport may come back on a new connection and
//! present the id of its old circuit. If that circuit is still waiting out
//! its grace period the client gets its session back; otherwise it is handed
//! a fresh circuit instead of an error.

use crate::{
    CircuitId,
    errors::{CircuitError, RejectReason},
    manager::CircuitManager,
};
use std::sync::Arc;

/// Result of a transport handshake
#[derive(Debug)]
pub struct Connection<S> {
    pub circuit_id: CircuitId,
    pub session: Arc<S>,
    /// `true` if an existing circuit was resumed
    pub resumed: bool,
}

impl<S, T> CircuitManager<S, T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Resume a disconnected circuit on a new transport
    ///
    /// Cancels the grace timer and returns the circuit's session payload,
    /// the same allocation it held before the drop.
    pub fn resume(&self, circuit_id: CircuitId, transport: T) -> Result<Arc<S>, RejectReason> {
        self.try_resume(circuit_id, transport)
            .map_err(|(reason, _)| reason)
    }

    /// Like [`resume`](Self::resume), but reports a rejection as a
    /// [`CircuitError`] naming the circuit
    pub fn reattach(&self, circuit_id: CircuitId, transport: T) -> Result<Arc<S>, CircuitError> {
        self.resume(circuit_id, transport)
            .map_err(|reason| reason.into_error(circuit_id))
    }

    fn try_resume(&self, circuit_id: CircuitId, transport: T) -> Result<Arc<S>, (RejectReason, T)> {
        let Some(entry) = self.inner.registry.try_get(circuit_id) else {
            return Err((RejectReason::NotFound, transport));
        };

        // Waits out any expiry or eviction already holding the circuit
        let mut guard = entry.lock();
        let (session, timer) = guard.reconnect(transport)?;
        if let Some(timer) = timer {
            self.inner.timer.cancel(&timer);
        }
        self.inner
            .disconnected
            .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
        drop(guard);

        tracing::debug!(%circuit_id, "circuit resumed");
        Ok(session)
    }

    /// Transport handshake completed
    ///
    /// With `Some(id)` the circuit is resumed if possible; any rejection
    /// falls back to a fresh circuit built from `session`. Only admission
    /// control can fail the handshake.
    pub fn on_connected<F>(
        &self,
        circuit_id: Option<CircuitId>,
        transport: T,
        session: F,
    ) -> Result<Connection<S>, CircuitError>
    where
        F: FnOnce() -> S,
    {
        let transport = match circuit_id {
            Some(id) => match self.try_resume(id, transport) {
                Ok(session) => {
                    return Ok(Connection {
                        circuit_id: id,
                        session,
                        resumed: true,
                    });
                }
                Err((reason, transport)) => {
                    tracing::debug!(circuit_id = %id, %reason, "reconnection rejected; starting fresh circuit");
                    transport
                }
            },
            None => transport,
        };

        let session = Arc::new(session());
        let circuit_id = self.create_shared(Arc::clone(&session), transport)?;

        Ok(Connection {
            circuit_id,
            session,
            resumed: false,
        })
    }

    /// Like [`on_connected`](Self::on_connected) with the raw token the
    /// client sent; a malformed token counts as no token
    pub fn on_connected_with_token<F>(
        &self,
        token: Option<&str>,
        transport: T,
        session: F,
    ) -> Result<Connection<S>, CircuitError>
    where
        F: FnOnce() -> S,
    {
        let circuit_id = token.and_then(|raw| match raw.parse::<CircuitId>() {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::debug!(error = %err, "malformed circuit token; starting fresh circuit");
                None
            }
        });

        self.on_connected(circuit_id, transport, session)
    }
}
