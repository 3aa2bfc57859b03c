//! In-memory transport.

use std::sync::{
    Mutex, OnceLock, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    Command, InboundEnvelope, OutboundEnvelope, Response, TaskId,
    traits::{InboundSink, Transport, TransportError},
};

type Responder = Box<dyn FnMut(&OutboundEnvelope) -> Option<Response> + Send>;

/// In-memory transport implementation.
///
/// Records every emitted envelope and lets the caller answer them, either
/// by hand through [`MemoryTransport::respond`] or automatically through a
/// responder. Useful for tests and for wiring modules without a native side.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutboundEnvelope>>,
    sink: OnceLock<InboundSink>,
    responder: Mutex<Option<Responder>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport that records envelopes without answering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that answers each emitted envelope with the
    /// responder's result (`None` leaves the task pending).
    #[must_use]
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&OutboundEnvelope) -> Option<Response> + Send + 'static,
    {
        let transport = Self::new();
        transport.set_responder(responder);
        transport
    }

    /// Replace the automatic responder.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&OutboundEnvelope) -> Option<Response> + Send + 'static,
    {
        *self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(responder));
    }

    /// Envelopes emitted so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundEnvelope> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commands emitted so far, in order.
    #[must_use]
    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent().into_iter().map(|envelope| envelope.command).collect()
    }

    /// Forget the recorded envelopes.
    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Make every further `emit` fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Deliver a response for `task_id` as if the native side sent it.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] if the transport is not bound.
    pub fn respond(&self, task_id: &TaskId, response: Response) -> Result<(), TransportError> {
        let sink = self.sink.get().ok_or(TransportError::Closed)?;
        sink.receive(InboundEnvelope::new(task_id.clone(), response));
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn emit(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());

        // The responder lock is released before delivering, so handlers may
        // emit again.
        let answer = self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .and_then(|responder| responder(&envelope));

        if let Some(response) = answer {
            self.respond(&envelope.task_id, response)?;
        }
        Ok(())
    }

    fn bind(&self, inbound: InboundSink) -> Result<(), TransportError> {
        self.sink
            .set(inbound)
            .map_err(|_| TransportError::AlreadyBound)
    }
}
