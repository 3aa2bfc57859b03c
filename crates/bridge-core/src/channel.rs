//! Channel: a bound transport plus its correlation registry.

use std::sync::Arc;

use crate::{
    Command, DispatchError, InboundEnvelope, OutboundEnvelope, TaskId,
    registry::{CorrelationRegistry, ResponseHandler},
    traits::{InboundSink, Transport},
};

/// Envelope delivery across one execution boundary.
pub struct Channel {
    transport: Arc<dyn Transport>,
    registry: Arc<CorrelationRegistry>,
}

impl Channel {
    /// Bind `transport` to a fresh registry.
    ///
    /// # Errors
    /// Returns error if the transport refuses to bind.
    pub fn install(transport: Arc<dyn Transport>) -> Result<Self, DispatchError> {
        let registry = Arc::new(CorrelationRegistry::new());
        transport.bind(InboundSink::new(Arc::clone(&registry)))?;
        Ok(Self {
            transport,
            registry,
        })
    }

    /// Send a command across the boundary.
    ///
    /// # Errors
    /// Returns error if the transport fails to emit.
    pub fn emit(&self, task_id: TaskId, command: Command) -> Result<(), DispatchError> {
        tracing::debug!("Emitting {} for task {}", command.name(), task_id);
        self.transport
            .emit(OutboundEnvelope::new(task_id, command))
            .map_err(DispatchError::from)
    }

    /// Register a handler for responses to `task_id`.
    ///
    /// # Errors
    /// Returns error if a handler is already pending for the task.
    pub fn listen(&self, task_id: TaskId, handler: ResponseHandler) -> Result<(), DispatchError> {
        self.registry.register(task_id, handler)
    }

    /// Route an inbound envelope; envelopes without a handler are dropped.
    pub fn receive(&self, envelope: InboundEnvelope) {
        self.registry.dispatch(envelope);
    }

    #[must_use]
    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }
}
