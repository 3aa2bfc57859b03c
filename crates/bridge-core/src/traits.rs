//! Transport seam between the dispatcher and an execution boundary.

use std::sync::Arc;

use thiserror::Error;

use crate::{InboundEnvelope, OutboundEnvelope, registry::CorrelationRegistry};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("Transport already bound to a channel")]
    AlreadyBound,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Entry point for envelopes arriving from the native side.
///
/// Every transport hands inbound envelopes to this sink, which routes them
/// through the channel's correlation registry.
#[derive(Clone)]
pub struct InboundSink {
    registry: Arc<CorrelationRegistry>,
}

impl InboundSink {
    pub(crate) const fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver an inbound envelope to its pending handler, if any.
    pub fn receive(&self, envelope: InboundEnvelope) {
        self.registry.dispatch(envelope);
    }
}

/// Trait for execution-boundary transports.
///
/// `emit` must not block: implementations queue or hand off the envelope
/// and return.
pub trait Transport: Send + Sync {
    /// Send an envelope across the boundary.
    ///
    /// # Errors
    /// Returns error if the boundary is closed or the envelope cannot be
    /// encoded.
    fn emit(&self, envelope: OutboundEnvelope) -> Result<(), TransportError>;

    /// Start delivering inbound envelopes to `inbound`.
    ///
    /// Called exactly once, when the channel is installed.
    ///
    /// # Errors
    /// Returns error if the transport was already bound or cannot start
    /// listening.
    fn bind(&self, inbound: InboundSink) -> Result<(), TransportError>;
}
