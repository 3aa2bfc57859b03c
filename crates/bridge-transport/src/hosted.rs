//! Hosted-bridge transport: the hosting runtime supplies the boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use bridge_core::{InboundEnvelope, InboundSink, OutboundEnvelope, Transport, TransportError};
use serde_json::Value;

/// Listener the transport installs on the host for inbound messages.
pub type HostListener = Box<dyn Fn(Value) + Send + Sync>;

/// Object provided by a hosting runtime.
///
/// Implement this trait to plug the dispatcher into an embedding host.
pub trait HostBridge: Send + Sync {
    /// Hand an outbound envelope (a JSON array) to the host.
    fn emit(&self, message: Value);

    /// Subscribe to messages the host delivers to this side.
    fn on_message(&self, listener: HostListener);
}

/// Transport backed by a [`HostBridge`].
pub struct HostedTransport<B> {
    bridge: B,
    bound: AtomicBool,
}

impl<B: HostBridge> HostedTransport<B> {
    /// Create a transport over `bridge`.
    #[must_use]
    pub const fn new(bridge: B) -> Self {
        Self {
            bridge,
            bound: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn bridge(&self) -> &B {
        &self.bridge
    }
}

impl<B: HostBridge> Transport for HostedTransport<B> {
    fn emit(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        let message = serde_json::to_value(&envelope)?;
        self.bridge.emit(message);
        Ok(())
    }

    fn bind(&self, inbound: InboundSink) -> Result<(), TransportError> {
        if self.bound.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyBound);
        }
        self.bridge.on_message(Box::new(move |message| {
            match serde_json::from_value::<InboundEnvelope>(message) {
                Ok(envelope) => inbound.receive(envelope),
                Err(e) => tracing::warn!("Invalid message from host: {e}"),
            }
        }));
        Ok(())
    }
}
