//! Hosted bridge connecting the universal side to a native host in-process.

use bridge_core::OutboundEnvelope;
use bridge_transport::{HostBridge, HostListener};
use serde_json::Value;

use crate::NativeHost;

/// [`HostBridge`] backed by a [`NativeHost`] in the same process.
///
/// Pair it with `HostedTransport` on the universal side; commands are
/// executed on the current tokio runtime.
#[derive(Clone)]
pub struct InProcessBridge {
    host: NativeHost,
}

impl InProcessBridge {
    #[must_use]
    pub const fn new(host: NativeHost) -> Self {
        Self { host }
    }

    #[must_use]
    pub const fn host(&self) -> &NativeHost {
        &self.host
    }
}

impl HostBridge for InProcessBridge {
    fn emit(&self, message: Value) {
        let envelope: OutboundEnvelope = match serde_json::from_value(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Ignoring malformed command envelope: {e}");
                return;
            }
        };
        if let Err(e) = self.host.handle(envelope) {
            tracing::error!("Failed to execute native command: {e}");
        }
    }

    fn on_message(&self, listener: HostListener) {
        self.host.set_sink(move |envelope| match serde_json::to_value(&envelope) {
            Ok(message) => listener(message),
            Err(e) => tracing::error!("Failed to encode response for {}: {e}", envelope.task_id),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NativeModule, Reply, Responder};
    use async_trait::async_trait;
    use bridge_core::{Command, CommandKind};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Ack;

    #[async_trait]
    impl NativeModule for Ack {
        fn commands(&self) -> &[CommandKind] {
            &[CommandKind::MessagingDisconnect]
        }

        async fn execute(&self, _command: Command, _responder: Responder) -> Result<Reply, String> {
            Ok(vec![json!(true)].into())
        }
    }

    #[tokio::test]
    async fn test_round_trip_as_json_values() {
        let host = NativeHost::new();
        host.register(Arc::new(Ack));
        let bridge = InProcessBridge::new(host);

        let (tx, mut rx) = mpsc::unbounded_channel();
        bridge.on_message(Box::new(move |message| {
            let _ = tx.send(message);
        }));

        bridge.emit(json!("not an envelope"));
        bridge.emit(json!(["t1", "messaging_disconnect", ["mqtt://a", "{}"]]));

        assert_eq!(rx.recv().await, Some(json!(["t1", [null, true]])));
    }
}
