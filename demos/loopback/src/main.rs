//! Both halves of the bridge in one process, talking to the local broker.
//!
//! Run with: cargo run -p loopback-demo
//!
//! `BRIDGE_BROKER_URL`, `BRIDGE_MACHINE_ID` and `BRIDGE_BASE_TOPIC` override
//! the defaults; `RUST_LOG` controls the log output.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use bridge_core::Dispatcher;
use bridge_messaging::{
    ConnectionOptions, MessageCallback, MessageOptions, Messaging, MessagingConfig,
    SubscriptionOptions, topic,
};
use bridge_native::{InProcessBridge, LocalBroker, NativeHost};
use bridge_transport::HostedTransport;
use futures::future::try_join_all;
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn config_from_env() -> MessagingConfig {
    let mut config = MessagingConfig::new()
        .address(std::env::var("BRIDGE_BROKER_URL").unwrap_or_else(|_| "mqtt://localhost:1883".into()))
        .machine_id(std::env::var("BRIDGE_MACHINE_ID").unwrap_or_else(|_| "loopback".into()));
    if let Ok(base_topic) = std::env::var("BRIDGE_BASE_TOPIC") {
        config = config.base_topic(base_topic);
    }
    config
}

/// What the broker still holds once the demo has cleaned up.
#[derive(Debug)]
struct Leftovers {
    published: usize,
    received: usize,
    subscriptions: usize,
    connections: Vec<String>,
}

async fn run(config: MessagingConfig) -> anyhow::Result<Leftovers> {
    // Native side
    let host = NativeHost::new();
    let broker = Arc::new(LocalBroker::new());
    host.register(broker.clone());

    // Universal side
    let transport = HostedTransport::new(InProcessBridge::new(host));
    let dispatcher = Dispatcher::with_transport(Arc::new(transport))?;
    let messaging = Messaging::new(dispatcher);

    let engine_topics = topic::engine_topic(&config, "#");

    // Queued until init.
    messaging
        .publish(
            "status",
            json!({"online": true}),
            None,
            MessageOptions::new().prepend_engine_topic().retain(true),
            ConnectionOptions::new(),
        )
        .await?;

    // Subscribe and unsubscribe under the same configured login; the
    // subscription is looked up by it.
    messaging.init(config).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback = MessageCallback::new(move |response| {
        let _ = tx.send(response);
    });
    messaging
        .subscribe(
            &engine_topics,
            callback.clone(),
            None,
            SubscriptionOptions::new().qos(1),
            ConnectionOptions::new(),
        )?
        .await
        .context("subscribing to engine topics")?;
    tracing::info!("Subscribed to {engine_topics}");

    try_join_all((1..=3).map(|n| {
        messaging.publish(
            "counter",
            n,
            None,
            MessageOptions::new().prepend_engine_topic(),
            ConnectionOptions::new(),
        )
    }))
    .await?;

    let mut received = 0;
    while let Ok(Some(delivery)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        match delivery.into_result() {
            Ok(args) => {
                received += 1;
                tracing::info!("Received {}", serde_json::Value::Array(args));
            }
            Err(e) => tracing::warn!("Subscription error: {e}"),
        }
    }

    messaging
        .unsubscribe(&engine_topics, &callback, None, ConnectionOptions::new())?
        .await
        .context("unsubscribing from engine topics")?;

    Ok(Leftovers {
        published: broker.published().len(),
        received,
        subscriptions: broker.subscription_count() + messaging.subscription_count(),
        connections: broker.connection_keys(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let leftovers = run(config_from_env()).await?;
    tracing::info!(
        "Broker saw {} publishes, {} delivered; {} subscriptions and {} connections left open",
        leftovers.published,
        leftovers.received,
        leftovers.subscriptions,
        leftovers.connections.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_leaves_nothing_open() {
        let config = MessagingConfig::new()
            .address("mqtt://localhost:1883")
            .machine_id("loopback");

        let leftovers = run(config).await.unwrap();

        assert_eq!(leftovers.published, 4);
        assert_eq!(leftovers.received, 3);
        assert_eq!(leftovers.subscriptions, 0);
        assert!(leftovers.connections.is_empty());
    }
}
