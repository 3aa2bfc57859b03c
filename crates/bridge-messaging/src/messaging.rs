//! Publish/subscribe messaging on top of the dispatcher.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use bridge_core::{Command, Continuation, DispatchError, Dispatcher, RemoteError, Response, TaskId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    ConnectionOptions, MessageCallback, MessageOptions, MessagingConfig, SubscriptionOptions,
    subscriptions::{SubscriptionKey, SubscriptionRegistry},
    topic,
};

/// Messaging error.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("No messaging server address given for {operation}")]
    NoAddress { operation: &'static str },
    #[error("Failed to publish to {url}: {reason}")]
    Publish { url: String, reason: String },
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Failed to disconnect from {url}\n{reason}")]
    Disconnect { url: String, reason: String },
    #[error("Failed to subscribe to {url} (Topic: {topic}): {reason}")]
    Subscribe {
        url: String,
        topic: String,
        reason: String,
    },
    #[error("Failed to unsubscribe from {url} (Topic: {topic})\n{reason}")]
    Unsubscribe {
        url: String,
        topic: String,
        reason: String,
    },
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Messaging request abandoned before the native side answered")]
    Abandoned,
}

/// A publish issued before the subsystem was initialized.
#[derive(Debug)]
struct QueuedPublish {
    topic: String,
    message: Value,
    url: Option<String>,
    message_options: MessageOptions,
    connection_options: ConnectionOptions,
}

#[derive(Default)]
struct State {
    config: MessagingConfig,
    initialized: bool,
    queue: VecDeque<QueuedPublish>,
}

struct Inner {
    dispatcher: Dispatcher,
    state: Mutex<State>,
    subscriptions: Arc<Mutex<SubscriptionRegistry>>,
    // Held by `init` while it flushes the queue; later publishes wait on it.
    flush_gate: tokio::sync::Mutex<()>,
}

/// Messaging subsystem.
///
/// Cloning shares the same configuration, queue and subscriptions.
#[derive(Clone)]
pub struct Messaging {
    inner: Arc<Inner>,
}

impl Messaging {
    /// Create an uninitialized subsystem dispatching through `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                state: Mutex::new(State::default()),
                subscriptions: Arc::new(Mutex::new(SubscriptionRegistry::new())),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        lock_registry(&self.inner.subscriptions)
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> MessagingConfig {
        self.state().config.clone()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// Publishes waiting for initialization.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.state().queue.len()
    }

    /// Active subscription registrations.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions().len()
    }

    /// Configure the subsystem and flush publishes queued before now.
    ///
    /// Queued publishes are dispatched one at a time, in call order, each
    /// settled before the next starts. A failed queued publish is logged;
    /// its caller already returned.
    pub async fn init(&self, config: MessagingConfig) {
        let _gate = self.inner.flush_gate.lock().await;

        let queued = {
            let mut state = self.state();
            state.config = config;
            state.initialized = true;
            std::mem::take(&mut state.queue)
        };

        if !queued.is_empty() {
            tracing::debug!(
                "Flushing {} publishes queued before initialization",
                queued.len()
            );
        }

        for publish in queued {
            let topic = publish.topic.clone();
            if let Err(e) = self.dispatch_publish(publish).await {
                tracing::warn!("Queued publish to {topic} failed: {e}");
            }
        }
    }

    /// Publish `message` on `topic`.
    ///
    /// Before `init` the call is queued and returns at once. Without a
    /// broker address the message is dropped; an unconfigured broker is a
    /// valid state. Non-string messages are sent as JSON text.
    ///
    /// # Errors
    /// Returns error if dispatching fails or the native side reports a
    /// failure.
    pub async fn publish(
        &self,
        topic: &str,
        message: impl Into<Value>,
        url: Option<&str>,
        message_options: MessageOptions,
        connection_options: ConnectionOptions,
    ) -> Result<(), MessagingError> {
        let publish = QueuedPublish {
            topic: topic.to_string(),
            message: message.into(),
            url: url.map(str::to_string),
            message_options,
            connection_options,
        };

        {
            let mut state = self.state();
            if !state.initialized {
                tracing::debug!("Queueing publish to {topic} until messaging is initialized");
                state.queue.push_back(publish);
                return Ok(());
            }
        }

        drop(self.inner.flush_gate.lock().await);
        self.dispatch_publish(publish).await
    }

    async fn dispatch_publish(&self, publish: QueuedPublish) -> Result<(), MessagingError> {
        let config = self.config();
        let Some(url) = config.resolve_address(publish.url.as_deref()) else {
            tracing::debug!(
                "No messaging server configured, dropping publish to {}",
                publish.topic
            );
            return Ok(());
        };

        let topic = topic::resolve(&publish.message_options, &config, &publish.topic);
        let message = match publish.message {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let command = Command::MessagingPublish {
            url: url.clone(),
            topic,
            message,
            message_options: serde_json::to_string(&publish.message_options)?,
            connection_options: serde_json::to_string(
                &publish.connection_options.complete_login(&config),
            )?,
        };

        let answer = self.inner.dispatcher.request(command)?.await;
        settle(answer, |reason| MessagingError::Publish { url, reason })
    }

    /// Open (or reuse) a kept-open broker connection.
    ///
    /// # Errors
    /// Returns error if no address is available, dispatching fails or the
    /// native side reports a failure.
    pub async fn connect(
        &self,
        url: Option<&str>,
        connection_options: ConnectionOptions,
    ) -> Result<(), MessagingError> {
        let config = self.config();
        let url = config
            .resolve_address(url)
            .ok_or(MessagingError::NoAddress { operation: "connect" })?;
        let command = Command::MessagingConnect {
            url: url.clone(),
            connection_options: serde_json::to_string(&connection_options.complete_login(&config))?,
        };

        let answer = self.inner.dispatcher.request(command)?.await;
        settle(answer, |reason| MessagingError::Connect { url, reason })
    }

    /// Close a broker connection.
    ///
    /// The connection options must carry the login the connection was
    /// opened with; they are sent unchanged.
    ///
    /// # Errors
    /// Returns error if no address is available, dispatching fails or the
    /// native side reports a failure.
    pub async fn disconnect(
        &self,
        url: Option<&str>,
        connection_options: ConnectionOptions,
    ) -> Result<(), MessagingError> {
        let url = self
            .config()
            .resolve_address(url)
            .ok_or(MessagingError::NoAddress {
                operation: "disconnect",
            })?;
        let command = Command::MessagingDisconnect {
            url: url.clone(),
            connection_options: serde_json::to_string(&connection_options)?,
        };

        let answer = self.inner.dispatcher.request(command)?.await;
        settle(answer, |reason| MessagingError::Disconnect { url, reason })
    }

    /// Subscribe `callback` to `topic`.
    ///
    /// The returned [`Outcome`] settles once, on the native side's setup
    /// acknowledgment. Every later response for the subscription is handed
    /// to `callback` unchanged until [`Messaging::unsubscribe`].
    ///
    /// # Errors
    /// Returns error without dispatching if no address is available, or if
    /// the subscribe command cannot be dispatched.
    pub fn subscribe(
        &self,
        topic: &str,
        callback: MessageCallback,
        url: Option<&str>,
        subscription_options: SubscriptionOptions,
        connection_options: ConnectionOptions,
    ) -> Result<Outcome, MessagingError> {
        let config = self.config();
        let url = config
            .resolve_address(url)
            .ok_or(MessagingError::NoAddress {
                operation: "subscribe",
            })?;

        let task_id = Dispatcher::new_task_id();
        let mut subscription_options = subscription_options;
        subscription_options.subscription_id = Some(task_id.to_string());

        let connection_options = connection_options.complete_login(&config);
        let key = SubscriptionKey::new(url.clone(), connection_options.session_key(), callback.id());

        let command = Command::MessagingSubscribe {
            url: url.clone(),
            topic: topic.to_string(),
            connection_options: serde_json::to_string(&connection_options)?,
            subscription_options: serde_json::to_string(&subscription_options)?,
        };

        let (tx, rx) = oneshot::channel();
        let mut handler = SubscriptionHandler {
            phase: Phase::AwaitingSetupAck(tx),
            url,
            topic: topic.to_string(),
            key,
            task_id: task_id.clone(),
            callback,
            subscriptions: Arc::clone(&self.inner.subscriptions),
        };

        let dispatcher = &self.inner.dispatcher;
        dispatcher.command_response(task_id.clone(), move |response| handler.handle(response))?;
        if let Err(e) = dispatcher.command_request(&task_id, command) {
            dispatcher.withdraw(&task_id);
            return Err(e.into());
        }

        Ok(Outcome { rx })
    }

    /// Remove the subscription `callback` holds on `topic`.
    ///
    /// Without a matching registration this is a no-op and the outcome is
    /// already settled. On failure the registration is kept so the call can
    /// be retried.
    ///
    /// # Errors
    /// Returns error without dispatching if no address is available, or if
    /// the unsubscribe command cannot be dispatched.
    pub fn unsubscribe(
        &self,
        topic: &str,
        callback: &MessageCallback,
        url: Option<&str>,
        connection_options: ConnectionOptions,
    ) -> Result<Outcome, MessagingError> {
        let config = self.config();
        let url = config
            .resolve_address(url)
            .ok_or(MessagingError::NoAddress {
                operation: "unsubscribe",
            })?;

        let connection_options = connection_options.complete_login(&config);
        let key = SubscriptionKey::new(url.clone(), connection_options.session_key(), callback.id());

        let Some(subscription_id) = self.subscriptions().get(&key).cloned() else {
            tracing::debug!("No subscription to {topic} on {url}, nothing to unsubscribe");
            return Ok(Outcome::settled(Ok(())));
        };

        let command = Command::MessagingUnsubscribe {
            url: url.clone(),
            topic: topic.to_string(),
            subscription_id: subscription_id.to_string(),
            connection_options: serde_json::to_string(&connection_options)?,
        };

        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let topic = topic.to_string();
        let subscriptions = Arc::clone(&self.inner.subscriptions);
        let dispatcher = self.inner.dispatcher.clone();
        let handler = move |response: Response| {
            let Some(tx) = tx.take() else {
                return Continuation::Complete;
            };
            let result = match response.error {
                Some(reason) => Err(MessagingError::Unsubscribe {
                    url: url.clone(),
                    topic: topic.clone(),
                    reason,
                }),
                None => {
                    lock_registry(&subscriptions).remove_if(&key, &subscription_id);
                    dispatcher.withdraw(&subscription_id);
                    Ok(())
                }
            };
            let _ = tx.send(result);
            Continuation::Complete
        };

        let task_id = Dispatcher::new_task_id();
        let dispatcher = &self.inner.dispatcher;
        dispatcher.command_response(task_id.clone(), handler)?;
        if let Err(e) = dispatcher.command_request(&task_id, command) {
            dispatcher.withdraw(&task_id);
            return Err(e.into());
        }

        Ok(Outcome { rx })
    }
}

fn lock_registry(registry: &Mutex<SubscriptionRegistry>) -> MutexGuard<'_, SubscriptionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn settle(
    answer: Result<Vec<Value>, RemoteError>,
    failed: impl FnOnce(String) -> MessagingError,
) -> Result<(), MessagingError> {
    match answer {
        Ok(_) => Ok(()),
        Err(RemoteError::Failed(reason)) => Err(failed(reason)),
        Err(RemoteError::Abandoned) => Err(MessagingError::Abandoned),
    }
}

enum Phase {
    AwaitingSetupAck(oneshot::Sender<Result<(), MessagingError>>),
    Delivering,
}

struct SubscriptionHandler {
    phase: Phase,
    url: String,
    topic: String,
    key: SubscriptionKey,
    task_id: TaskId,
    callback: MessageCallback,
    subscriptions: Arc<Mutex<SubscriptionRegistry>>,
}

impl SubscriptionHandler {
    fn handle(&mut self, response: Response) -> Continuation {
        match std::mem::replace(&mut self.phase, Phase::Delivering) {
            Phase::AwaitingSetupAck(tx) => {
                if let Some(reason) = response.error {
                    let _ = tx.send(Err(MessagingError::Subscribe {
                        url: self.url.clone(),
                        topic: self.topic.clone(),
                        reason,
                    }));
                    return Continuation::Complete;
                }

                let replaced =
                    lock_registry(&self.subscriptions).insert(self.key.clone(), self.task_id.clone());
                if let Some(previous) = replaced {
                    tracing::debug!(
                        "Subscription {} to {} replaces registration {previous}",
                        self.task_id,
                        self.topic
                    );
                }
                let _ = tx.send(Ok(()));
                Continuation::Continue
            }
            Phase::Delivering => {
                self.callback.call(response);
                Continuation::Continue
            }
        }
    }
}

/// Settlement of a subscribe or unsubscribe call.
#[derive(Debug)]
pub struct Outcome {
    rx: oneshot::Receiver<Result<(), MessagingError>>,
}

impl Outcome {
    fn settled(result: Result<(), MessagingError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for Outcome {
    type Output = Result<(), MessagingError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(MessagingError::Abandoned)))
    }
}
