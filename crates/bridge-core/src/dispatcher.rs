//! Command dispatcher handle shared by every higher-level module.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    Command, InboundEnvelope, Response, TaskId,
    channel::Channel,
    registry::{Continuation, UnroutedHook},
    traits::{Transport, TransportError},
};

/// Dispatch error.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Channel not configured")]
    NotConfigured,
    #[error("Channel already installed")]
    AlreadyInstalled,
    #[error("Task already has a pending handler: {0}")]
    DuplicateTask(TaskId),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failure outcome of a correlated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The native side reported an error; carried verbatim.
    #[error("{0}")]
    Failed(String),
    /// The handler was dropped before any answer arrived.
    #[error("Response handler dropped before an answer arrived")]
    Abandoned,
}

/// Stateless `command_request`/`command_response` seam.
///
/// Cloning shares the underlying channel. The channel is installed exactly
/// once; until then every call fails with [`DispatchError::NotConfigured`].
#[derive(Clone, Default)]
pub struct Dispatcher {
    channel: Arc<OnceLock<Channel>>,
}

impl Dispatcher {
    /// Create a dispatcher without a channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher with `transport` already installed.
    ///
    /// # Errors
    /// Returns error if the transport refuses to bind.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Result<Self, DispatchError> {
        let dispatcher = Self::new();
        dispatcher.install(transport)?;
        Ok(dispatcher)
    }

    /// Install the channel for this dispatcher and all of its clones.
    ///
    /// # Errors
    /// Returns [`DispatchError::AlreadyInstalled`] on a second call.
    pub fn install(&self, transport: Arc<dyn Transport>) -> Result<(), DispatchError> {
        if self.channel.get().is_some() {
            return Err(DispatchError::AlreadyInstalled);
        }
        let channel = Channel::install(transport)?;
        self.channel
            .set(channel)
            .map_err(|_| DispatchError::AlreadyInstalled)?;
        tracing::debug!("Dispatcher channel installed");
        Ok(())
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.channel.get().is_some()
    }

    fn channel(&self) -> Result<&Channel, DispatchError> {
        self.channel.get().ok_or(DispatchError::NotConfigured)
    }

    /// Mint a task identifier for a new operation.
    #[must_use]
    pub fn new_task_id() -> TaskId {
        TaskId::new()
    }

    /// Send `command` correlated with `task_id`.
    ///
    /// # Errors
    /// Returns error if no channel is installed or the transport fails.
    pub fn command_request(&self, task_id: &TaskId, command: Command) -> Result<(), DispatchError> {
        self.channel()?.emit(task_id.clone(), command)
    }

    /// Register `handler` for every future response to `task_id`.
    ///
    /// While `handler` runs it may dispatch and answer other tasks, but a
    /// response for `task_id` itself must not be delivered synchronously from
    /// inside it: the handler's slot is locked for the duration of the call
    /// and the delivery would deadlock.
    ///
    /// # Errors
    /// Returns error if no channel is installed or the task already has a
    /// pending handler.
    pub fn command_response<F>(&self, task_id: TaskId, handler: F) -> Result<(), DispatchError>
    where
        F: FnMut(Response) -> Continuation + Send + 'static,
    {
        self.channel()?.listen(task_id, Box::new(handler))
    }

    /// Drop the pending handler for `task_id`, if any.
    pub fn withdraw(&self, task_id: &TaskId) -> bool {
        self.channel
            .get()
            .is_some_and(|channel| channel.registry().withdraw(task_id))
    }

    /// Send `command` and wait for a single answer.
    ///
    /// The handler is registered before the command is emitted; if emitting
    /// fails the registration is withdrawn again.
    ///
    /// # Errors
    /// Returns error if no channel is installed or the transport fails.
    pub fn request(&self, command: Command) -> Result<PendingResponse, DispatchError> {
        let task_id = Self::new_task_id();
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        self.command_response(task_id.clone(), move |response| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(response);
            }
            Continuation::Complete
        })?;

        if let Err(e) = self.command_request(&task_id, command) {
            self.withdraw(&task_id);
            return Err(e);
        }

        Ok(PendingResponse { task_id, rx })
    }

    /// Observe inbound envelopes that arrive without a pending handler.
    ///
    /// # Errors
    /// Returns error if no channel is installed.
    pub fn on_unrouted<F>(&self, hook: F) -> Result<(), DispatchError>
    where
        F: Fn(&InboundEnvelope) + Send + Sync + 'static,
    {
        let hook: UnroutedHook = Arc::new(hook);
        self.channel()?.registry().set_unrouted_hook(hook);
        Ok(())
    }

    /// Number of tasks with a registered handler.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.channel
            .get()
            .map_or(0, |channel| channel.registry().pending_len())
    }

    /// Number of inbound envelopes dropped for lack of a handler.
    #[must_use]
    pub fn unrouted_count(&self) -> u64 {
        self.channel
            .get()
            .map_or(0, |channel| channel.registry().unrouted_count())
    }
}

/// Future of a single correlated answer.
#[derive(Debug)]
pub struct PendingResponse {
    task_id: TaskId,
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl Future for PendingResponse {
    type Output = Result<Vec<Value>, RemoteError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(response) => response.into_result().map_err(RemoteError::Failed),
            Err(_) => Err(RemoteError::Abandoned),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTransport;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    fn connect() -> Command {
        Command::MessagingConnect {
            url: "mqtt://localhost:1883".into(),
            connection_options: "{}".into(),
        }
    }

    #[test]
    fn test_not_configured() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .command_request(&TaskId::new(), connect())
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotConfigured));

        let err = dispatcher
            .command_response(TaskId::new(), |_| Continuation::Complete)
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotConfigured));
    }

    #[test]
    fn test_install_once() {
        let dispatcher = Dispatcher::new();
        dispatcher.install(Arc::new(MemoryTransport::new())).unwrap();
        let err = dispatcher
            .install(Arc::new(MemoryTransport::new()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyInstalled));

        // Clones share the installed channel.
        assert!(dispatcher.clone().is_installed());
    }

    #[test]
    fn test_request_resolves_on_answer() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::with_transport(transport.clone()).unwrap();

        let mut pending = task::spawn(dispatcher.request(connect()).unwrap());
        assert_pending!(pending.poll());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command, connect());

        transport
            .respond(&sent[0].task_id, Response::ok(vec![json!("done")]))
            .unwrap();
        assert_eq!(assert_ready!(pending.poll()), Ok(vec![json!("done")]));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_request_surfaces_remote_error() {
        let transport = Arc::new(MemoryTransport::with_responder(|_| {
            Some(Response::err("Error Message"))
        }));
        let dispatcher = Dispatcher::with_transport(transport).unwrap();

        let mut pending = task::spawn(dispatcher.request(connect()).unwrap());
        assert_eq!(
            assert_ready!(pending.poll()),
            Err(RemoteError::Failed("Error Message".into()))
        );
    }

    #[test]
    fn test_streamed_responses() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::with_transport(transport.clone()).unwrap();
        let task_id = Dispatcher::new_task_id();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        dispatcher
            .command_response(task_id.clone(), move |response| {
                let done = response.args.is_empty();
                sink.lock().unwrap().extend(response.args);
                if done {
                    Continuation::Complete
                } else {
                    Continuation::Continue
                }
            })
            .unwrap();
        dispatcher.command_request(&task_id, connect()).unwrap();

        transport.respond(&task_id, Response::ok(vec![json!(1)])).unwrap();
        transport.respond(&task_id, Response::ok(vec![json!(2)])).unwrap();
        transport.respond(&task_id, Response::ok(vec![])).unwrap();
        transport.respond(&task_id, Response::ok(vec![json!(3)])).unwrap();

        assert_eq!(*received.lock().unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(dispatcher.unrouted_count(), 1);
    }

    #[test]
    fn test_unrouted_hook() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::with_transport(transport.clone()).unwrap();
        let seen = Arc::new(std::sync::Mutex::new(0));
        let counter = Arc::clone(&seen);
        dispatcher
            .on_unrouted(move |_| *counter.lock().unwrap() += 1)
            .unwrap();

        transport
            .respond(&TaskId::from("stale"), Response::ok(vec![]))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_failed_emit_withdraws_handler() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::with_transport(transport.clone()).unwrap();
        transport.close();

        let err = dispatcher.request(connect()).unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::Closed)));
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
