//! Native modules and the responder they answer through.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bridge_core::{Command, CommandKind, InboundEnvelope, Response, TaskId};
use serde_json::Value;

/// Where a host delivers the responses its modules produce.
pub type ResponseSink = Arc<dyn Fn(InboundEnvelope) + Send + Sync>;

/// Handle for sending responses correlated with one task.
///
/// Clones answer the same task. A module may keep one beyond `execute` to
/// stream later responses, as subscriptions do.
#[derive(Clone)]
pub struct Responder {
    task_id: TaskId,
    sink: ResponseSink,
}

impl Responder {
    #[must_use]
    pub fn new(task_id: TaskId, sink: ResponseSink) -> Self {
        Self { task_id, sink }
    }

    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Send `[error, ...args]` for this task.
    pub fn send(&self, response: Response) {
        (self.sink)(InboundEnvelope {
            task_id: self.task_id.clone(),
            response,
        });
    }

    pub fn ok(&self, args: Vec<Value>) {
        self.send(Response::ok(args));
    }

    pub fn err(&self, error: impl Into<String>) {
        self.send(Response::err(error));
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// How a successful execution is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The host sends `[null, ...values]`.
    Values(Vec<Value>),
    /// The module already answered through its responder; the host sends
    /// nothing more.
    Sent,
}

impl From<Vec<Value>> for Reply {
    fn from(values: Vec<Value>) -> Self {
        Self::Values(values)
    }
}

/// Native-side implementation of one or more commands.
#[async_trait]
pub trait NativeModule: Send + Sync {
    /// Commands this module serves.
    fn commands(&self) -> &[CommandKind];

    /// Execute `command`.
    ///
    /// `Ok(Reply::Values(values))` is sent as the final response
    /// `[null, ...values]`, `Err(reason)` as `[reason]`. The responder may be
    /// used any number of times before or after that. A module that must
    /// order its first answer against later ones sends it itself and
    /// returns [`Reply::Sent`].
    async fn execute(&self, command: Command, responder: Responder) -> Result<Reply, String>;
}
