//! Envelopes crossing the execution boundary.
//!
//! Outbound envelopes travel as `[taskId, commandName, args]`, inbound ones
//! as `[taskId, [error | null, ...args]]`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Correlates one outbound request with its inbound response(s).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Mint a fresh task identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Envelope decoding error.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Command {command} expects {expected} arguments, got {found}")]
    ArgumentCount {
        command: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Argument {index} of {command} must be a string")]
    NonStringArgument { command: &'static str, index: usize },
}

/// The set of commands understood by the native side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    MessagingConnect,
    MessagingDisconnect,
    MessagingPublish,
    MessagingSubscribe,
    MessagingUnsubscribe,
}

impl CommandKind {
    /// Every command kind, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::MessagingConnect,
        Self::MessagingDisconnect,
        Self::MessagingPublish,
        Self::MessagingSubscribe,
        Self::MessagingUnsubscribe,
    ];

    /// Name used on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MessagingConnect => "messaging_connect",
            Self::MessagingDisconnect => "messaging_disconnect",
            Self::MessagingPublish => "messaging_publish",
            Self::MessagingSubscribe => "messaging_subscribe",
            Self::MessagingUnsubscribe => "messaging_unsubscribe",
        }
    }

    const fn arity(self) -> usize {
        match self {
            Self::MessagingConnect | Self::MessagingDisconnect => 2,
            Self::MessagingSubscribe | Self::MessagingUnsubscribe => 4,
            Self::MessagingPublish => 5,
        }
    }

    /// Look a command kind up by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command sent to the native side, one payload shape per variant.
///
/// Option arguments are carried as the JSON text the native side expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MessagingConnect {
        url: String,
        connection_options: String,
    },
    MessagingDisconnect {
        url: String,
        connection_options: String,
    },
    MessagingPublish {
        url: String,
        topic: String,
        message: String,
        message_options: String,
        connection_options: String,
    },
    MessagingSubscribe {
        url: String,
        topic: String,
        connection_options: String,
        subscription_options: String,
    },
    MessagingUnsubscribe {
        url: String,
        topic: String,
        subscription_id: String,
        connection_options: String,
    },
}

impl Command {
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::MessagingConnect { .. } => CommandKind::MessagingConnect,
            Self::MessagingDisconnect { .. } => CommandKind::MessagingDisconnect,
            Self::MessagingPublish { .. } => CommandKind::MessagingPublish,
            Self::MessagingSubscribe { .. } => CommandKind::MessagingSubscribe,
            Self::MessagingUnsubscribe { .. } => CommandKind::MessagingUnsubscribe,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Positional argument tuple for the wire.
    #[must_use]
    pub fn into_args(self) -> Vec<Value> {
        let strings = match self {
            Self::MessagingConnect {
                url,
                connection_options,
            }
            | Self::MessagingDisconnect {
                url,
                connection_options,
            } => vec![url, connection_options],
            Self::MessagingPublish {
                url,
                topic,
                message,
                message_options,
                connection_options,
            } => vec![url, topic, message, message_options, connection_options],
            Self::MessagingSubscribe {
                url,
                topic,
                connection_options,
                subscription_options,
            } => vec![url, topic, connection_options, subscription_options],
            Self::MessagingUnsubscribe {
                url,
                topic,
                subscription_id,
                connection_options,
            } => vec![url, topic, subscription_id, connection_options],
        };
        strings.into_iter().map(Value::String).collect()
    }

    /// Rebuild a command from its wire name and argument tuple.
    ///
    /// # Errors
    /// Returns error if the name is unknown or the arguments do not match
    /// the command's shape.
    pub fn from_wire(name: &str, args: Vec<Value>) -> Result<Self, EnvelopeError> {
        let kind =
            CommandKind::from_name(name).ok_or_else(|| EnvelopeError::UnknownCommand(name.into()))?;
        if args.len() != kind.arity() {
            return Err(EnvelopeError::ArgumentCount {
                command: kind.name(),
                expected: kind.arity(),
                found: args.len(),
            });
        }

        let mut strings = args
            .into_iter()
            .enumerate()
            .map(|(index, value)| match value {
                Value::String(s) => Ok(s),
                _ => Err(EnvelopeError::NonStringArgument {
                    command: kind.name(),
                    index,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();

        // Arity was checked above, so every `next()` below yields a value.
        let mut next = || strings.next().unwrap_or_default();
        Ok(match kind {
            CommandKind::MessagingConnect => Self::MessagingConnect {
                url: next(),
                connection_options: next(),
            },
            CommandKind::MessagingDisconnect => Self::MessagingDisconnect {
                url: next(),
                connection_options: next(),
            },
            CommandKind::MessagingPublish => Self::MessagingPublish {
                url: next(),
                topic: next(),
                message: next(),
                message_options: next(),
                connection_options: next(),
            },
            CommandKind::MessagingSubscribe => Self::MessagingSubscribe {
                url: next(),
                topic: next(),
                connection_options: next(),
                subscription_options: next(),
            },
            CommandKind::MessagingUnsubscribe => Self::MessagingUnsubscribe {
                url: next(),
                topic: next(),
                subscription_id: next(),
                connection_options: next(),
            },
        })
    }
}

/// Request from the universal side to the native side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawOutbound", try_from = "RawOutbound")]
pub struct OutboundEnvelope {
    pub task_id: TaskId,
    pub command: Command,
}

impl OutboundEnvelope {
    #[must_use]
    pub const fn new(task_id: TaskId, command: Command) -> Self {
        Self { task_id, command }
    }
}

#[derive(Serialize, Deserialize)]
struct RawOutbound(TaskId, String, Vec<Value>);

impl From<OutboundEnvelope> for RawOutbound {
    fn from(envelope: OutboundEnvelope) -> Self {
        let name = envelope.command.name().to_string();
        Self(envelope.task_id, name, envelope.command.into_args())
    }
}

impl TryFrom<RawOutbound> for OutboundEnvelope {
    type Error = EnvelopeError;

    fn try_from(RawOutbound(task_id, name, args): RawOutbound) -> Result<Self, Self::Error> {
        Ok(Self::new(task_id, Command::from_wire(&name, args)?))
    }
}

/// Payload of one inbound answer: an optional remote error plus values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub error: Option<String>,
    pub args: Vec<Value>,
}

impl Response {
    /// Successful response carrying `args`.
    #[must_use]
    pub const fn ok(args: Vec<Value>) -> Self {
        Self { error: None, args }
    }

    /// Failed response carrying the remote error text.
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the remote error or the returned values.
    ///
    /// # Errors
    /// Returns the remote error text if the native side reported one.
    pub fn into_result(self) -> Result<Vec<Value>, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.args),
        }
    }
}

/// Answer from the native side for a pending task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawInbound", from = "RawInbound")]
pub struct InboundEnvelope {
    pub task_id: TaskId,
    pub response: Response,
}

impl InboundEnvelope {
    #[must_use]
    pub const fn new(task_id: TaskId, response: Response) -> Self {
        Self { task_id, response }
    }
}

#[derive(Serialize, Deserialize)]
struct RawInbound(TaskId, Vec<Value>);

impl From<InboundEnvelope> for RawInbound {
    fn from(envelope: InboundEnvelope) -> Self {
        let Response { error, args } = envelope.response;
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(error.map_or(Value::Null, Value::String));
        values.extend(args);
        Self(envelope.task_id, values)
    }
}

impl From<RawInbound> for InboundEnvelope {
    fn from(RawInbound(task_id, values): RawInbound) -> Self {
        let mut values = values.into_iter();
        let error = match values.next() {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };
        Self::new(
            task_id,
            Response {
                error,
                args: values.collect(),
            },
        )
    }
}
