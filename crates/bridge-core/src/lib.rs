//! Core abstractions for the native command bridge.
//!
//! This crate provides the fundamental building blocks:
//! - `TaskId`, `Command` and the inbound/outbound envelopes
//! - `CorrelationRegistry` - pending task handlers and their continuation
//! - `Transport` trait and the `Channel` binding it to a registry
//! - `Dispatcher` - the `command_request`/`command_response` handle
//! - `MemoryTransport` - in-memory transport for tests and wiring

pub mod channel;
pub mod dispatcher;
pub mod envelope;
pub mod memory;
pub mod registry;
pub mod traits;

pub use channel::Channel;
pub use dispatcher::{DispatchError, Dispatcher, PendingResponse, RemoteError};
pub use envelope::{
    Command, CommandKind, EnvelopeError, InboundEnvelope, OutboundEnvelope, Response, TaskId,
};
pub use memory::MemoryTransport;
pub use registry::{Continuation, CorrelationRegistry, ResponseHandler};
pub use traits::{InboundSink, Transport, TransportError};
