//! Native side of the command bridge.
//!
//! Provides:
//! - `NativeModule` trait - Implement native commands
//! - `NativeHost` - Route commands to modules and send back their responses
//! - `InProcessBridge` - Host bridge for running both sides in one process
//! - `LocalBroker` - In-memory broker serving the messaging commands

pub mod bridge;
pub mod broker;
pub mod error;
pub mod host;
pub mod module;

pub use bridge::InProcessBridge;
pub use broker::{LocalBroker, Published, topic_matches};
pub use error::HostError;
pub use host::NativeHost;
pub use module::{NativeModule, Reply, Responder, ResponseSink};
