//! Publish/subscribe messaging for the native command bridge.
//!
//! Provides:
//! - `Messaging` - Publish, connect and subscribe through the dispatcher
//! - `MessagingConfig` - Broker defaults applied to every call
//! - Option types forwarded to the broker
//! - Topic prefix helpers

pub mod config;
pub mod messaging;
pub mod options;
pub mod subscriptions;
pub mod topic;

pub use config::MessagingConfig;
pub use messaging::{Messaging, MessagingError, Outcome};
pub use options::{ConnectionOptions, MessageOptions, SessionKey, SubscriptionOptions};
pub use subscriptions::{CallbackId, MessageCallback, SubscriptionKey, SubscriptionRegistry};
