//! Per-call connection, message and subscription options.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MessagingConfig;

/// Broker login and connection settings for one call.
///
/// `username` and `password` are tri-state: `None` means "use the module
/// default", any string (even an empty one) is sent verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Prepended to the derived client id; never forwarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_prefix: Option<String>,
    /// Always derived during login completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Last-will message registered with the broker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will: Option<Value>,
    /// Any further broker connection option.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_id_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn will(mut self, will: Value) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Fill in the login information the broker needs.
    ///
    /// Missing credentials fall back to the configured defaults. The client
    /// id is rebuilt from the machine id, the optional prefix and, when the
    /// effective username is non-empty, a `|username` suffix, so that
    /// processes sharing a machine id get distinct broker identities.
    #[must_use]
    pub fn complete_login(mut self, config: &MessagingConfig) -> Self {
        if self.username.is_none() {
            self.username.clone_from(&config.username);
        }
        if self.password.is_none() {
            self.password.clone_from(&config.password);
        }

        let mut client_id = self.client_id_prefix.take().unwrap_or_default();
        client_id.push_str(config.machine_id.as_deref().unwrap_or_default());

        if client_id.is_empty() {
            self.client_id = None;
        } else {
            if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
                client_id.push('|');
                client_id.push_str(username);
            }
            self.client_id = Some(client_id);
        }
        self
    }

    /// Bookkeeping key for the session these options log in with.
    #[must_use]
    pub fn session_key(&self) -> SessionKey {
        SessionKey(format!(
            "{}|{}|{}",
            self.username.as_deref().unwrap_or_default(),
            self.password.as_deref().unwrap_or_default(),
            self.client_id.as_deref().unwrap_or_default(),
        ))
    }
}

/// `username|password|clientId`; identifies a broker session locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Publish metadata.
///
/// The two prefix flags steer topic rewriting and are never serialized;
/// everything else (`qos`, `retain`, ...) is passed to the broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOptions {
    #[serde(default, skip_serializing)]
    pub prepend_engine_topic: bool,
    #[serde(default, skip_serializing)]
    pub prepend_base_topic: bool,
    #[serde(flatten)]
    pub transport: Map<String, Value>,
}

impl MessageOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish below `{base}engine/{machineId}/`.
    #[must_use]
    pub const fn prepend_engine_topic(mut self) -> Self {
        self.prepend_engine_topic = true;
        self
    }

    /// Publish below `{base}`.
    #[must_use]
    pub const fn prepend_base_topic(mut self) -> Self {
        self.prepend_base_topic = true;
        self
    }

    #[must_use]
    pub fn qos(self, qos: u8) -> Self {
        self.option("qos", qos)
    }

    #[must_use]
    pub fn retain(self, retain: bool) -> Self {
        self.option("retain", retain)
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.transport.insert(key.into(), value.into());
        self
    }
}

/// Broker subscription options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    /// Set by the subsystem to the subscription's task id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubscriptionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn qos(self, qos: u8) -> Self {
        self.option("qos", qos)
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}
