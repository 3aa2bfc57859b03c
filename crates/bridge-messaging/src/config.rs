//! Messaging configuration.

use serde::{Deserialize, Serialize};

/// Broker defaults applied by the messaging subsystem.
///
/// Deserializes from the engine's camelCase JSON configuration; every field
/// is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessagingConfig {
    /// Broker used when a call does not name one.
    pub address: Option<String>,
    /// Login used when a call's connection options leave it unset.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Identity of this machine, the base of every derived client id.
    pub machine_id: Option<String>,
    /// Namespace prepended to prefixed topics.
    pub base_topic: Option<String>,
}

impl MessagingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
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
    pub fn machine_id(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = Some(machine_id.into());
        self
    }

    #[must_use]
    pub fn base_topic(mut self, base_topic: impl Into<String>) -> Self {
        self.base_topic = Some(base_topic.into());
        self
    }

    /// Pick the broker for a call: the override if given, else the default.
    ///
    /// Empty strings count as absent.
    #[must_use]
    pub fn resolve_address(&self, override_url: Option<&str>) -> Option<String> {
        override_url
            .filter(|url| !url.is_empty())
            .or_else(|| self.address.as_deref().filter(|url| !url.is_empty()))
            .map(str::to_string)
    }
}
