//! Topic prefix conventions.

use crate::{MessageOptions, MessagingConfig};

/// Namespace used when no base topic is configured.
pub const DEFAULT_NAMESPACE: &str = "proceed-pms";

/// The namespace every prefixed topic starts with, including its trailing `/`.
#[must_use]
pub fn namespace(base_topic: Option<&str>) -> String {
    let base = base_topic.unwrap_or_default().trim_end_matches('/');
    let base = if base.is_empty() { DEFAULT_NAMESPACE } else { base };
    format!("{base}/")
}

/// `{namespace}engine/{machineId}/{topic}`
#[must_use]
pub fn engine_topic(config: &MessagingConfig, topic: &str) -> String {
    format!(
        "{}engine/{}/{topic}",
        namespace(config.base_topic.as_deref()),
        config.machine_id.as_deref().unwrap_or_default()
    )
}

/// `{namespace}{topic}`
#[must_use]
pub fn base_topic(config: &MessagingConfig, topic: &str) -> String {
    format!("{}{topic}", namespace(config.base_topic.as_deref()))
}

/// Apply at most one prefix rule; the engine prefix takes precedence.
#[must_use]
pub fn resolve(options: &MessageOptions, config: &MessagingConfig, topic: &str) -> String {
    if options.prepend_engine_topic {
        engine_topic(config, topic)
    } else if options.prepend_base_topic {
        base_topic(config, topic)
    } else {
        topic.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MessagingConfig {
        MessagingConfig::new()
            .machine_id("engineId")
            .base_topic("base-topic")
    }

    #[test]
    fn test_engine_prefix() {
        let options = MessageOptions::new().prepend_engine_topic();
        assert_eq!(
            resolve(&options, &config(), "test/123"),
            "base-topic/engine/engineId/test/123"
        );
    }

    #[test]
    fn test_base_prefix() {
        let options = MessageOptions::new().prepend_base_topic();
        assert_eq!(resolve(&options, &config(), "test/123"), "base-topic/test/123");
    }

    #[test]
    fn test_engine_prefix_wins() {
        let options = MessageOptions::new()
            .prepend_base_topic()
            .prepend_engine_topic();
        assert_eq!(
            resolve(&options, &config(), "a"),
            "base-topic/engine/engineId/a"
        );
    }

    #[test]
    fn test_no_prefix() {
        assert_eq!(resolve(&MessageOptions::new(), &config(), "test/123"), "test/123");
    }

    #[test]
    fn test_namespace_normalization() {
        assert_eq!(namespace(Some("base-topic/")), "base-topic/");
        assert_eq!(namespace(Some("")), "proceed-pms/");
        assert_eq!(namespace(None), "proceed-pms/");

        let config = MessagingConfig::new().machine_id("engineId");
        assert_eq!(
            engine_topic(&config, "status"),
            "proceed-pms/engine/engineId/status"
        );
    }
}
