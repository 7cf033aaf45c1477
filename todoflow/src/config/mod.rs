//! Pipeline configuration types.
//!
//! The configuration document is loaded once at process start and stays
//! immutable for the process lifetime. See [`load`] for the resolution
//! order between the file argument, the environment, and the bundled
//! default resource.

mod load;

pub use load::{load, ENV_CONFIG};

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Direction of a declared topic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicKind {
    /// Records are consumed from this topic.
    Source,
    /// Records are published to this topic.
    Sink,
}

impl std::fmt::Display for TopicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "SOURCE"),
            Self::Sink => write!(f, "SINK"),
        }
    }
}

/// One declared endpoint: a named, typed topic with transport properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicEntry {
    /// Role identifier, e.g. "action", "reaction", "txlog".
    pub name: String,
    /// Whether records are consumed from or published to the topic.
    #[serde(rename = "type")]
    pub kind: TopicKind,
    /// Physical transport topic name.
    pub topic: String,
    /// Transport connection and tuning properties, copied verbatim into
    /// the endpoint.
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Delivery-guarantee override; at-least-once when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<String>,
}

impl TopicEntry {
    /// Creates a new topic entry without properties.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TopicKind, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            topic: topic.into(),
            properties: HashMap::new(),
            semantic: None,
        }
    }

    /// Adds a transport property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the delivery-guarantee override.
    #[must_use]
    pub fn with_semantic(mut self, semantic: impl Into<String>) -> Self {
        self.semantic = Some(semantic.into());
        self
    }
}

/// Consistency mode for checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointMode {
    /// Every record affects state exactly once across restarts.
    ExactlyOnce,
    /// Records may be reprocessed after a restart.
    AtLeastOnce,
}

/// Periodic checkpointing policy.
///
/// The policy is inert unless `enabled` is true: no snapshotting occurs
/// and no interval is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// Whether checkpointing is active at all.
    pub enabled: bool,
    /// Consistency mode.
    pub mode: CheckpointMode,
    /// Checkpoint timeout in milliseconds; a checkpoint exceeding this
    /// bound is abandoned.
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
    /// Target spacing between checkpoint starts, in milliseconds.
    #[serde(rename = "intervalMs")]
    pub interval_ms: u64,
    /// Hard floor between the end of one checkpoint and the start of the
    /// next, in milliseconds.
    #[serde(rename = "pauseMs")]
    pub pause_ms: u64,
    /// Maximum checkpoints in flight simultaneously.
    pub concurrent: usize,
    /// If true, retained snapshots survive pipeline cancellation.
    pub externalization: bool,
}

impl CheckpointPolicy {
    /// Checkpoint timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checkpoint interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Minimum inter-checkpoint pause as a [`Duration`].
    #[must_use]
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Root configuration for one pipeline process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Declared topic entries, in configuration order.
    pub topics: Vec<TopicEntry>,
    /// Optional checkpointing policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpointing: Option<CheckpointPolicy>,
    /// Parallelism for the terminal stage.
    #[serde(default = "default_scale")]
    pub scale: usize,
}

fn default_scale() -> usize {
    1
}

impl PipelineConfig {
    /// Parses a configuration document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the document does not parse or
    /// a required topic role is absent.
    pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every required topic role is declared.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingRole`] for the first missing
    /// role.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, kind) in [
            (crate::topics::ROLE_ACTION, TopicKind::Source),
            (crate::topics::ROLE_REACTION, TopicKind::Sink),
            (crate::topics::ROLE_TX_LOG, TopicKind::Sink),
        ] {
            if !self
                .topics
                .iter()
                .any(|t| t.name == name && t.kind == kind)
            {
                return Err(ConfigurationError::MissingRole {
                    name: name.to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Returns the checkpoint policy if one is configured.
    #[must_use]
    pub fn checkpointing(&self) -> Option<&CheckpointPolicy> {
        self.checkpointing.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal_doc() -> &'static str {
        r#"{
            "topics": [
                {"name": "action", "type": "SOURCE", "topic": "todo-actions",
                 "properties": {"bootstrap.servers": "broker:9092"}},
                {"name": "reaction", "type": "SINK", "topic": "todo-reactions",
                 "properties": {"bootstrap.servers": "broker:9092"}},
                {"name": "txlog", "type": "SINK", "topic": "todo-txlog",
                 "properties": {"bootstrap.servers": "broker:9092"},
                 "semantic": "EXACTLY_ONCE"}
            ]
        }"#
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = PipelineConfig::from_json(minimal_doc()).unwrap();
        assert_eq!(config.topics.len(), 3);
        assert_eq!(config.scale, 1);
        assert!(config.checkpointing.is_none());
        assert_eq!(config.topics[0].kind, TopicKind::Source);
        assert_eq!(
            config.topics[2].semantic.as_deref(),
            Some("EXACTLY_ONCE")
        );
    }

    #[test]
    fn test_parse_checkpoint_policy() {
        let doc = r#"{
            "topics": [
                {"name": "action", "type": "SOURCE", "topic": "a"},
                {"name": "reaction", "type": "SINK", "topic": "r"},
                {"name": "txlog", "type": "SINK", "topic": "t"}
            ],
            "checkpointing": {
                "enabled": true,
                "mode": "EXACTLY_ONCE",
                "timeoutMs": 60000,
                "intervalMs": 10000,
                "pauseMs": 5000,
                "concurrent": 1,
                "externalization": true
            },
            "scale": 3
        }"#;

        let config = PipelineConfig::from_json(doc).unwrap();
        assert_eq!(config.scale, 3);

        let policy = config.checkpointing().unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.mode, CheckpointMode::ExactlyOnce);
        assert_eq!(policy.timeout(), Duration::from_secs(60));
        assert_eq!(policy.interval(), Duration::from_secs(10));
        assert_eq!(policy.pause(), Duration::from_secs(5));
        assert_eq!(policy.concurrent, 1);
        assert!(policy.externalization);
    }

    #[test]
    fn test_missing_role_is_rejected() {
        let doc = r#"{
            "topics": [
                {"name": "action", "type": "SOURCE", "topic": "a"},
                {"name": "reaction", "type": "SINK", "topic": "r"}
            ]
        }"#;

        let err = PipelineConfig::from_json(doc).unwrap_err();
        assert!(err.to_string().contains("txlog"));
    }

    #[test]
    fn test_role_direction_matters() {
        // A txlog declared as SOURCE does not satisfy the SINK requirement.
        let doc = r#"{
            "topics": [
                {"name": "action", "type": "SOURCE", "topic": "a"},
                {"name": "reaction", "type": "SINK", "topic": "r"},
                {"name": "txlog", "type": "SOURCE", "topic": "t"}
            ]
        }"#;

        assert!(PipelineConfig::from_json(doc).is_err());
    }

    #[test]
    fn test_unparseable_document() {
        assert!(PipelineConfig::from_json("{not json").is_err());
    }
}
