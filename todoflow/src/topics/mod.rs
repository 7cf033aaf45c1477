//! Topic role registry.
//!
//! Resolves a (role name, direction) pair to the declared topic entry.
//! Lookup is a pure function of the loaded list: first match wins, zero
//! matches fail loudly. Duplicate (name, type) pairs are a configuration
//! smell, not a runtime fault.

use crate::config::{TopicEntry, TopicKind};
use crate::errors::LookupError;

/// Role name of the action source topic.
pub const ROLE_ACTION: &str = "action";
/// Role name of the reaction sink topic.
pub const ROLE_REACTION: &str = "reaction";
/// Role name of the transaction-log sink topic.
pub const ROLE_TX_LOG: &str = "txlog";
/// Property key carrying the broker endpoint address.
pub const PROP_BOOTSTRAP_SERVERS: &str = "bootstrap.servers";

/// Holds the declarative topic list and resolves roles to entries.
#[derive(Debug, Clone)]
pub struct TopicRegistry {
    entries: Vec<TopicEntry>,
}

impl TopicRegistry {
    /// Creates a registry over the configured topic list.
    #[must_use]
    pub fn new(entries: Vec<TopicEntry>) -> Self {
        Self { entries }
    }

    /// Resolves a (role, direction) pair to its topic entry.
    ///
    /// # Errors
    ///
    /// Returns a [`LookupError`] when no entry matches.
    pub fn lookup(&self, name: &str, kind: TopicKind) -> Result<&TopicEntry, LookupError> {
        self.entries
            .iter()
            .find(|entry| entry.kind == kind && entry.name == name)
            .ok_or_else(|| LookupError::new(name, kind))
    }

    /// Returns the declared entries in configuration order.
    #[must_use]
    pub fn entries(&self) -> &[TopicEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> TopicRegistry {
        TopicRegistry::new(vec![
            TopicEntry::new(ROLE_ACTION, TopicKind::Source, "todo-actions"),
            TopicEntry::new(ROLE_REACTION, TopicKind::Sink, "todo-reactions"),
            TopicEntry::new(ROLE_TX_LOG, TopicKind::Sink, "todo-txlog"),
        ])
    }

    #[test]
    fn test_lookup_resolves_role_and_direction() {
        let registry = registry();
        let entry = registry.lookup(ROLE_ACTION, TopicKind::Source).unwrap();
        assert_eq!(entry.topic, "todo-actions");

        let entry = registry.lookup(ROLE_TX_LOG, TopicKind::Sink).unwrap();
        assert_eq!(entry.topic, "todo-txlog");
    }

    #[test]
    fn test_lookup_missing_role_fails() {
        let registry = registry();
        let err = registry.lookup("metrics", TopicKind::Sink).unwrap_err();
        assert_eq!(err.name, "metrics");
        assert_eq!(err.kind, TopicKind::Sink);
    }

    #[test]
    fn test_lookup_wrong_direction_fails() {
        let registry = registry();
        assert!(registry.lookup(ROLE_ACTION, TopicKind::Sink).is_err());
    }

    #[test]
    fn test_lookup_first_match_wins() {
        let registry = TopicRegistry::new(vec![
            TopicEntry::new(ROLE_REACTION, TopicKind::Sink, "first"),
            TopicEntry::new(ROLE_REACTION, TopicKind::Sink, "second"),
        ]);

        let entry = registry.lookup(ROLE_REACTION, TopicKind::Sink).unwrap();
        assert_eq!(entry.topic, "first");
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let registry = registry();
        let a = registry.lookup(ROLE_ACTION, TopicKind::Source).unwrap().clone();
        let b = registry.lookup(ROLE_ACTION, TopicKind::Source).unwrap().clone();
        assert_eq!(a.name, b.name);
        assert_eq!(a.topic, b.topic);
        assert_eq!(a.properties, b.properties);
    }
}
