use crc32fast::Hasher;
use serde::Deserialize;

/// Static configuration describing how a SeaORM model is bound to its
/// closure table.
#[derive(Clone, Debug)]
pub struct HierarchyConfig {
    entity_name: String,
    path_name: String,
    path_table: String,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl HierarchyConfig {
    /// Create a new configuration using the logical entity and path entity names.
    pub fn new(entity_name: impl Into<String>, path_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let path_name = path_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &path_name,
        ));

        Self {
            entity_name,
            path_name,
            path_table: String::new(),
            advisory_lock_strategy: default_lock,
        }
    }

    pub(crate) fn apply_options(mut self, options: HierarchyOptions) -> Self {
        if let Some(path_table) = options.path_table {
            // Models sharing a closure table share its lock.
            if self.advisory_lock_strategy.key().is_some() {
                self.advisory_lock_strategy =
                    AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::for_table(&path_table));
            }
            self.path_table = path_table;
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    /// Table backing the closure rows, empty until the derive macro or
    /// [`HierarchyOptions::path_table`] sets it. Also names the advisory lock.
    pub fn path_table(&self) -> &str {
        &self.path_table
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }
}

/// Builder-style overrides, consumed by the derive macro.
///
/// Deserializable so hosts can keep the lock settings in their own config files.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HierarchyOptions {
    path_table: Option<String>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl HierarchyOptions {
    pub fn path_table(mut self, value: impl Into<String>) -> Self {
        self.path_table = Some(value.into());
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: HierarchyConfig) -> HierarchyConfig {
        base.apply_options(self)
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(transparent)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str, path: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(path.as_bytes());
        let crc = hasher.finalize();
        Self(format!("closure-hierarchy::{entity}::{path}::{crc:x}"))
    }

    fn for_table(table: &str) -> Self {
        let crc = crc32fast::hash(table.as_bytes());
        Self(format!("closure-hierarchy::{table}::{crc:x}"))
    }
}

/// How structural mutations serialize against each other.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_key_is_namespaced() {
        let config = HierarchyConfig::new("Tag", "TagPath");
        let key = config.advisory_lock_strategy().key().unwrap().as_str();
        assert!(key.starts_with("closure-hierarchy::Tag::TagPath::"));
    }

    #[test]
    fn path_table_names_the_lock() {
        let tags = HierarchyOptions::default()
            .path_table("tag_paths")
            .apply(HierarchyConfig::new("Tag", "TagPath"));
        let labels = HierarchyOptions::default()
            .path_table("tag_paths")
            .apply(HierarchyConfig::new("Label", "LabelPath"));
        let key = tags.advisory_lock_strategy().key().unwrap();
        assert!(key.as_str().starts_with("closure-hierarchy::tag_paths::"));
        assert_eq!(labels.advisory_lock_strategy().key(), Some(key));
    }

    #[test]
    fn explicit_lock_strategy_wins_over_table() {
        let config = HierarchyOptions::default()
            .path_table("tag_paths")
            .advisory_lock_strategy(AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::new("tags")))
            .apply(HierarchyConfig::new("Tag", "TagPath"));
        assert_eq!(config.advisory_lock_strategy().key().map(AdvisoryLockKey::as_str), Some("tags"));
    }

    #[test]
    fn options_load_from_json() {
        let options: HierarchyOptions = serde_json::from_str(
            r#"{"path_table": "tag_paths", "advisory_lock_strategy": "disabled"}"#,
        )
        .unwrap();
        let config = options.apply(HierarchyConfig::new("Tag", "TagPath"));
        assert_eq!(config.path_table(), "tag_paths");
        assert_eq!(config.advisory_lock_strategy(), &AdvisoryLockStrategy::Disabled);
    }
}
