//! Registry of version configs, one per base character.
//!
//! The registry is an explicitly constructed value owned by the host
//! process and handed to the assignment service; there is no process-wide
//! singleton. Replacing a config is an ordinary `register` call.
use crate::config::{CharacterCatalog, ConfigError, VersionConfig};
use thiserror::Error;

/// Errors raised when a lookup names an unregistered character.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no version config registered for character '{0}'")]
    UnknownCharacter(String),
}

/// Holds the validated version configs in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionConfigRegistry {
    configs: Vec<VersionConfig>,
}

impl VersionConfigRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            configs: Vec::new(),
        }
    }

    /// Build a registry from a parsed catalog, validating every entry.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` encountered; a catalog with any
    /// invalid entry registers nothing.
    pub fn from_catalog(catalog: &CharacterCatalog) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for config in catalog {
            registry.register(config.clone())?;
        }
        Ok(registry)
    }

    /// Validate and store a config, replacing any existing config for the
    /// same base character.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when validation fails; the registry is left
    /// unchanged in that case.
    pub fn register(&mut self, config: VersionConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(existing) = self
            .configs
            .iter_mut()
            .find(|c| c.base_character_id == config.base_character_id)
        {
            *existing = config;
        } else {
            self.configs.push(config);
        }
        Ok(())
    }

    /// Look up the config for a base character.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownCharacter` when no config is
    /// registered under that id.
    pub fn get(&self, base_character_id: &str) -> Result<&VersionConfig, RegistryError> {
        self.configs
            .iter()
            .find(|c| c.base_character_id == base_character_id)
            .ok_or_else(|| RegistryError::UnknownCharacter(base_character_id.to_string()))
    }

    #[must_use]
    pub fn contains(&self, base_character_id: &str) -> bool {
        self.get(base_character_id).is_ok()
    }

    /// Registered base character ids in registration order.
    #[must_use]
    pub fn character_ids(&self) -> Vec<&str> {
        self.configs
            .iter()
            .map(|c| c.base_character_id.as_str())
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VersionConfig> {
        self.configs.iter()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl<'a> IntoIterator for &'a VersionConfigRegistry {
    type Item = &'a VersionConfig;
    type IntoIter = std::slice::Iter<'a, VersionConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;

    fn random_config(base: &str, versions: &[&str]) -> VersionConfig {
        VersionConfig {
            base_character_id: base.to_string(),
            available_version_ids: versions.iter().map(ToString::to_string).collect(),
            default_version_id: versions[0].to_string(),
            strategy: StrategyConfig::Random,
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = VersionConfigRegistry::new();
        registry
            .register(random_config("plato", &["base", "enhanced"]))
            .unwrap();

        assert!(registry.contains("plato"));
        assert_eq!(registry.get("plato").unwrap().default_version_id, "base");
        assert_eq!(
            registry.get("socrates"),
            Err(RegistryError::UnknownCharacter("socrates".to_string()))
        );
    }

    #[test]
    fn register_replaces_existing_config() {
        let mut registry = VersionConfigRegistry::new();
        registry
            .register(random_config("plato", &["base"]))
            .unwrap();
        registry
            .register(random_config("plato", &["base", "enhanced"]))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("plato").unwrap().available_version_ids.len(),
            2
        );
    }

    #[test]
    fn register_rejects_invalid_config() {
        let mut registry = VersionConfigRegistry::new();
        let mut config = random_config("plato", &["base"]);
        config.default_version_id = "missing".to_string();

        assert!(registry.register(config).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn from_catalog_preserves_catalog_order() {
        let json = r#"{
            "plato": {
                "available_version_ids": ["base"],
                "default_version_id": "base",
                "strategy": { "kind": "random" }
            },
            "austen": {
                "available_version_ids": ["base"],
                "default_version_id": "base",
                "strategy": { "kind": "random" }
            }
        }"#;
        let catalog = CharacterCatalog::from_json(json).unwrap();
        let registry = VersionConfigRegistry::from_catalog(&catalog).unwrap();
        assert_eq!(registry.character_ids(), vec!["austen", "plato"]);
    }
}
