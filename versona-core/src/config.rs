//! Version configuration and catalog loading
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use thiserror::Error;

/// Version id sets stay inline for the common two-to-four variant case.
pub type VersionIdSet = SmallVec<[String; 4]>;

/// Allowed drift when checking that weighted probabilities sum to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Assignment strategy attached to a base character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Weighted draw over the available version ids.
    Weighted { weights: HashMap<String, f64> },
    /// Uniform draw over the available version ids.
    Random,
    /// Fixed per-user routing; users without an entry fall back to the
    /// default version id.
    Manual { assignments: HashMap<String, String> },
    /// Two-arm experiment: rolls below `split` land on the control arm.
    Experiment {
        control_id: String,
        test_id: String,
        split: f64,
    },
}

impl StrategyConfig {
    /// Stable lowercase name recorded on assignments and events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Weighted { .. } => "weighted",
            Self::Random => "random",
            Self::Manual { .. } => "manual",
            Self::Experiment { .. } => "experiment",
        }
    }
}

/// Complete version routing configuration for one base character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConfig {
    pub base_character_id: String,
    pub available_version_ids: VersionIdSet,
    pub default_version_id: String,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VersionConfigEntry {
    pub available_version_ids: VersionIdSet,
    pub default_version_id: String,
    pub strategy: StrategyConfig,
}

impl VersionConfig {
    #[must_use]
    fn with_id(id: String, entry: VersionConfigEntry) -> Self {
        Self {
            base_character_id: id,
            available_version_ids: entry.available_version_ids,
            default_version_id: entry.default_version_id,
            strategy: entry.strategy,
        }
    }

    /// Check every structural invariant before the config is allowed to
    /// route live traffic.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the version set is empty or duplicated,
    /// the default id is not available, weighted keys do not match the
    /// available set exactly, weights do not sum to 1.0, or the manual /
    /// experiment parameters reference unknown versions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_version_set()?;
        self.validate_default()?;
        self.validate_strategy()
    }

    fn validate_version_set(&self) -> Result<(), ConfigError> {
        if self.available_version_ids.is_empty() {
            return Err(ConfigError::EmptyVersionSet {
                base: self.base_character_id.clone(),
            });
        }
        for (idx, id) in self.available_version_ids.iter().enumerate() {
            if self.available_version_ids[..idx].contains(id) {
                return Err(ConfigError::DuplicateVersionId {
                    base: self.base_character_id.clone(),
                    version: id.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_default(&self) -> Result<(), ConfigError> {
        if self.is_available(&self.default_version_id) {
            Ok(())
        } else {
            Err(ConfigError::DefaultNotAvailable {
                base: self.base_character_id.clone(),
                default: self.default_version_id.clone(),
            })
        }
    }

    fn validate_strategy(&self) -> Result<(), ConfigError> {
        match &self.strategy {
            StrategyConfig::Weighted { weights } => self.validate_weights(weights),
            StrategyConfig::Random => Ok(()),
            StrategyConfig::Manual { assignments } => {
                for (user, version) in assignments {
                    if !self.is_available(version) {
                        return Err(ConfigError::ManualTargetUnknown {
                            base: self.base_character_id.clone(),
                            user: user.clone(),
                            version: version.clone(),
                        });
                    }
                }
                Ok(())
            }
            StrategyConfig::Experiment {
                control_id,
                test_id,
                split,
            } => {
                for arm in [control_id, test_id] {
                    if !self.is_available(arm) {
                        return Err(ConfigError::ExperimentArmUnknown {
                            base: self.base_character_id.clone(),
                            version: arm.clone(),
                        });
                    }
                }
                if !(0.0..=1.0).contains(split) {
                    return Err(ConfigError::SplitOutOfRange {
                        base: self.base_character_id.clone(),
                        split: *split,
                    });
                }
                Ok(())
            }
        }
    }

    fn validate_weights(&self, weights: &HashMap<String, f64>) -> Result<(), ConfigError> {
        for id in weights.keys() {
            if !self.is_available(id) {
                return Err(ConfigError::WeightKeyUnknown {
                    base: self.base_character_id.clone(),
                    version: id.clone(),
                });
            }
        }
        let mut sum = 0.0;
        for id in &self.available_version_ids {
            let Some(weight) = weights.get(id) else {
                return Err(ConfigError::WeightKeyMissing {
                    base: self.base_character_id.clone(),
                    version: id.clone(),
                });
            };
            if !(0.0..=1.0).contains(weight) {
                return Err(ConfigError::WeightOutOfRange {
                    base: self.base_character_id.clone(),
                    version: id.clone(),
                    weight: *weight,
                });
            }
            sum += weight;
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum {
                base: self.base_character_id.clone(),
                sum,
            });
        }
        Ok(())
    }

    /// Whether `version_id` belongs to the available set.
    #[must_use]
    pub fn is_available(&self, version_id: &str) -> bool {
        self.available_version_ids
            .iter()
            .any(|id| id == version_id)
    }
}

/// Errors raised when a version configuration violates its invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("character '{base}' has no available version ids")]
    EmptyVersionSet { base: String },
    #[error("character '{base}' lists version '{version}' more than once")]
    DuplicateVersionId { base: String, version: String },
    #[error("default version '{default}' is not available for character '{base}'")]
    DefaultNotAvailable { base: String, default: String },
    #[error("weight entry '{version}' is not an available version for character '{base}'")]
    WeightKeyUnknown { base: String, version: String },
    #[error("available version '{version}' has no weight entry for character '{base}'")]
    WeightKeyMissing { base: String, version: String },
    #[error("weight for version '{version}' of character '{base}' must be within [0, 1] (got {weight})")]
    WeightOutOfRange {
        base: String,
        version: String,
        weight: f64,
    },
    #[error("weights for character '{base}' sum to {sum} instead of 1.0")]
    WeightSum { base: String, sum: f64 },
    #[error("experiment split for character '{base}' must be within [0, 1] (got {split})")]
    SplitOutOfRange { base: String, split: f64 },
    #[error("experiment arm '{version}' is not an available version for character '{base}'")]
    ExperimentArmUnknown { base: String, version: String },
    #[error("manual assignment for user '{user}' targets unavailable version '{version}' of character '{base}'")]
    ManualTargetUnknown {
        base: String,
        user: String,
        version: String,
    },
    #[error("version '{version}' is not available for character '{base}'")]
    UnknownVersion { base: String, version: String },
}

/// Catalog of version configs as loaded from a JSON document keyed by
/// base character id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterCatalog(pub Vec<VersionConfig>);

impl CharacterCatalog {
    #[must_use]
    pub const fn empty() -> Self {
        Self(vec![])
    }

    /// Load a catalog from a JSON string.
    ///
    /// Entries are ordered by base character id so repeated loads of the
    /// same document produce the same registry order.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into catalog entries.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let map: HashMap<String, VersionConfigEntry> = serde_json::from_str(json)?;
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        let mut configs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = map.get(&id) {
                configs.push(VersionConfig::with_id(id, entry.clone()));
            }
        }
        Ok(Self(configs))
    }

    #[must_use]
    pub fn get_by_id(&self, base_character_id: &str) -> Option<&VersionConfig> {
        self.0
            .iter()
            .find(|config| config.base_character_id == base_character_id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VersionConfig> {
        self.0.iter()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a CharacterCatalog {
    type Item = &'a VersionConfig;
    type IntoIter = std::slice::Iter<'a, VersionConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted_config(weights: &[(&str, f64)]) -> VersionConfig {
        VersionConfig {
            base_character_id: "plato".to_string(),
            available_version_ids: weights.iter().map(|(id, _)| (*id).to_string()).collect(),
            default_version_id: weights[0].0.to_string(),
            strategy: StrategyConfig::Weighted {
                weights: weights
                    .iter()
                    .map(|(id, w)| ((*id).to_string(), *w))
                    .collect(),
            },
        }
    }

    #[test]
    fn weighted_config_validates() {
        let config = weighted_config(&[("base", 0.6), ("enhanced", 0.4)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn weight_sum_must_be_one() {
        let config = weighted_config(&[("base", 0.6), ("enhanced", 0.5)]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightSum { .. })
        ));
    }

    #[test]
    fn weight_sum_tolerates_rounding() {
        let config = weighted_config(&[("base", 0.3), ("enhanced", 0.3), ("terse", 0.4)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_must_be_available() {
        let mut config = weighted_config(&[("base", 1.0)]);
        config.default_version_id = "enhanced".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::DefaultNotAvailable {
                base: "plato".to_string(),
                default: "enhanced".to_string(),
            })
        );
    }

    #[test]
    fn weight_keys_must_match_available_set() {
        let mut config = weighted_config(&[("base", 0.6), ("enhanced", 0.4)]);
        if let StrategyConfig::Weighted { weights } = &mut config.strategy {
            weights.remove("enhanced");
            weights.insert("mystery".to_string(), 0.4);
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightKeyUnknown { .. })
        ));

        let mut missing = weighted_config(&[("base", 1.0)]);
        missing.available_version_ids.push("enhanced".to_string());
        assert!(matches!(
            missing.validate(),
            Err(ConfigError::WeightKeyMissing { .. })
        ));
    }

    #[test]
    fn empty_version_set_rejected() {
        let config = VersionConfig {
            base_character_id: "plato".to_string(),
            available_version_ids: VersionIdSet::new(),
            default_version_id: "base".to_string(),
            strategy: StrategyConfig::Random,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyVersionSet { .. })
        ));
    }

    #[test]
    fn duplicate_version_ids_rejected() {
        let config = VersionConfig {
            base_character_id: "plato".to_string(),
            available_version_ids: ["base", "base"].iter().map(ToString::to_string).collect(),
            default_version_id: "base".to_string(),
            strategy: StrategyConfig::Random,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateVersionId { .. })
        ));
    }

    #[test]
    fn experiment_parameters_checked() {
        let config = VersionConfig {
            base_character_id: "pratchett".to_string(),
            available_version_ids: ["base", "witty"].iter().map(ToString::to_string).collect(),
            default_version_id: "base".to_string(),
            strategy: StrategyConfig::Experiment {
                control_id: "base".to_string(),
                test_id: "witty".to_string(),
                split: 1.5,
            },
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SplitOutOfRange { .. })
        ));

        let bad_arm = VersionConfig {
            strategy: StrategyConfig::Experiment {
                control_id: "base".to_string(),
                test_id: "nonexistent".to_string(),
                split: 0.5,
            },
            ..config
        };
        assert!(matches!(
            bad_arm.validate(),
            Err(ConfigError::ExperimentArmUnknown { .. })
        ));
    }

    #[test]
    fn manual_targets_checked() {
        let config = VersionConfig {
            base_character_id: "plato".to_string(),
            available_version_ids: ["base"].iter().map(ToString::to_string).collect(),
            default_version_id: "base".to_string(),
            strategy: StrategyConfig::Manual {
                assignments: std::iter::once((
                    "u1".to_string(),
                    "enhanced".to_string(),
                ))
                .collect(),
            },
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ManualTargetUnknown { .. })
        ));
    }

    #[test]
    fn catalog_parses_and_orders_entries() {
        let json = r#"{
            "pratchett": {
                "available_version_ids": ["base"],
                "default_version_id": "base",
                "strategy": { "kind": "random" }
            },
            "plato": {
                "available_version_ids": ["base", "enhanced"],
                "default_version_id": "base",
                "strategy": {
                    "kind": "weighted",
                    "weights": { "base": 0.6, "enhanced": 0.4 }
                }
            }
        }"#;

        let catalog = CharacterCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);
        let ids: Vec<_> = catalog
            .iter()
            .map(|c| c.base_character_id.as_str())
            .collect();
        assert_eq!(ids, vec!["plato", "pratchett"]);

        let plato = catalog.get_by_id("plato").unwrap();
        assert_eq!(plato.strategy.kind(), "weighted");
        assert_eq!(plato.default_version_id, "base");
    }

    #[test]
    fn strategy_round_trips_through_json() {
        let config = VersionConfig {
            base_character_id: "pratchett".to_string(),
            available_version_ids: ["base", "witty"].iter().map(ToString::to_string).collect(),
            default_version_id: "base".to_string(),
            strategy: StrategyConfig::Experiment {
                control_id: "base".to_string(),
                test_id: "witty".to_string(),
                split: 0.5,
            },
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: VersionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
