//! Strategy draw logic
//!
//! `draw` is a pure function of the config, the user id, and the supplied
//! RNG: the same RNG state always yields the same version id, which keeps
//! distribution tests reproducible.
use crate::config::{StrategyConfig, VersionConfig};
use rand::Rng;
use thiserror::Error;

/// Errors raised while drawing a version id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("character '{0}' has no versions to draw from")]
    EmptyVersionSet(String),
    #[error("manual strategy has no assignment for user '{user}' on character '{base}'")]
    NoManualAssignment { user: String, base: String },
}

/// Draw a version id for `user_id` according to the config's strategy.
///
/// Weighted draws partition [0, 1) into contiguous sub-intervals in
/// `available_version_ids` order; a roll landing exactly on a boundary
/// belongs to the later interval.
///
/// # Errors
///
/// Returns `DrawError::NoManualAssignment` when a manual strategy has no
/// entry for the user (callers fall back to the default version id), or
/// `DrawError::EmptyVersionSet` for a config that was never validated.
pub fn draw<'a, R: Rng>(
    config: &'a VersionConfig,
    user_id: &str,
    rng: &mut R,
) -> Result<&'a str, DrawError> {
    if config.available_version_ids.is_empty() {
        return Err(DrawError::EmptyVersionSet(
            config.base_character_id.clone(),
        ));
    }

    match &config.strategy {
        StrategyConfig::Weighted { weights } => {
            let roll = rng.gen_range(0.0..1.0);
            let mut cumulative = 0.0;
            for id in &config.available_version_ids {
                cumulative += weights.get(id).copied().unwrap_or(0.0);
                if roll < cumulative {
                    return Ok(id);
                }
            }
            // Rounding can leave the total fractionally below 1.0; the
            // final interval absorbs the remainder.
            Ok(last_id(config))
        }
        StrategyConfig::Random => {
            let idx = rng.gen_range(0..config.available_version_ids.len());
            Ok(&config.available_version_ids[idx])
        }
        StrategyConfig::Manual { assignments } => assignments
            .get(user_id)
            .map(String::as_str)
            .ok_or_else(|| DrawError::NoManualAssignment {
                user: user_id.to_string(),
                base: config.base_character_id.clone(),
            }),
        StrategyConfig::Experiment {
            control_id,
            test_id,
            split,
        } => {
            let roll = rng.gen_range(0.0..1.0);
            if roll < *split {
                Ok(control_id)
            } else {
                Ok(test_id)
            }
        }
    }
}

fn last_id(config: &VersionConfig) -> &str {
    config
        .available_version_ids
        .last()
        .map_or(config.default_version_id.as_str(), String::as_str)
}

/// Expected long-run proportions per version id, in available order.
///
/// Weighted strategies report their configured weights; random reports a
/// uniform split; experiment reports the control/test split. Manual has no
/// configured target distribution and reports a uniform split.
#[must_use]
pub fn expected_proportions(config: &VersionConfig) -> Vec<(String, f64)> {
    let ids = &config.available_version_ids;
    match &config.strategy {
        StrategyConfig::Weighted { weights } => ids
            .iter()
            .map(|id| (id.clone(), weights.get(id).copied().unwrap_or(0.0)))
            .collect(),
        StrategyConfig::Random | StrategyConfig::Manual { .. } => {
            let share = 1.0 / ids.len() as f64;
            ids.iter().map(|id| (id.clone(), share)).collect()
        }
        StrategyConfig::Experiment {
            control_id,
            test_id,
            split,
        } => ids
            .iter()
            .map(|id| {
                let share = if id == control_id {
                    *split
                } else if id == test_id {
                    1.0 - *split
                } else {
                    0.0
                };
                (id.clone(), share)
            })
            .collect(),
    }
}
