//! Distribution analytics and assignment health scoring.
use crate::AssignmentBackend;
use crate::config::VersionConfig;
use crate::registry::{RegistryError, VersionConfigRegistry};
use crate::strategy;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Observed vs. expected share for one version id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionShare {
    pub version_id: String,
    pub count: usize,
    pub actual_proportion: f64,
    pub expected_proportion: f64,
    pub deviation: f64,
}

/// Point-in-time distribution report for one base character, derived from
/// the current assignment records. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterAnalytics {
    pub base_character_id: String,
    pub strategy: String,
    pub total_assignments: usize,
    pub shares: Vec<VersionShare>,
    pub mean_absolute_deviation: f64,
}

/// Health score for one base character.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterHealth {
    pub base_character_id: String,
    pub assignments: usize,
    /// 0-100; 100 means the observed distribution matches the expected
    /// one exactly, 0 means no data or total divergence.
    pub score: f64,
}

/// Aggregate health across every registered character.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub characters: Vec<CharacterHealth>,
    pub health_score: f64,
}

/// Errors raised while computing analytics. Missing data is never an
/// error; these cover unknown characters and storage failures only.
#[derive(Debug, Error)]
pub enum AnalyticsError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("assignment backend failure: {0}")]
    Backend(#[source] E),
}

/// Read-only aggregator over the registry and the assignment records.
/// Reports are eventually-consistent snapshots and may run concurrently
/// with new assignments.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsAggregator<'a, B> {
    registry: &'a VersionConfigRegistry,
    backend: &'a B,
}

impl<'a, B: AssignmentBackend> AnalyticsAggregator<'a, B> {
    #[must_use]
    pub const fn new(registry: &'a VersionConfigRegistry, backend: &'a B) -> Self {
        Self { registry, backend }
    }

    /// Observed vs. expected distribution for one base character, scanned
    /// from the sticky assignment records.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::Registry` for an unknown character or
    /// `AnalyticsError::Backend` when the record scan fails.
    pub fn assignment_analytics(
        &self,
        base_character_id: &str,
    ) -> Result<CharacterAnalytics, AnalyticsError<B::Error>> {
        let config = self.registry.get(base_character_id)?;
        let assignments = self
            .backend
            .for_character(base_character_id)
            .map_err(AnalyticsError::Backend)?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for assignment in &assignments {
            *counts.entry(assignment.version_id.as_str()).or_default() += 1;
        }

        Ok(build_analytics(config, &counts, assignments.len()))
    }

    /// Health score per registered character plus the overall mean.
    /// Characters with zero assignments score 0 rather than erroring.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::Backend` when a record scan fails.
    pub fn health_check(&self) -> Result<HealthReport, AnalyticsError<B::Error>> {
        let mut characters = Vec::with_capacity(self.registry.len());
        for config in self.registry {
            let analytics = self.assignment_analytics(&config.base_character_id)?;
            let score = if analytics.total_assignments == 0 {
                0.0
            } else {
                (100.0 * (1.0 - analytics.mean_absolute_deviation)).clamp(0.0, 100.0)
            };
            characters.push(CharacterHealth {
                base_character_id: analytics.base_character_id,
                assignments: analytics.total_assignments,
                score,
            });
        }

        let health_score = if characters.is_empty() {
            0.0
        } else {
            characters.iter().map(|c| c.score).sum::<f64>() / characters.len() as f64
        };
        Ok(HealthReport {
            characters,
            health_score,
        })
    }
}

/// Fold observed counts into per-version shares against the strategy's
/// expected proportions. Shared with the service's draw-based reports.
#[must_use]
pub(crate) fn build_analytics(
    config: &VersionConfig,
    counts: &HashMap<&str, usize>,
    total: usize,
) -> CharacterAnalytics {
    let expected = strategy::expected_proportions(config);
    let mut shares = Vec::with_capacity(expected.len());
    let mut deviation_sum = 0.0;
    for (version_id, expected_proportion) in expected {
        let count = counts.get(version_id.as_str()).copied().unwrap_or(0);
        let actual_proportion = if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        };
        let deviation = (actual_proportion - expected_proportion).abs();
        deviation_sum += deviation;
        shares.push(VersionShare {
            version_id,
            count,
            actual_proportion,
            expected_proportion,
            deviation,
        });
    }

    let mean_absolute_deviation = if shares.is_empty() {
        0.0
    } else {
        deviation_sum / shares.len() as f64
    };
    CharacterAnalytics {
        base_character_id: config.base_character_id.clone(),
        strategy: config.strategy.kind().to_string(),
        total_assignments: total,
        shares,
        mean_absolute_deviation,
    }
}
