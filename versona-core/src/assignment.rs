//! Sticky assignment records and the store that guards them.
use crate::AssignmentBackend;
use crate::config::{ConfigError, VersionConfig};
use crate::strategy::{self, DrawError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use thiserror::Error;

/// Strategy name recorded when an operator overrides an assignment.
pub const STRATEGY_MANUAL_OVERRIDE: &str = "manual_override";

/// Key identifying one user's sticky assignment for one base character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub user_id: String,
    pub base_character_id: String,
}

impl AssignmentKey {
    #[must_use]
    pub fn new(user_id: &str, base_character_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            base_character_id: base_character_id.to_string(),
        }
    }
}

/// A persisted user-to-version assignment. Immutable once created except
/// through the explicit reassignment path, which sets `reassigned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub user_id: String,
    pub base_character_id: String,
    pub version_id: String,
    pub assigned_at: DateTime<Utc>,
    pub strategy_used: String,
    #[serde(default)]
    pub reassigned: bool,
}

impl Assignment {
    #[must_use]
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(&self.user_id, &self.base_character_id)
    }
}

/// Result of a `get_or_create` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentOutcome {
    pub assignment: Assignment,
    /// Whether this call created the assignment (as opposed to returning
    /// an existing sticky record, including one another caller just won).
    pub created: bool,
    /// Whether a manual-strategy miss fell back to the default version.
    pub used_default: bool,
}

/// Result of an explicit reassignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Reassignment {
    pub assignment: Assignment,
    pub previous_version_id: String,
}

/// Errors raised by the assignment store.
#[derive(Debug, Error)]
pub enum StoreError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("no assignment exists for user '{user}' on character '{base}'")]
    NotFound { user: String, base: String },
    #[error(transparent)]
    Validation(#[from] ConfigError),
    #[error(transparent)]
    Draw(DrawError),
    #[error("assignment backend failure: {0}")]
    Backend(#[source] E),
}

/// Store enforcing the sticky guarantee over an [`AssignmentBackend`].
#[derive(Debug, Default)]
pub struct AssignmentStore<B> {
    backend: B,
}

impl<B: AssignmentBackend> AssignmentStore<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Return the existing sticky assignment or draw, persist, and return
    /// a new one. An existing assignment is never altered by this call;
    /// when two callers race on first creation, the backend's
    /// insert-if-absent keeps exactly one record and the loser receives
    /// the winner's.
    ///
    /// A manual strategy with no entry for the user assigns the default
    /// version rather than failing the caller.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on storage failure, or
    /// `StoreError::Draw` when the config's version set is empty.
    pub fn get_or_create<R: Rng>(
        &self,
        user_id: &str,
        config: &VersionConfig,
        rng: &mut R,
    ) -> Result<AssignmentOutcome, StoreError<B::Error>> {
        let key = AssignmentKey::new(user_id, &config.base_character_id);
        if let Some(existing) = self.backend.load(&key).map_err(StoreError::Backend)? {
            return Ok(AssignmentOutcome {
                assignment: existing,
                created: false,
                used_default: false,
            });
        }

        let (version_id, used_default) = match strategy::draw(config, user_id, rng) {
            Ok(version) => (version.to_string(), false),
            Err(DrawError::NoManualAssignment { .. }) => {
                (config.default_version_id.clone(), true)
            }
            Err(err @ DrawError::EmptyVersionSet(_)) => return Err(StoreError::Draw(err)),
        };

        let assignment = Assignment {
            user_id: user_id.to_string(),
            base_character_id: config.base_character_id.clone(),
            version_id,
            assigned_at: Utc::now(),
            strategy_used: config.strategy.kind().to_string(),
            reassigned: false,
        };

        match self
            .backend
            .try_insert(&assignment)
            .map_err(StoreError::Backend)?
        {
            Some(winner) => Ok(AssignmentOutcome {
                assignment: winner,
                created: false,
                used_default: false,
            }),
            None => Ok(AssignmentOutcome {
                assignment,
                created: true,
                used_default,
            }),
        }
    }

    /// Fetch the sticky assignment without creating one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on storage failure.
    pub fn lookup(
        &self,
        user_id: &str,
        base_character_id: &str,
    ) -> Result<Option<Assignment>, StoreError<B::Error>> {
        let key = AssignmentKey::new(user_id, base_character_id);
        self.backend.load(&key).map_err(StoreError::Backend)
    }

    /// Explicitly overwrite an existing sticky assignment. This is the
    /// only path that changes an assignment after creation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` when the target version is not in
    /// the character's available set, `StoreError::NotFound` when the user
    /// has no assignment to override, or `StoreError::Backend` on storage
    /// failure.
    pub fn reassign(
        &self,
        user_id: &str,
        config: &VersionConfig,
        new_version_id: &str,
    ) -> Result<Reassignment, StoreError<B::Error>> {
        if !config.is_available(new_version_id) {
            return Err(StoreError::Validation(ConfigError::UnknownVersion {
                base: config.base_character_id.clone(),
                version: new_version_id.to_string(),
            }));
        }

        let key = AssignmentKey::new(user_id, &config.base_character_id);
        let Some(previous) = self.backend.load(&key).map_err(StoreError::Backend)? else {
            return Err(StoreError::NotFound {
                user: user_id.to_string(),
                base: config.base_character_id.clone(),
            });
        };

        let updated = Assignment {
            version_id: new_version_id.to_string(),
            assigned_at: Utc::now(),
            strategy_used: STRATEGY_MANUAL_OVERRIDE.to_string(),
            reassigned: true,
            ..previous.clone()
        };
        if !self.backend.replace(&updated).map_err(StoreError::Backend)? {
            return Err(StoreError::NotFound {
                user: user_id.to_string(),
                base: config.base_character_id.clone(),
            });
        }

        log::info!(
            "reassigned user '{user_id}' on '{base}' from '{old}' to '{new_version_id}'",
            base = config.base_character_id,
            old = previous.version_id,
        );
        Ok(Reassignment {
            assignment: updated,
            previous_version_id: previous.version_id,
        })
    }

    /// Delete a user's assignment for one character. Returns whether a
    /// record existed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on storage failure.
    pub fn remove(
        &self,
        user_id: &str,
        base_character_id: &str,
    ) -> Result<bool, StoreError<B::Error>> {
        let key = AssignmentKey::new(user_id, base_character_id);
        self.backend.remove(&key).map_err(StoreError::Backend)
    }
}

/// In-process backend keeping assignments in a shared map. Creation is a
/// single insert-if-absent under the write lock, which serializes
/// first-time requests per key.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<AssignmentKey, Assignment>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl AssignmentBackend for MemoryBackend {
    type Error = Infallible;

    fn load(&self, key: &AssignmentKey) -> Result<Option<Assignment>, Self::Error> {
        Ok(self.records.read().get(key).cloned())
    }

    fn try_insert(&self, assignment: &Assignment) -> Result<Option<Assignment>, Self::Error> {
        let mut records = self.records.write();
        match records.entry(assignment.key()) {
            std::collections::hash_map::Entry::Occupied(entry) => Ok(Some(entry.get().clone())),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(assignment.clone());
                Ok(None)
            }
        }
    }

    fn replace(&self, assignment: &Assignment) -> Result<bool, Self::Error> {
        let mut records = self.records.write();
        match records.entry(assignment.key()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.insert(assignment.clone());
                Ok(true)
            }
            std::collections::hash_map::Entry::Vacant(_) => Ok(false),
        }
    }

    fn remove(&self, key: &AssignmentKey) -> Result<bool, Self::Error> {
        Ok(self.records.write().remove(key).is_some())
    }

    fn for_character(&self, base_character_id: &str) -> Result<Vec<Assignment>, Self::Error> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|a| a.base_character_id == base_character_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn weighted_config() -> VersionConfig {
        VersionConfig {
            base_character_id: "plato".to_string(),
            available_version_ids: ["base", "enhanced"].iter().map(ToString::to_string).collect(),
            default_version_id: "base".to_string(),
            strategy: StrategyConfig::Weighted {
                weights: [("base", 0.6), ("enhanced", 0.4)]
                    .iter()
                    .map(|(id, w)| ((*id).to_string(), *w))
                    .collect(),
            },
        }
    }

    fn manual_config() -> VersionConfig {
        VersionConfig {
            base_character_id: "plato".to_string(),
            available_version_ids: ["base", "enhanced"].iter().map(ToString::to_string).collect(),
            default_version_id: "base".to_string(),
            strategy: StrategyConfig::Manual {
                assignments: std::iter::once(("vip".to_string(), "enhanced".to_string()))
                    .collect(),
            },
        }
    }

    #[test]
    fn get_or_create_is_sticky() {
        let store = AssignmentStore::new(MemoryBackend::new());
        let config = weighted_config();
        let mut rng = ChaCha20Rng::from_seed([1u8; 32]);

        let first = store.get_or_create("u1", &config, &mut rng).unwrap();
        assert!(first.created);

        let second = store.get_or_create("u1", &config, &mut rng).unwrap();
        assert!(!second.created);
        assert_eq!(second.assignment.version_id, first.assignment.version_id);
        assert_eq!(second.assignment.assigned_at, first.assignment.assigned_at);
        assert_eq!(store.backend().len(), 1);
    }

    #[test]
    fn race_loser_reads_back_the_winner() {
        let backend = MemoryBackend::new();
        let winner = Assignment {
            user_id: "u1".to_string(),
            base_character_id: "plato".to_string(),
            version_id: "base".to_string(),
            assigned_at: Utc::now(),
            strategy_used: "weighted".to_string(),
            reassigned: false,
        };
        let loser = Assignment {
            version_id: "enhanced".to_string(),
            ..winner.clone()
        };

        assert!(backend.try_insert(&winner).unwrap().is_none());
        let observed = backend.try_insert(&loser).unwrap().unwrap();
        assert_eq!(observed.version_id, "base");
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn manual_miss_falls_back_to_default() {
        let store = AssignmentStore::new(MemoryBackend::new());
        let config = manual_config();
        let mut rng = ChaCha20Rng::from_seed([2u8; 32]);

        let vip = store.get_or_create("vip", &config, &mut rng).unwrap();
        assert_eq!(vip.assignment.version_id, "enhanced");
        assert!(!vip.used_default);

        let stranger = store.get_or_create("stranger", &config, &mut rng).unwrap();
        assert_eq!(stranger.assignment.version_id, "base");
        assert!(stranger.used_default);
        assert_eq!(stranger.assignment.strategy_used, "manual");
    }

    #[test]
    fn reassign_overrides_and_validates() {
        let store = AssignmentStore::new(MemoryBackend::new());
        let config = weighted_config();
        let mut rng = ChaCha20Rng::from_seed([3u8; 32]);
        store.get_or_create("u1", &config, &mut rng).unwrap();

        let outcome = store.reassign("u1", &config, "enhanced").unwrap();
        assert_eq!(outcome.assignment.version_id, "enhanced");
        assert!(outcome.assignment.reassigned);
        assert_eq!(outcome.assignment.strategy_used, STRATEGY_MANUAL_OVERRIDE);

        let sticky = store.lookup("u1", "plato").unwrap().unwrap();
        assert_eq!(sticky.version_id, "enhanced");

        assert!(matches!(
            store.reassign("u1", &config, "nonexistent"),
            Err(StoreError::Validation(ConfigError::UnknownVersion { .. }))
        ));
        assert!(matches!(
            store.reassign("u2", &config, "enhanced"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn remove_deletes_the_record() {
        let store = AssignmentStore::new(MemoryBackend::new());
        let config = weighted_config();
        let mut rng = ChaCha20Rng::from_seed([4u8; 32]);
        store.get_or_create("u1", &config, &mut rng).unwrap();

        assert!(store.remove("u1", "plato").unwrap());
        assert!(!store.remove("u1", "plato").unwrap());
        assert!(store.lookup("u1", "plato").unwrap().is_none());
    }

    #[test]
    fn for_character_filters_by_base() {
        let store = AssignmentStore::new(MemoryBackend::new());
        let plato = weighted_config();
        let pratchett = VersionConfig {
            base_character_id: "pratchett".to_string(),
            ..weighted_config()
        };
        let mut rng = ChaCha20Rng::from_seed([5u8; 32]);
        store.get_or_create("u1", &plato, &mut rng).unwrap();
        store.get_or_create("u2", &plato, &mut rng).unwrap();
        store.get_or_create("u1", &pratchett, &mut rng).unwrap();

        assert_eq!(store.backend().for_character("plato").unwrap().len(), 2);
        assert_eq!(store.backend().for_character("pratchett").unwrap().len(), 1);
    }
}
