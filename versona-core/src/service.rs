//! Orchestration facade tying the registry, store, and event sink together.
use crate::analytics::{AnalyticsAggregator, VersionShare, build_analytics};
use crate::assignment::{Assignment, AssignmentStore, MemoryBackend, StoreError};
use crate::events::{
    AssignmentEvent, EVENT_ASSIGNMENT_CREATED, EVENT_ASSIGNMENT_OVERRIDDEN, EventMetadata,
};
use crate::registry::{RegistryError, VersionConfigRegistry};
use crate::strategy::{self, DrawError};
use crate::{AssignmentBackend, EventSink};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::convert::Infallible;
use thiserror::Error;

/// Synthetic user id used for strategy-only draws; manual strategies have
/// no entry for it, so those draws count toward the default version.
const DISTRIBUTION_PROBE_USER: &str = "distribution-probe";

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError<E>),
}

/// Result of `test_assignment_distribution`: independent strategy draws
/// that never touch the sticky store or the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionReport {
    pub base_character_id: String,
    pub strategy: String,
    pub draws: usize,
    pub shares: Vec<VersionShare>,
    pub mean_absolute_deviation: f64,
}

/// Result of `simulate_user_assignments`: full sticky get-or-create
/// cycles against synthetic users in an isolated scratch store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub base_character_id: String,
    pub strategy: String,
    pub users: usize,
    pub shares: Vec<VersionShare>,
    pub mean_absolute_deviation: f64,
    /// How many synthetic users received the same version on a repeat
    /// lookup; anything below `users` indicates a stickiness bug.
    pub sticky_consistent: usize,
}

/// The assignment and analytics facade consumed by the host runtime.
///
/// Constructed explicitly with an injected registry, backend, and event
/// sink; lifetime is scoped to the host process. All live draws come from
/// a single seeded stream so a process restarted with the same seed is
/// reproducible end to end.
#[derive(Debug)]
pub struct VersionAssignmentService<B, E> {
    registry: VersionConfigRegistry,
    store: AssignmentStore<B>,
    sink: E,
    live_rng: Mutex<SmallRng>,
    seed: u64,
}

impl<B: AssignmentBackend, E: EventSink> VersionAssignmentService<B, E> {
    /// Create a service over the given collaborators.
    #[must_use]
    pub fn new(registry: VersionConfigRegistry, backend: B, sink: E, seed: u64) -> Self {
        let live_seed = derive_stream_seed(seed, "live", "");
        Self {
            registry,
            store: AssignmentStore::new(backend),
            sink,
            live_rng: Mutex::new(SmallRng::seed_from_u64(live_seed)),
            seed,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &VersionConfigRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn store(&self) -> &AssignmentStore<B> {
        &self.store
    }

    #[must_use]
    pub const fn event_sink(&self) -> &E {
        &self.sink
    }

    /// Read-only analytics over this service's registry and records.
    #[must_use]
    pub const fn analytics(&self) -> AnalyticsAggregator<'_, B> {
        AnalyticsAggregator::new(&self.registry, self.store.backend())
    }

    /// Resolve the user's sticky version, creating and persisting a new
    /// assignment on first contact. Emits `assignment_created` exactly
    /// once per (user, character) pair; a sink failure is logged and does
    /// not fail the call.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Registry` for an unknown character or
    /// `ServiceError::Store` on storage failure.
    pub fn get_version_for_user(
        &self,
        user_id: &str,
        base_character_id: &str,
    ) -> Result<String, ServiceError<B::Error>> {
        let config = self.registry.get(base_character_id)?;
        let outcome = {
            let mut rng = self.live_rng.lock();
            self.store.get_or_create(user_id, config, &mut *rng)?
        };

        if outcome.created {
            let mut metadata = EventMetadata::new();
            metadata.insert(
                "strategy".to_string(),
                serde_json::Value::String(outcome.assignment.strategy_used.clone()),
            );
            if outcome.used_default {
                metadata.insert(
                    "fallback".to_string(),
                    serde_json::Value::String("default_version".to_string()),
                );
            }
            self.emit(AssignmentEvent::new(
                user_id,
                base_character_id,
                &outcome.assignment.version_id,
                EVENT_ASSIGNMENT_CREATED,
                metadata,
            ));
        }
        Ok(outcome.assignment.version_id)
    }

    /// Like `get_version_for_user`, but degrades to the character's
    /// default version when assignment fails: the conversation keeps
    /// flowing even if the store is down. An unknown character still
    /// errors because no default exists for it.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownCharacter` only.
    pub fn get_version_or_default(
        &self,
        user_id: &str,
        base_character_id: &str,
    ) -> Result<String, RegistryError> {
        let default = self.registry.get(base_character_id)?.default_version_id.clone();
        match self.get_version_for_user(user_id, base_character_id) {
            Ok(version) => Ok(version),
            Err(err) => {
                log::warn!(
                    "assignment for user '{user_id}' on '{base_character_id}' degraded to default '{default}': {err}"
                );
                Ok(default)
            }
        }
    }

    /// Attribute a usage event to the user's existing assignment and
    /// append it to the sink. A sink failure is logged and swallowed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Registry` for an unknown character, or
    /// `ServiceError::Store` with `StoreError::NotFound` when the user
    /// has no assignment yet (an event cannot be attributed to an
    /// unassigned user; this call never creates assignments).
    pub fn log_event(
        &self,
        user_id: &str,
        base_character_id: &str,
        event_type: &str,
        metadata: EventMetadata,
    ) -> Result<(), ServiceError<B::Error>> {
        self.registry.get(base_character_id)?;
        let Some(assignment) = self.store.lookup(user_id, base_character_id)? else {
            return Err(ServiceError::Store(StoreError::NotFound {
                user: user_id.to_string(),
                base: base_character_id.to_string(),
            }));
        };
        self.emit(AssignmentEvent::new(
            user_id,
            base_character_id,
            &assignment.version_id,
            event_type,
            metadata,
        ));
        Ok(())
    }

    /// Explicitly override a user's sticky assignment and emit an
    /// `assignment_overridden` event carrying the previous version.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Registry` for an unknown character, or
    /// `ServiceError::Store` when the target version is unavailable or
    /// the user has no assignment to override.
    pub fn reassign_user(
        &self,
        user_id: &str,
        base_character_id: &str,
        new_version_id: &str,
    ) -> Result<Assignment, ServiceError<B::Error>> {
        let config = self.registry.get(base_character_id)?;
        let outcome = self.store.reassign(user_id, config, new_version_id)?;

        let mut metadata = EventMetadata::new();
        metadata.insert(
            "previous_version".to_string(),
            serde_json::Value::String(outcome.previous_version_id),
        );
        self.emit(AssignmentEvent::new(
            user_id,
            base_character_id,
            new_version_id,
            EVENT_ASSIGNMENT_OVERRIDDEN,
            metadata,
        ));
        Ok(outcome.assignment)
    }

    /// Remove a user's assignments across every registered character.
    /// Returns how many records were deleted.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Store` on storage failure.
    pub fn delete_user_data(&self, user_id: &str) -> Result<usize, ServiceError<B::Error>> {
        let mut removed = 0;
        for config in &self.registry {
            if self.store.remove(user_id, &config.base_character_id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("deleted {removed} assignment(s) for user '{user_id}'");
        }
        Ok(removed)
    }

    /// Run `draws` independent strategy draws for verification. Uses a
    /// stream derived from the service seed and the character id, so the
    /// same call always produces the same report; touches neither the
    /// sticky store nor the event sink.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Registry` for an unknown character.
    pub fn test_assignment_distribution(
        &self,
        base_character_id: &str,
        draws: usize,
    ) -> Result<DistributionReport, ServiceError<B::Error>> {
        let config = self.registry.get(base_character_id)?;
        let mut rng = SmallRng::seed_from_u64(derive_stream_seed(
            self.seed,
            "distribution",
            base_character_id,
        ));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..draws {
            let version = match strategy::draw(config, DISTRIBUTION_PROBE_USER, &mut rng) {
                Ok(version) => version.to_string(),
                Err(DrawError::NoManualAssignment { .. }) => config.default_version_id.clone(),
                Err(err @ DrawError::EmptyVersionSet(_)) => {
                    return Err(ServiceError::Store(StoreError::Draw(err)));
                }
            };
            *counts.entry(version).or_default() += 1;
        }

        let borrowed: HashMap<&str, usize> =
            counts.iter().map(|(id, n)| (id.as_str(), *n)).collect();
        let analytics = build_analytics(config, &borrowed, draws);
        Ok(DistributionReport {
            base_character_id: analytics.base_character_id,
            strategy: analytics.strategy,
            draws,
            shares: analytics.shares,
            mean_absolute_deviation: analytics.mean_absolute_deviation,
        })
    }

    /// Run `users` full get-or-create cycles against synthetic user ids
    /// in an isolated scratch store, exercising the sticky path end to
    /// end. Live user data is never read or written.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Registry` for an unknown character.
    pub fn simulate_user_assignments(
        &self,
        base_character_id: &str,
        users: usize,
    ) -> Result<SimulationReport, ServiceError<B::Error>> {
        let config = self.registry.get(base_character_id)?;
        let scratch = AssignmentStore::new(MemoryBackend::new());
        let mut rng = SmallRng::seed_from_u64(derive_stream_seed(
            self.seed,
            "simulate",
            base_character_id,
        ));

        let mut sticky_consistent = 0;
        for i in 0..users {
            let user = format!("sim-user-{i:05}");
            let first = scratch
                .get_or_create(&user, config, &mut rng)
                .map_err(promote_scratch_error)?;
            let second = scratch
                .get_or_create(&user, config, &mut rng)
                .map_err(promote_scratch_error)?;
            if second.assignment.version_id == first.assignment.version_id {
                sticky_consistent += 1;
            }
        }

        let records = match scratch.backend().for_character(base_character_id) {
            Ok(records) => records,
            Err(never) => match never {},
        };
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            *counts.entry(record.version_id.as_str()).or_default() += 1;
        }
        let analytics = build_analytics(config, &counts, records.len());
        Ok(SimulationReport {
            base_character_id: analytics.base_character_id,
            strategy: analytics.strategy,
            users,
            shares: analytics.shares,
            mean_absolute_deviation: analytics.mean_absolute_deviation,
            sticky_consistent,
        })
    }

    fn emit(&self, event: AssignmentEvent) {
        if let Err(err) = self.sink.append(event) {
            log::warn!("failed to append assignment event: {err}");
        }
    }
}

/// Simulation runs against an infallible scratch backend; lift its store
/// errors into the service's backend error type.
fn promote_scratch_error<E>(err: StoreError<Infallible>) -> ServiceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        StoreError::NotFound { user, base } => {
            ServiceError::Store(StoreError::NotFound { user, base })
        }
        StoreError::Validation(inner) => ServiceError::Store(StoreError::Validation(inner)),
        StoreError::Draw(inner) => ServiceError::Store(StoreError::Draw(inner)),
        StoreError::Backend(never) => match never {},
    }
}

fn derive_stream_seed(service_seed: u64, domain: &str, base_character_id: &str) -> u64 {
    let mut mac = Hmac::<Sha256>::new_from_slice(&service_seed.to_le_bytes())
        .expect("64-bit seed is a valid HMAC key");
    mac.update(domain.as_bytes());
    mac.update(b":");
    mac.update(base_character_id.as_bytes());
    let digest = mac.finalize().into_bytes();
    let seed_bytes: [u8; 8] = digest[..8].try_into().expect("digest is at least 8 bytes");
    u64::from_le_bytes(seed_bytes)
}
