//! Session-wide collaborators shared by the trackers

use crate::config::EngagementConfig;
use crate::counters::CounterBoard;
use crate::dedup::DedupGuard;
use crate::identity::IdentityResolver;
use crate::reconcile::Reconciler;
use crate::service::Services;
use crate::types::EntityId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Session epoch and entity generation observed before an await point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Liveness {
    epoch: u64,
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct EngineContext {
    pub(crate) config: EngagementConfig,
    pub(crate) services: Services,
    pub(crate) identity: IdentityResolver,
    pub(crate) dedup: DedupGuard,
    pub(crate) counters: Arc<CounterBoard>,
    pub(crate) reconciler: Reconciler,
    epoch: AtomicU64,
    generations: DashMap<EntityId, u64>,
}

impl EngineContext {
    pub(crate) fn new(
        config: EngagementConfig,
        services: Services,
        identity: IdentityResolver,
    ) -> Self {
        let counters = Arc::new(CounterBoard::new());
        let reconciler = Reconciler::new(
            services.answers.clone(),
            counters.clone(),
            config.reconcile_delay(),
        );
        Self {
            config,
            services,
            identity,
            dedup: DedupGuard::new(),
            counters,
            reconciler,
            epoch: AtomicU64::new(0),
            generations: DashMap::new(),
        }
    }

    /// Session generation observed before an await point
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// False once the session was reset after `epoch` was observed
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Bumps the session epoch; entity generations restart with it
    pub(crate) fn advance_epoch(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.generations.clear();
        epoch
    }

    fn generation(&self, entity: EntityId) -> u64 {
        self.generations.get(&entity).map_or(0, |g| *g)
    }

    pub(crate) fn liveness(&self, entity: EntityId) -> Liveness {
        Liveness {
            epoch: self.epoch(),
            generation: self.generation(entity),
        }
    }

    /// False once the session was reset or `entity` released since `seen`
    pub(crate) fn is_live(&self, entity: EntityId, seen: Liveness) -> bool {
        self.is_current(seen.epoch) && self.generation(entity) == seen.generation
    }

    /// Marks `entity` torn down for every continuation already in flight
    pub(crate) fn retire(&self, entity: EntityId) {
        *self.generations.entry(entity).or_default() += 1;
    }
}

