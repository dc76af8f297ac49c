//! View tracking with per-viewer deduplication
//!
//! Every view event is logged and counted toward `total_views`; a viewer is
//! counted toward `unique_views` only the first time they are seen for an
//! entity. Reads of the unique count go through a short-lived TTL cache.

use crate::context::EngineContext;
use crate::dedup::OperationKind;
use crate::error::EngagementError;
use crate::service::{UserRef, ViewDto};
use crate::types::{EntityId, Identity, IdentityKey, ViewRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Per-entity view log
///
/// Invariant: `unique_views == unique.len()` and `unique_views <= total_views`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementState {
    records: Vec<ViewRecord>,
    unique: BTreeSet<IdentityKey>,
    total_views: u64,
    unique_views: u64,
}

impl EngagementState {
    /// Rebuild from a list of records
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = ViewRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            state.apply_view(record);
        }
        state
    }

    /// Log a view; returns `true` when it is the viewer's first
    pub fn apply_view(&mut self, record: ViewRecord) -> bool {
        let key = record.identity.as_ref().and_then(Identity::key);
        self.records.push(record);
        self.total_views += 1;
        let first = key.is_some_and(|key| self.unique.insert(key));
        if first {
            self.unique_views += 1;
        }
        first
    }

    /// Every view event, repeats included
    #[inline]
    #[must_use]
    pub fn total_views(&self) -> u64 {
        self.total_views
    }

    /// Distinct identified viewers
    #[inline]
    #[must_use]
    pub fn unique_views(&self) -> u64 {
        self.unique_views
    }

    /// Logged records in arrival order
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[ViewRecord] {
        &self.records
    }

    /// Whether `identity` already viewed this entity
    #[must_use]
    pub fn has_viewer(&self, identity: &Identity) -> bool {
        identity.key().is_some_and(|key| self.unique.contains(&key))
    }

    fn statistics(&self) -> ViewStatistics {
        ViewStatistics {
            unique_views: self.unique_views,
            total_views: self.total_views,
            viewers: self.unique.iter().cloned().collect(),
            first_viewed: self.records.iter().map(|r| r.created_at).min(),
            last_viewed: self.records.iter().map(|r| r.created_at).max(),
        }
    }
}

/// Read-only view statistics for an entity
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ViewStatistics {
    pub unique_views: u64,
    pub total_views: u64,
    pub viewers: Vec<IdentityKey>,
    pub first_viewed: Option<DateTime<Utc>>,
    pub last_viewed: Option<DateTime<Utc>>,
}

/// Result of [`ViewTracker::record_view`]
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome {
    /// The view was stored server-side and logged locally
    Recorded {
        record: ViewRecord,
        first_for_viewer: bool,
    },
    /// A view call for this entity is still outstanding; nothing was sent
    AlreadyInFlight,
}

impl ViewOutcome {
    /// Whether the view was recorded
    #[inline]
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

/// Result of [`ViewTracker::hydrate_views`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrateOutcome {
    /// State rebuilt from the server list
    Hydrated { total_views: u64, unique_views: u64 },
    /// A hydration for this entity is still outstanding
    AlreadyInFlight,
}

/// Unique-view read, tagged with where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueViewCount {
    pub value: u64,
    pub from_cache: bool,
}

/// Cached unique-view count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: u64,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    fn now(value: u64) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
        }
    }
}

/// Records views and serves view statistics
#[derive(Debug)]
pub struct ViewTracker {
    ctx: Arc<EngineContext>,
    states: DashMap<EntityId, EngagementState>,
    unique_cache: Cache<EntityId, CacheEntry>,
}

impl ViewTracker {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        let unique_cache = Cache::builder()
            .max_capacity(ctx.config.unique_cache_capacity)
            .time_to_live(ctx.config.unique_view_ttl())
            .build();
        Self {
            ctx,
            states: DashMap::new(),
            unique_cache,
        }
    }

    /// Record a view of `entity` by the current viewer
    ///
    /// All-or-nothing: local state changes only after the server accepted
    /// the view.
    ///
    /// # Errors
    /// - `EngagementError::Network` when the views service fails
    /// - `EngagementError::TornDown` when the session was reset or the
    ///   entity released meanwhile
    pub async fn record_view(&self, entity: EntityId) -> Result<ViewOutcome, EngagementError> {
        let identity = self.ctx.identity.resolve();
        let Some(_slot) = self.ctx.dedup.acquire(entity, OperationKind::View) else {
            return Ok(ViewOutcome::AlreadyInFlight);
        };
        let seen = self.ctx.liveness(entity);

        let created = match self.ctx.services.views.create(entity).await {
            Ok(created) => created,
            Err(err) => {
                tracing::warn!(entity = %entity, "view not recorded: {}", err);
                return Err(err.into());
            }
        };
        if !self.ctx.is_live(entity, seen) {
            return Err(EngagementError::TornDown);
        }

        let record = ViewRecord {
            id: created.id,
            entity,
            identity,
            created_at: created.created_at,
        };
        let (first_for_viewer, unique_views) = {
            let mut state = self.states.entry(entity).or_default();
            let first = state.apply_view(record.clone());
            (first, state.unique_views)
        };
        self.unique_cache
            .insert(entity, CacheEntry::now(unique_views))
            .await;
        self.ctx.counters.record_view(entity, first_for_viewer);
        self.ctx.reconciler.schedule(entity);

        tracing::debug!(entity = %entity, first_for_viewer, "view recorded");
        Ok(ViewOutcome::Recorded {
            record,
            first_for_viewer,
        })
    }

    /// Rebuild an entity's view log from the server
    ///
    /// # Errors
    /// - `EngagementError::Network` when the list call fails
    /// - `EngagementError::TornDown` when the session was reset or the
    ///   entity released meanwhile
    pub async fn hydrate_views(&self, entity: EntityId) -> Result<HydrateOutcome, EngagementError> {
        let Some(_slot) = self.ctx.dedup.acquire(entity, OperationKind::ViewHydrate) else {
            return Ok(HydrateOutcome::AlreadyInFlight);
        };
        let seen = self.ctx.liveness(entity);

        let listed = self.ctx.services.views.list(Some(entity)).await.map_err(|err| {
            tracing::warn!(entity = %entity, "view list failed: {}", err);
            EngagementError::from(err)
        })?;
        if !self.ctx.is_live(entity, seen) {
            return Err(EngagementError::TornDown);
        }

        let state = EngagementState::from_records(
            listed
                .into_iter()
                .filter(|view| view.question == entity)
                .map(record_from_dto),
        );
        let (total_views, unique_views) = (state.total_views, state.unique_views);
        self.states.insert(entity, state);
        self.unique_cache
            .insert(entity, CacheEntry::now(unique_views))
            .await;

        tracing::debug!(entity = %entity, total_views, unique_views, "views hydrated");
        Ok(HydrateOutcome::Hydrated {
            total_views,
            unique_views,
        })
    }

    /// View statistics for `entity`; never touches the network
    #[must_use]
    pub fn statistics(&self, entity: EntityId) -> ViewStatistics {
        self.states
            .get(&entity)
            .map(|state| state.statistics())
            .unwrap_or_default()
    }

    /// Unique-view count, served from the TTL cache when fresh
    pub async fn unique_view_count(&self, entity: EntityId) -> UniqueViewCount {
        if let Some(entry) = self.unique_cache.get(&entity).await {
            return UniqueViewCount {
                value: entry.value,
                from_cache: true,
            };
        }
        let value = self
            .states
            .get(&entity)
            .map_or(0, |state| state.unique_views);
        UniqueViewCount {
            value,
            from_cache: false,
        }
    }

    /// Snapshot of an entity's view log
    #[must_use]
    pub fn state(&self, entity: EntityId) -> Option<EngagementState> {
        self.states.get(&entity).map(|state| state.clone())
    }

    pub(crate) async fn forget(&self, entity: EntityId) {
        self.states.remove(&entity);
        self.unique_cache.invalidate(&entity).await;
    }

    pub(crate) fn clear(&self) {
        self.states.clear();
        self.unique_cache.invalidate_all();
    }
}

fn record_from_dto(view: ViewDto) -> ViewRecord {
    ViewRecord {
        id: view.id,
        entity: view.question,
        identity: view.user.and_then(identity_from_user),
        created_at: view.created_at,
    }
}

pub(crate) fn identity_from_user(user: UserRef) -> Option<Identity> {
    let identity = Identity {
        username: user.username.filter(|name| !name.is_empty()),
        user_id: user.id,
    };
    identity.key().map(|_| identity)
}
