//! Reaction ledger with optimistic toggles
//!
//! A toggle is applied to the visible summary before the network call. On
//! failure the optimistic delta is discarded by refetching the entity's
//! reaction list, not by undoing the delta by hand.

use crate::context::{EngineContext, Liveness};
use crate::dedup::OperationKind;
use crate::error::EngagementError;
use crate::service::ReactionDto;
use crate::types::{EntityId, Identity, ReactionKind};
use crate::views::identity_from_user;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Server-confirmed record of the viewer's active reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfirmedReaction {
    pub id: i64,
    pub confirmed_at: DateTime<Utc>,
}

/// Reaction counts for one entity
///
/// Invariant: `total == per_kind.values().sum()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReactionSummary {
    per_kind: BTreeMap<ReactionKind, u32>,
    total: u32,
    current_user_kind: Option<ReactionKind>,
    confirmed: Option<ConfirmedReaction>,
}

impl ReactionSummary {
    /// Count for one kind
    #[inline]
    #[must_use]
    pub fn count(&self, kind: ReactionKind) -> u32 {
        self.per_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Total reactions across kinds
    #[inline]
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// The viewer's active reaction
    #[inline]
    #[must_use]
    pub fn current_user_kind(&self) -> Option<ReactionKind> {
        self.current_user_kind
    }

    /// Server record backing the viewer's reaction, once confirmed
    #[inline]
    #[must_use]
    pub fn confirmed(&self) -> Option<ConfirmedReaction> {
        self.confirmed
    }

    /// Non-zero counts by kind
    #[inline]
    #[must_use]
    pub fn per_kind(&self) -> &BTreeMap<ReactionKind, u32> {
        &self.per_kind
    }

    /// Apply the viewer toggling `kind`
    ///
    /// Same kind again removes it; a different kind replaces the previous
    /// one without changing the total.
    pub fn apply_toggle(&mut self, kind: ReactionKind) {
        match self.current_user_kind {
            Some(previous) if previous == kind => {
                self.decrement(kind);
                self.total = self.total.saturating_sub(1);
                self.current_user_kind = None;
                self.confirmed = None;
            }
            previous => {
                if let Some(previous) = previous {
                    self.decrement(previous);
                } else {
                    self.total += 1;
                }
                *self.per_kind.entry(kind).or_insert(0) += 1;
                self.current_user_kind = Some(kind);
                self.confirmed = None;
            }
        }
        self.enforce_total();
    }

    /// Rebuild from the server's reaction list
    ///
    /// One reaction per user survives (the latest); unknown kinds are skipped.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = ReactionDto>, viewer: Option<&Identity>) -> Self {
        let mut latest: HashMap<String, (DateTime<Utc>, ReactionKind, ReactionDto)> = HashMap::new();
        for record in records {
            let kind = match record.reaction_type.parse::<ReactionKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    tracing::warn!(reaction = record.id, kind = %record.reaction_type, "skipping unknown reaction kind");
                    continue;
                }
            };
            let Some(key) = identity_from_user(record.user.clone()).and_then(|i| i.key()) else {
                continue;
            };
            let newer = latest
                .get(&key.0)
                .map_or(true, |(seen_at, _, _)| record.created_at >= *seen_at);
            if newer {
                latest.insert(key.0, (record.created_at, kind, record));
            }
        }

        let mut summary = Self::default();
        for (created_at, kind, record) in latest.into_values() {
            *summary.per_kind.entry(kind).or_insert(0) += 1;
            summary.total += 1;
            let mine = viewer.is_some_and(|v| v.matches(record.user.username.as_deref(), record.user.id));
            if mine {
                summary.current_user_kind = Some(kind);
                summary.confirmed = Some(ConfirmedReaction {
                    id: record.id,
                    confirmed_at: created_at,
                });
            }
        }
        summary
    }

    fn decrement(&mut self, kind: ReactionKind) {
        if let Some(count) = self.per_kind.get_mut(&kind) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_kind.remove(&kind);
            }
        }
    }

    fn enforce_total(&mut self) {
        let sum: u32 = self.per_kind.values().sum();
        if sum != self.total {
            tracing::warn!(total = self.total, sum, "reaction total drifted from per-kind counts, clamping");
            self.total = sum;
        }
    }
}

/// Result of a reaction operation
#[derive(Debug, Clone, PartialEq)]
pub enum ReactionOutcome {
    /// The summary now reads as returned
    Updated(ReactionSummary),
    /// A reaction call for this entity is still outstanding; nothing was sent
    AlreadyInFlight,
}

/// Per-entity reaction summaries
#[derive(Debug)]
pub struct ReactionLedger {
    ctx: Arc<EngineContext>,
    summaries: DashMap<EntityId, ReactionSummary>,
}

impl ReactionLedger {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            summaries: DashMap::new(),
        }
    }

    /// Toggle the viewer's `kind` reaction on `entity`
    ///
    /// # Errors
    /// - `EngagementError::UnknownReactionKind` before any mutation
    /// - `EngagementError::Network` after the summary was resynchronized
    /// - `EngagementError::TornDown` when the session was reset or the
    ///   entity released meanwhile
    pub async fn toggle_reaction(
        &self,
        entity: EntityId,
        kind: &str,
    ) -> Result<ReactionOutcome, EngagementError> {
        let kind: ReactionKind = kind.parse()?;
        let Some(_slot) = self.ctx.dedup.acquire(entity, OperationKind::Reaction) else {
            return Ok(ReactionOutcome::AlreadyInFlight);
        };
        let seen = self.ctx.liveness(entity);

        let before = {
            let mut summary = self.summaries.entry(entity).or_default();
            let before = summary.clone();
            summary.apply_toggle(kind);
            before
        };

        match self.ctx.services.reactions.upsert(entity, kind).await {
            Ok(ack) => {
                if !self.ctx.is_live(entity, seen) {
                    return Err(EngagementError::TornDown);
                }
                let summary = {
                    let mut summary = self.summaries.entry(entity).or_default();
                    summary.confirmed = match (ack.removed, summary.current_user_kind, ack.id) {
                        (false, Some(_), Some(id)) => Some(ConfirmedReaction {
                            id,
                            confirmed_at: Utc::now(),
                        }),
                        _ => None,
                    };
                    summary.clone()
                };
                self.ctx.reconciler.schedule(entity);
                tracing::debug!(entity = %entity, %kind, total = summary.total, "reaction toggled");
                Ok(ReactionOutcome::Updated(summary))
            }
            Err(err) => {
                tracing::warn!(entity = %entity, %kind, "reaction toggle failed, resynchronizing: {}", err);
                if !self.ctx.is_live(entity, seen) {
                    return Err(EngagementError::TornDown);
                }
                self.resync(entity, seen, Some(before)).await;
                Err(err.into())
            }
        }
    }

    /// Rebuild an entity's summary from the server
    ///
    /// Skipped while a toggle for the entity is outstanding.
    ///
    /// # Errors
    /// - `EngagementError::Network` when the list call fails
    /// - `EngagementError::TornDown` when the session was reset or the
    ///   entity released meanwhile
    pub async fn hydrate_reactions(&self, entity: EntityId) -> Result<ReactionOutcome, EngagementError> {
        if self.ctx.dedup.is_busy(entity, OperationKind::Reaction) {
            return Ok(ReactionOutcome::AlreadyInFlight);
        }
        let Some(_slot) = self.ctx.dedup.acquire(entity, OperationKind::ReactionHydrate) else {
            return Ok(ReactionOutcome::AlreadyInFlight);
        };
        let seen = self.ctx.liveness(entity);
        let viewer = self.ctx.identity.resolve();

        let records = self.ctx.services.reactions.list(entity).await.map_err(|err| {
            tracing::warn!(entity = %entity, "reaction list failed: {}", err);
            EngagementError::from(err)
        })?;
        if !self.ctx.is_live(entity, seen) {
            return Err(EngagementError::TornDown);
        }
        if self.ctx.dedup.is_busy(entity, OperationKind::Reaction) {
            return Ok(ReactionOutcome::AlreadyInFlight);
        }

        let summary = ReactionSummary::from_records(records, viewer.as_ref());
        self.summaries.insert(entity, summary.clone());
        Ok(ReactionOutcome::Updated(summary))
    }

    /// Current summary for `entity`
    #[must_use]
    pub fn summary(&self, entity: EntityId) -> ReactionSummary {
        self.summaries
            .get(&entity)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub(crate) fn forget(&self, entity: EntityId) {
        self.summaries.remove(&entity);
    }

    pub(crate) fn clear(&self) {
        self.summaries.clear();
    }

    /// Replace the optimistic summary with server truth; if the list call
    /// fails too, fall back to the summary from before the toggle.
    async fn resync(&self, entity: EntityId, seen: Liveness, fallback: Option<ReactionSummary>) {
        let viewer = self.ctx.identity.resolve();
        let listed = self.ctx.services.reactions.list(entity).await;
        if !self.ctx.is_live(entity, seen) {
            return;
        }
        match listed {
            Ok(records) => {
                let summary = ReactionSummary::from_records(records, viewer.as_ref());
                tracing::debug!(entity = %entity, total = summary.total, "reactions resynchronized");
                self.summaries.insert(entity, summary);
            }
            Err(err) => {
                tracing::warn!(entity = %entity, "reaction resync failed, restoring previous summary: {}", err);
                if let Some(previous) = fallback {
                    self.summaries.insert(entity, previous);
                }
            }
        }
    }
}
