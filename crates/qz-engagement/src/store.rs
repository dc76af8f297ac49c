//! Session-scoped engagement store
//!
//! One store is created per application session and handed to the feed by
//! reference. It owns every per-entity map and the pending reconciliations;
//! `reset` and `release` are the only ways state is discarded.

use crate::answers::{AnswerOutcome, AnswerTracker, SelectionOutcome, SessionScore};
use crate::config::EngagementConfig;
use crate::context::EngineContext;
use crate::counters::EntityCounters;
use crate::error::{ConfigError, EngagementError};
use crate::identity::{CredentialSource, IdentityResolver};
use crate::reactions::{ReactionLedger, ReactionOutcome, ReactionSummary};
use crate::service::Services;
use crate::types::{AnswerId, AnswerState, EntityId, Identity, QuestionMode};
use crate::views::{EngagementState, HydrateOutcome, UniqueViewCount, ViewOutcome, ViewStatistics, ViewTracker};
use futures::future::join_all;
use std::sync::Arc;

/// Result of hydrating one entity
#[derive(Debug)]
pub struct EntityHydration {
    pub entity: EntityId,
    pub views: Result<HydrateOutcome, EngagementError>,
    pub reactions: Result<ReactionOutcome, EngagementError>,
}

/// Engagement state for one session
#[derive(Debug)]
pub struct EngagementStore {
    ctx: Arc<EngineContext>,
    views: ViewTracker,
    reactions: ReactionLedger,
    answers: AnswerTracker,
}

impl EngagementStore {
    /// Create a store after validating `config`
    ///
    /// # Errors
    /// - `ConfigError::OutOfRange` when the configuration is invalid
    pub fn new(
        config: EngagementConfig,
        services: Services,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ctx = Arc::new(EngineContext::new(
            config,
            services,
            IdentityResolver::new(credentials),
        ));
        Ok(Self {
            views: ViewTracker::new(ctx.clone()),
            reactions: ReactionLedger::new(ctx.clone()),
            answers: AnswerTracker::new(ctx.clone()),
            ctx,
        })
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngagementConfig {
        &self.ctx.config
    }

    /// Viewer the next operation will act as
    #[must_use]
    pub fn current_identity(&self) -> Option<Identity> {
        self.ctx.identity.resolve()
    }

    // Views

    /// See [`ViewTracker::record_view`]
    ///
    /// # Errors
    /// Network failures and teardown, as documented on the tracker
    pub async fn record_view(&self, entity: EntityId) -> Result<ViewOutcome, EngagementError> {
        self.views.record_view(entity).await
    }

    /// See [`ViewTracker::hydrate_views`]
    ///
    /// # Errors
    /// Network failures and teardown, as documented on the tracker
    pub async fn hydrate_views(&self, entity: EntityId) -> Result<HydrateOutcome, EngagementError> {
        self.views.hydrate_views(entity).await
    }

    /// Pure read of view statistics
    #[must_use]
    pub fn statistics(&self, entity: EntityId) -> ViewStatistics {
        self.views.statistics(entity)
    }

    /// Unique-view count through the TTL cache
    pub async fn unique_view_count(&self, entity: EntityId) -> UniqueViewCount {
        self.views.unique_view_count(entity).await
    }

    /// Snapshot of an entity's view log
    #[must_use]
    pub fn engagement(&self, entity: EntityId) -> Option<EngagementState> {
        self.views.state(entity)
    }

    // Reactions

    /// See [`ReactionLedger::toggle_reaction`]
    ///
    /// # Errors
    /// Unknown kinds, network failures and teardown, as documented on the ledger
    pub async fn toggle_reaction(
        &self,
        entity: EntityId,
        kind: &str,
    ) -> Result<ReactionOutcome, EngagementError> {
        self.reactions.toggle_reaction(entity, kind).await
    }

    /// See [`ReactionLedger::hydrate_reactions`]
    ///
    /// # Errors
    /// Network failures and teardown, as documented on the ledger
    pub async fn hydrate_reactions(&self, entity: EntityId) -> Result<ReactionOutcome, EngagementError> {
        self.reactions.hydrate_reactions(entity).await
    }

    /// Current reaction summary
    #[must_use]
    pub fn reactions(&self, entity: EntityId) -> ReactionSummary {
        self.reactions.summary(entity)
    }

    // Answers

    /// See [`AnswerTracker::open_question`]
    pub fn open_question(&self, entity: EntityId, mode: QuestionMode) -> bool {
        self.answers.open_question(entity, mode)
    }

    /// See [`AnswerTracker::select_answer`]
    ///
    /// # Errors
    /// Network failures and teardown, as documented on the tracker
    pub async fn select_answer(
        &self,
        entity: EntityId,
        answer: AnswerId,
    ) -> Result<AnswerOutcome, EngagementError> {
        self.answers.select_answer(entity, answer).await
    }

    /// See [`AnswerTracker::toggle_selection`]
    pub fn toggle_selection(&self, entity: EntityId, answer: AnswerId) -> SelectionOutcome {
        self.answers.toggle_selection(entity, answer)
    }

    /// See [`AnswerTracker::submit_selection`]
    ///
    /// # Errors
    /// Network failures and teardown, as documented on the tracker
    pub async fn submit_selection(&self, entity: EntityId) -> Result<AnswerOutcome, EngagementError> {
        self.answers.submit_selection(entity).await
    }

    /// Answer state of a question
    #[must_use]
    pub fn answer_state(&self, entity: EntityId) -> AnswerState {
        self.answers.state(entity)
    }

    /// Multi-choice selection of a question
    #[must_use]
    pub fn selection(&self, entity: EntityId) -> Vec<AnswerId> {
        self.answers.selection(entity)
    }

    /// Verdicts received this session
    #[must_use]
    pub fn session_score(&self) -> SessionScore {
        self.answers.session_score()
    }

    // Counters and lifecycle

    /// Displayed counters (optimistic until reconciled)
    #[must_use]
    pub fn counters(&self, entity: EntityId) -> EntityCounters {
        self.ctx.counters.get(entity)
    }

    /// Whether a reconciliation is waiting or running for `entity`
    #[must_use]
    pub fn reconciliation_pending(&self, entity: EntityId) -> bool {
        self.ctx.reconciler.is_pending(entity)
    }

    /// Number of guarded network calls currently outstanding
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.ctx.dedup.in_flight()
    }

    /// Load views and reactions for many entities concurrently
    pub async fn hydrate(&self, entities: &[EntityId]) -> Vec<EntityHydration> {
        join_all(entities.iter().map(|&entity| async move {
            let (views, reactions) =
                futures::join!(self.hydrate_views(entity), self.hydrate_reactions(entity));
            EntityHydration {
                entity,
                views,
                reactions,
            }
        }))
        .await
    }

    /// Tear down one entity (scrolled away, filtered out)
    ///
    /// Its pending reconciliation is cancelled before its state is dropped,
    /// and operations still in flight for it skip their local writes.
    pub async fn release(&self, entity: EntityId) {
        self.ctx.retire(entity);
        self.ctx.reconciler.cancel(entity);
        self.views.forget(entity).await;
        self.reactions.forget(entity);
        self.answers.forget(entity);
        self.ctx.counters.remove(entity);
        tracing::debug!(entity = %entity, "entity released");
    }

    /// Discard all session state (filter change, leaving the feed)
    ///
    /// In-flight operations observe the new session generation and skip
    /// their local writes.
    pub fn reset(&self) {
        let epoch = self.ctx.advance_epoch();
        let cancelled = self.ctx.reconciler.cancel_all();
        self.views.clear();
        self.reactions.clear();
        self.answers.clear();
        self.ctx.counters.clear();
        tracing::info!(epoch, cancelled, "engagement session reset");
    }
}
