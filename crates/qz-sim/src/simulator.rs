//! Burst simulator
//!
//! Drives several viewer sessions against one in-memory backend with a
//! seeded mix of views, reactions, answers and hydrations. Every action is
//! issued twice concurrently (a double tap) and failures are injected at
//! random. After the burst settles, each session is checked against the
//! backend.
//!
//! Invariants checked:
//! - A double tap reaches the backend at most once
//! - View counts move by exactly what the recorded outcome says
//! - Unique views never exceed total views
//! - Reaction totals equal the per-kind sum
//! - Answered questions never submit again
//! - No reconciliation is left pending once the burst settles
//! - Each viewer's own reaction matches the server record

use futures::join;
use qz_engagement::{
    AnswerId, AnswerOutcome, EngagementConfig, EngagementError, EntityId, Identity, ReactionKind,
    ReactionOutcome, ReactionSummary, RejectReason, ViewOutcome,
};
use qz_test_utils::{InMemoryBackend, Op, TestSession};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

/// Simulator configuration
#[derive(Debug, Clone)]
pub(crate) struct BurstConfig {
    /// Random seed for reproducibility
    pub(crate) seed: u64,
    /// Quiz items in the feed
    pub(crate) entities: usize,
    /// Distinct signed-in viewers
    pub(crate) viewers: usize,
    /// Double-tapped actions to issue
    pub(crate) actions: usize,
    /// Probability that an action's backend call fails
    pub(crate) failure_rate: f64,
    /// Engine settings for every session
    pub(crate) engine: EngagementConfig,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            entities: 8,
            viewers: 4,
            actions: 500,
            failure_rate: 0.1,
            engine: EngagementConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    View,
    React(ReactionKind),
    Answer(AnswerId),
    Hydrate,
}

impl Action {
    fn random(rng: &mut StdRng) -> Self {
        match rng.random_range(0..10) {
            0..=3 => Action::View,
            4..=6 => Action::React(ReactionKind::ALL[rng.random_range(0..ReactionKind::ALL.len())]),
            7..=8 => Action::Answer(AnswerId(rng.random_range(1..=3))),
            _ => Action::Hydrate,
        }
    }

    fn op(self) -> Op {
        match self {
            Action::View => Op::CreateView,
            Action::React(_) => Op::UpsertReaction,
            Action::Answer(_) => Op::SubmitAnswer,
            Action::Hydrate => Op::ListViews,
        }
    }
}

/// A violation detected during simulation
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Violation {
    /// A double tap sent more than one request
    DuplicateCall { step: usize, op: Op, calls: usize },
    /// Local view counts moved differently from the reported outcome
    ViewCountDrift {
        step: usize,
        entity: EntityId,
        expected: (u64, u64),
        actual: (u64, u64),
    },
    /// More unique viewers than views
    UniqueExceedsTotal {
        entity: EntityId,
        unique: u64,
        total: u64,
    },
    /// Reaction total differs from the per-kind sum
    ReactionTotalDrift {
        entity: EntityId,
        total: u32,
        sum: u32,
    },
    /// A viewer's own reaction disagrees with the server
    ReactionMismatch {
        viewer: String,
        entity: EntityId,
        local: Option<ReactionKind>,
        server: Option<ReactionKind>,
    },
    /// An answered question accepted another answer
    AnswerAfterTerminal { step: usize, entity: EntityId },
    /// Reconciliation still pending after the burst settled
    ReconciliationStuck { viewer: String, entity: EntityId },
    /// An outcome no path should produce
    Unexpected { step: usize, detail: String },
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BurstStats {
    pub(crate) actions: u64,
    pub(crate) views_recorded: u64,
    pub(crate) reactions_toggled: u64,
    pub(crate) answers_judged: u64,
    pub(crate) answers_rejected: u64,
    pub(crate) hydrations: u64,
    pub(crate) taps_collapsed: u64,
    pub(crate) network_failures: u64,
    pub(crate) reconciliation_fetches: u64,
}

/// Final report from simulator
#[derive(Debug, Clone)]
pub(crate) struct BurstReport {
    pub(crate) config: BurstConfig,
    pub(crate) stats: BurstStats,
    pub(crate) violations: Vec<Violation>,
}

impl BurstReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub(crate) fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub(crate) fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Engagement Burst Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!(
            "Entities: {}  Viewers: {}  Failure rate: {:.2}\n",
            self.config.entities, self.config.viewers, self.config.failure_rate
        ));
        report.push_str(&format!("Actions: {}\n", self.stats.actions));
        report.push_str(&format!("Views Recorded: {}\n", self.stats.views_recorded));
        report.push_str(&format!("Reactions Toggled: {}\n", self.stats.reactions_toggled));
        report.push_str(&format!("Answers Judged: {}\n", self.stats.answers_judged));
        report.push_str(&format!("Answers Rejected: {}\n", self.stats.answers_rejected));
        report.push_str(&format!("Hydrations: {}\n", self.stats.hydrations));
        report.push_str(&format!("Double Taps Collapsed: {}\n", self.stats.taps_collapsed));
        report.push_str(&format!("Network Failures: {}\n", self.stats.network_failures));
        report.push_str(&format!(
            "Reconciliation Fetches: {}\n",
            self.stats.reconciliation_fetches
        ));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

struct Viewer {
    name: String,
    id: i64,
    session: TestSession,
}

impl Viewer {
    fn identity(&self) -> Identity {
        Identity::named(&self.name).with_user_id(self.id)
    }
}

struct Burst {
    backend: Arc<InMemoryBackend>,
    stats: BurstStats,
    violations: Vec<Violation>,
}

/// Run the burst simulator
pub(crate) async fn run_burst(config: BurstConfig) -> BurstReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let backend = InMemoryBackend::new();
    backend.set_latency(Some(Duration::from_millis(1)));

    let entities: Vec<EntityId> = (1..=config.entities as i64).map(EntityId).collect();
    for &entity in &entities {
        backend.set_answer_key(entity, [1]);
    }
    let viewers: Vec<Viewer> = (0..config.viewers)
        .map(|i| Viewer {
            name: format!("viewer-{i}"),
            id: i as i64 + 1,
            session: TestSession::on_backend(backend.clone(), config.engine.clone()),
        })
        .collect();

    let mut burst = Burst {
        backend,
        stats: BurstStats::default(),
        violations: Vec::new(),
    };

    for step in 0..config.actions {
        let viewer = &viewers[rng.random_range(0..viewers.len())];
        let entity = entities[rng.random_range(0..entities.len())];
        let action = Action::random(&mut rng);

        viewer.session.sign_in(&viewer.name, viewer.id);
        if rng.random_bool(config.failure_rate) {
            burst.backend.fail(action.op(), 1);
        }
        burst.run_action(step, viewer, entity, action).await;
        burst.backend.recover(action.op());
        burst.stats.actions += 1;
    }

    tokio::time::sleep(config.engine.reconcile_delay() + Duration::from_millis(500)).await;
    burst.stats.reconciliation_fetches = burst.backend.calls(Op::Stats) as u64;
    for viewer in &viewers {
        viewer.session.sign_in(&viewer.name, viewer.id);
        for &entity in &entities {
            burst.check_settled(viewer, entity).await;
        }
    }

    tracing::info!(
        actions = burst.stats.actions,
        violations = burst.violations.len(),
        "burst finished"
    );
    BurstReport {
        config,
        stats: burst.stats,
        violations: burst.violations,
    }
}

impl Burst {
    async fn run_action(&mut self, step: usize, viewer: &Viewer, entity: EntityId, action: Action) {
        let store = &viewer.session.store;
        let op = action.op();
        let calls_before = self.backend.calls(op);

        match action {
            Action::View => {
                let before = store.statistics(entity);
                let (first, second) = join!(store.record_view(entity), store.record_view(entity));
                self.collapsed(step, second.map(|o| o == ViewOutcome::AlreadyInFlight));

                let expected = match first {
                    Ok(ViewOutcome::Recorded {
                        first_for_viewer, ..
                    }) => {
                        self.stats.views_recorded += 1;
                        (before.total_views + 1, before.unique_views + u64::from(first_for_viewer))
                    }
                    Ok(ViewOutcome::AlreadyInFlight) => {
                        self.unexpected(step, "first tap reported in flight");
                        (before.total_views, before.unique_views)
                    }
                    Err(err) => {
                        self.failure(step, &err);
                        (before.total_views, before.unique_views)
                    }
                };
                let after = store.statistics(entity);
                let actual = (after.total_views, after.unique_views);
                if actual != expected {
                    self.violations.push(Violation::ViewCountDrift {
                        step,
                        entity,
                        expected,
                        actual,
                    });
                }
                self.check_unique(entity, after.unique_views, after.total_views);
            }
            Action::React(kind) => {
                let (first, second) = join!(
                    store.toggle_reaction(entity, kind.as_str()),
                    store.toggle_reaction(entity, kind.as_str())
                );
                self.collapsed(step, second.map(|o| o == ReactionOutcome::AlreadyInFlight));
                match first {
                    Ok(_) => self.stats.reactions_toggled += 1,
                    Err(err) => self.failure(step, &err),
                }
                self.check_reaction_total(entity, &store.reactions(entity));
            }
            Action::Answer(answer) => {
                let was_terminal = store.answer_state(entity).is_terminal();
                let (first, second) = join!(
                    store.select_answer(entity, answer),
                    store.select_answer(entity, answer)
                );
                let rejected_as = |result: &Result<AnswerOutcome, EngagementError>, reason: RejectReason| {
                    matches!(result, Ok(AnswerOutcome::Rejected(r)) if *r == reason)
                };

                if was_terminal {
                    let both_rejected = rejected_as(&first, RejectReason::AlreadyAnswered)
                        && rejected_as(&second, RejectReason::AlreadyAnswered);
                    if !both_rejected || self.backend.calls(op) != calls_before {
                        self.violations
                            .push(Violation::AnswerAfterTerminal { step, entity });
                    }
                    self.stats.answers_rejected += 2;
                    return;
                }

                if rejected_as(&second, RejectReason::SubmissionPending) {
                    self.stats.taps_collapsed += 1;
                    self.stats.answers_rejected += 1;
                } else {
                    self.unexpected(step, &format!("second answer tap returned {second:?}"));
                }
                match first {
                    Ok(AnswerOutcome::Judged { .. }) => self.stats.answers_judged += 1,
                    Ok(AnswerOutcome::Rejected(reason)) => {
                        self.unexpected(step, &format!("open question rejected: {reason:?}"));
                    }
                    Err(err) => self.failure(step, &err),
                }
            }
            Action::Hydrate => {
                for hydration in store.hydrate(&[entity]).await {
                    match hydration.views {
                        Ok(_) => self.stats.hydrations += 1,
                        Err(err) => self.failure(step, &err),
                    }
                    if let Err(err) = hydration.reactions {
                        self.failure(step, &err);
                    }
                }
                let stats = store.statistics(entity);
                self.check_unique(entity, stats.unique_views, stats.total_views);
                self.check_reaction_total(entity, &store.reactions(entity));
                return;
            }
        }

        let calls = self.backend.calls(op) - calls_before;
        if calls > 1 {
            self.violations
                .push(Violation::DuplicateCall { step, op, calls });
        }
    }

    async fn check_settled(&mut self, viewer: &Viewer, entity: EntityId) {
        let store = &viewer.session.store;
        if store.reconciliation_pending(entity) {
            self.violations.push(Violation::ReconciliationStuck {
                viewer: viewer.name.clone(),
                entity,
            });
        }
        let counters = store.counters(entity);
        self.check_unique(entity, counters.unique_viewers, counters.views);

        let server = ReactionSummary::from_records(
            self.backend.server_reactions(entity),
            Some(&viewer.identity()),
        );
        let local = store.reactions(entity);
        if local.current_user_kind() != server.current_user_kind() {
            self.violations.push(Violation::ReactionMismatch {
                viewer: viewer.name.clone(),
                entity,
                local: local.current_user_kind(),
                server: server.current_user_kind(),
            });
        }
    }

    fn collapsed(&mut self, step: usize, second: Result<bool, EngagementError>) {
        match second {
            Ok(true) => self.stats.taps_collapsed += 1,
            other => self.unexpected(step, &format!("second tap was not collapsed: {other:?}")),
        }
    }

    fn failure(&mut self, step: usize, err: &EngagementError) {
        match err {
            EngagementError::Network(_) => self.stats.network_failures += 1,
            other => self.unexpected(step, &other.to_string()),
        }
    }

    fn unexpected(&mut self, step: usize, detail: &str) {
        tracing::warn!(step, "unexpected outcome: {}", detail);
        self.violations.push(Violation::Unexpected {
            step,
            detail: detail.to_string(),
        });
    }

    fn check_unique(&mut self, entity: EntityId, unique: u64, total: u64) {
        if unique > total {
            self.violations.push(Violation::UniqueExceedsTotal {
                entity,
                unique,
                total,
            });
        }
    }

    fn check_reaction_total(&mut self, entity: EntityId, summary: &ReactionSummary) {
        let sum: u32 = summary.per_kind().values().sum();
        if summary.total() != sum {
            self.violations.push(Violation::ReactionTotalDrift {
                entity,
                total: summary.total(),
                sum,
            });
        }
    }
}
