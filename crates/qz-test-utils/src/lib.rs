//! Testing utilities for the quiz feed engagement workspace
//!
//! Shared fixtures: an in-memory backend standing in for the views,
//! reactions and answers services, token helpers and a ready-made session.

#![allow(missing_docs)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use qz_engagement::{
    AnswerId, AnswerSubmission, AnswerVerdict, AnswersService, CreatedView, EngagementConfig,
    EngagementStore, EntityId, Identity, QuestionStats, ReactionAck, ReactionDto, ReactionKind,
    ReactionsService, ServiceError, Services, SessionCredential, UserRef, ViewDto, ViewsService,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Backend operations, for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListViews,
    CreateView,
    ListReactions,
    UpsertReaction,
    SubmitAnswer,
    Stats,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Times(usize),
    Always,
}

#[derive(Debug, Default)]
struct ServerState {
    next_id: i64,
    views: Vec<ViewDto>,
    reactions: Vec<ReactionDto>,
    answer_keys: HashMap<EntityId, BTreeSet<AnswerId>>,
    attempts: Vec<(EntityId, bool, f64)>,
    stats_overrides: HashMap<EntityId, QuestionStats>,
}

impl ServerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn stats(&self, entity: EntityId) -> QuestionStats {
        if let Some(stats) = self.stats_overrides.get(&entity) {
            return stats.clone();
        }
        let views: Vec<&ViewDto> = self.views.iter().filter(|v| v.question == entity).collect();
        let unique: HashSet<String> = views
            .iter()
            .filter_map(|v| v.user.as_ref().and_then(|u| u.username.clone()))
            .collect();
        let attempts: Vec<&(EntityId, bool, f64)> =
            self.attempts.iter().filter(|(e, _, _)| *e == entity).collect();
        let correct = attempts.iter().filter(|(_, ok, _)| *ok).count() as u64;
        let wrong = attempts.len() as u64 - correct;
        let answered = attempts.len() as f64;
        QuestionStats {
            view_count: views.len() as u64,
            unique_viewers: unique.len() as u64,
            correct_count: correct,
            wrong_count: wrong,
            accuracy: if answered > 0.0 { correct as f64 * 100.0 / answered } else { 0.0 },
            average_time: if answered > 0.0 {
                attempts.iter().map(|(_, _, t)| t).sum::<f64>() / answered
            } else {
                0.0
            },
        }
    }
}

/// In-memory stand-in for all three services
///
/// Requests act as the user set with [`InMemoryBackend::act_as`]. Any
/// operation can be made to fail or be held in flight behind a gate.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<ServerState>,
    acting: RwLock<Option<Identity>>,
    calls: Mutex<HashMap<Op, usize>>,
    failures: Mutex<HashMap<Op, Failure>>,
    gates: Mutex<HashMap<Op, Arc<Semaphore>>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryBackend {
    /// Create empty backend
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests from now on act as `identity`
    pub fn act_as(&self, identity: Option<Identity>) {
        *self.acting.write() = identity;
    }

    /// Set the correct answers for a question
    pub fn set_answer_key(&self, entity: EntityId, correct: impl IntoIterator<Item = i64>) {
        self.state
            .lock()
            .answer_keys
            .insert(entity, correct.into_iter().map(AnswerId).collect());
    }

    /// Make `stats` return fixed numbers for `entity`
    pub fn set_stats(&self, entity: EntityId, stats: QuestionStats) {
        self.state.lock().stats_overrides.insert(entity, stats);
    }

    /// Store a view by `username` directly on the server
    pub fn seed_view(&self, entity: EntityId, username: Option<&str>) {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.views.push(ViewDto {
            id,
            question: entity,
            user: username.map(|name| UserRef {
                username: Some(name.to_string()),
                id: None,
            }),
            created_at: Utc::now(),
        });
    }

    /// Store a reaction by `username` directly on the server
    pub fn seed_reaction(&self, entity: EntityId, username: &str, kind: &str) {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.reactions.retain(|r| !(r.quiz == entity && r.user.username.as_deref() == Some(username)));
        state.reactions.push(ReactionDto {
            id,
            quiz: entity,
            user: UserRef {
                username: Some(username.to_string()),
                id: None,
            },
            reaction_type: kind.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Fail the next `times` calls of `op`
    pub fn fail(&self, op: Op, times: usize) {
        self.failures.lock().insert(op, Failure::Times(times));
    }

    /// Fail every call of `op` until [`InMemoryBackend::recover`]
    pub fn fail_always(&self, op: Op) {
        self.failures.lock().insert(op, Failure::Always);
    }

    /// Stop failing `op`
    pub fn recover(&self, op: Op) {
        self.failures.lock().remove(&op);
    }

    /// Hold every call of `op` until permits are added to the returned gate
    pub fn gate(&self, op: Op) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.lock().insert(op, gate.clone());
        gate
    }

    /// Remove the gate on `op`, releasing nothing already waiting
    pub fn ungate(&self, op: Op) {
        self.gates.lock().remove(&op);
    }

    /// Delay every call by `latency`, so overlapping calls really overlap
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Calls of `op` that reached the backend
    #[must_use]
    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Server-side statistics, as `stats` would return them
    #[must_use]
    pub fn server_stats(&self, entity: EntityId) -> QuestionStats {
        self.state.lock().stats(entity)
    }

    /// Reactions stored server-side for `entity`
    #[must_use]
    pub fn server_reactions(&self, entity: EntityId) -> Vec<ReactionDto> {
        self.state
            .lock()
            .reactions
            .iter()
            .filter(|r| r.quiz == entity)
            .cloned()
            .collect()
    }

    async fn enter(&self, op: Op) -> Result<(), ServiceError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let gate = self.gates.lock().get(&op).cloned();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| ServiceError::Transport("gate closed".to_string()))?
                .forget();
        }

        let mut failures = self.failures.lock();
        match failures.get_mut(&op) {
            Some(Failure::Always) => Err(ServiceError::Transport(format!("{op:?} failed"))),
            Some(Failure::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(ServiceError::Transport(format!("{op:?} failed")))
            }
            _ => Ok(()),
        }
    }

    fn acting_user(&self) -> Option<UserRef> {
        self.acting.read().as_ref().map(|identity| UserRef {
            username: identity.username.clone(),
            id: identity.user_id,
        })
    }
}

#[async_trait]
impl ViewsService for InMemoryBackend {
    async fn list(&self, entity: Option<EntityId>) -> Result<Vec<ViewDto>, ServiceError> {
        self.enter(Op::ListViews).await?;
        Ok(self
            .state
            .lock()
            .views
            .iter()
            .filter(|v| entity.map_or(true, |e| v.question == e))
            .cloned()
            .collect())
    }

    async fn create(&self, entity: EntityId) -> Result<CreatedView, ServiceError> {
        self.enter(Op::CreateView).await?;
        let user = self.acting_user();
        let mut state = self.state.lock();
        let id = state.next_id();
        let created_at = Utc::now();
        state.views.push(ViewDto {
            id,
            question: entity,
            user: user.clone(),
            created_at,
        });
        Ok(CreatedView {
            id,
            user,
            created_at,
        })
    }
}

#[async_trait]
impl ReactionsService for InMemoryBackend {
    async fn list(&self, entity: EntityId) -> Result<Vec<ReactionDto>, ServiceError> {
        self.enter(Op::ListReactions).await?;
        Ok(self.server_reactions(entity))
    }

    async fn upsert(&self, entity: EntityId, kind: ReactionKind) -> Result<ReactionAck, ServiceError> {
        self.enter(Op::UpsertReaction).await?;
        let Some(user) = self.acting_user() else {
            return Err(ServiceError::status(401, "authentication required"));
        };

        let mut state = self.state.lock();
        let existing = state
            .reactions
            .iter()
            .position(|r| r.quiz == entity && r.user == user);
        match existing {
            Some(index) if state.reactions[index].reaction_type == kind.as_str() => {
                let removed = state.reactions.remove(index);
                Ok(ReactionAck {
                    id: Some(removed.id),
                    removed: true,
                })
            }
            Some(index) => {
                let record = &mut state.reactions[index];
                record.reaction_type = kind.as_str().to_string();
                record.created_at = Utc::now();
                Ok(ReactionAck {
                    id: Some(record.id),
                    removed: false,
                })
            }
            None => {
                let id = state.next_id();
                state.reactions.push(ReactionDto {
                    id,
                    quiz: entity,
                    user,
                    reaction_type: kind.as_str().to_string(),
                    created_at: Utc::now(),
                });
                Ok(ReactionAck {
                    id: Some(id),
                    removed: false,
                })
            }
        }
    }
}

#[async_trait]
impl AnswersService for InMemoryBackend {
    async fn submit(&self, submission: &AnswerSubmission) -> Result<AnswerVerdict, ServiceError> {
        self.enter(Op::SubmitAnswer).await?;
        let mut state = self.state.lock();
        let selected: BTreeSet<AnswerId> = submission.selected_answers.iter().copied().collect();
        let is_correct = state
            .answer_keys
            .get(&submission.question)
            .is_some_and(|key| *key == selected);
        state.attempts.push((
            submission.question,
            is_correct,
            submission.duration.unwrap_or(0.0),
        ));
        Ok(AnswerVerdict { is_correct })
    }

    async fn stats(&self, entity: EntityId) -> Result<QuestionStats, ServiceError> {
        self.enter(Op::Stats).await?;
        Ok(self.state.lock().stats(entity))
    }
}

/// Unsigned token carrying `username` and `user_id` claims
#[must_use]
pub fn token_for(username: &str, user_id: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "username": username, "user_id": user_id }).to_string(),
    );
    format!("{header}.{payload}.unsigned")
}

/// A store wired to an in-memory backend, with sign-in helpers
#[derive(Debug, Clone)]
pub struct TestSession {
    pub backend: Arc<InMemoryBackend>,
    pub credential: Arc<SessionCredential>,
    pub store: Arc<EngagementStore>,
}

impl TestSession {
    /// Anonymous session with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngagementConfig::default())
    }

    /// Anonymous session with `config`
    ///
    /// # Panics
    /// When `config` is invalid
    #[must_use]
    pub fn with_config(config: EngagementConfig) -> Self {
        Self::on_backend(InMemoryBackend::new(), config)
    }

    /// Anonymous session sharing `backend` with other sessions
    ///
    /// # Panics
    /// When `config` is invalid
    #[must_use]
    pub fn on_backend(backend: Arc<InMemoryBackend>, config: EngagementConfig) -> Self {
        let credential = Arc::new(SessionCredential::new());
        let store = EngagementStore::new(
            config,
            Services::from_backend(backend.clone()),
            credential.clone(),
        )
        .expect("test config must be valid");
        Self {
            backend,
            credential,
            store: Arc::new(store),
        }
    }

    /// Session signed in as `username`
    #[must_use]
    pub fn signed_in(username: &str, user_id: i64) -> Self {
        let session = Self::new();
        session.sign_in(username, user_id);
        session
    }

    /// Switch both the stored token and the backend's acting user
    pub fn sign_in(&self, username: &str, user_id: i64) {
        self.credential.set(token_for(username, user_id));
        self.backend
            .act_as(Some(Identity::named(username).with_user_id(user_id)));
    }

    /// Forget the token; requests become anonymous
    pub fn sign_out(&self) {
        self.credential.clear();
        self.backend.act_as(None);
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}
