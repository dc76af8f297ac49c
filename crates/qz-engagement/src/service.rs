//! Backing service seams
//!
//! The engine talks to three server collaborators. The traits describe the
//! shapes exchanged, not the transport; `qz-http` provides the HTTP
//! implementation and `qz-test-utils` an in-memory one.

use crate::error::ServiceError;
use crate::types::{AnswerId, EntityId, ReactionKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// User reference as embedded in server records
///
/// Accepts an object (`{"username": .., "id": ..}`), a bare id or a bare
/// username on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "UserRepr")]
pub struct UserRef {
    /// Username, if the server included it
    pub username: Option<String>,
    /// Numeric id, if the server included it
    pub id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserRepr {
    Id(i64),
    Name(String),
    Object {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        id: Option<i64>,
    },
}

impl From<UserRepr> for UserRef {
    fn from(repr: UserRepr) -> Self {
        match repr {
            UserRepr::Id(id) => Self {
                username: None,
                id: Some(id),
            },
            UserRepr::Name(name) => Self {
                username: Some(name),
                id: None,
            },
            UserRepr::Object { username, id } => Self { username, id },
        }
    }
}

/// View record as listed by the views service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDto {
    pub id: i64,
    pub question: EntityId,
    #[serde(default)]
    pub user: Option<UserRef>,
    pub created_at: DateTime<Utc>,
}

/// Result of creating a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedView {
    pub id: i64,
    #[serde(default)]
    pub user: Option<UserRef>,
    pub created_at: DateTime<Utc>,
}

/// Reaction record as listed by the reactions service
///
/// `reaction_type` stays raw so unknown kinds can be skipped instead of
/// failing the whole list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDto {
    pub id: i64,
    pub quiz: EntityId,
    pub user: UserRef,
    pub reaction_type: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a reaction upsert
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReactionAck {
    #[serde(default)]
    pub id: Option<i64>,
    /// Server removed the reaction (toggle-off)
    #[serde(default)]
    pub removed: bool,
}

/// Answer submission payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question: EntityId,
    pub selected_answers: Vec<AnswerId>,
    /// Seconds spent on the question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Server verdict for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerVerdict {
    pub is_correct: bool,
}

/// Authoritative per-question statistics
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionStats {
    pub view_count: u64,
    pub unique_viewers: u64,
    pub correct_count: u64,
    pub wrong_count: u64,
    pub accuracy: f64,
    pub average_time: f64,
}

/// Views collaborator
#[async_trait]
pub trait ViewsService: Debug + Send + Sync {
    /// List view records, optionally for one entity
    async fn list(&self, entity: Option<EntityId>) -> Result<Vec<ViewDto>, ServiceError>;

    /// Record a view by the current viewer
    async fn create(&self, entity: EntityId) -> Result<CreatedView, ServiceError>;
}

/// Reactions collaborator
#[async_trait]
pub trait ReactionsService: Debug + Send + Sync {
    /// List every reaction on an entity
    async fn list(&self, entity: EntityId) -> Result<Vec<ReactionDto>, ServiceError>;

    /// Toggle the current viewer's reaction
    async fn upsert(&self, entity: EntityId, kind: ReactionKind)
        -> Result<ReactionAck, ServiceError>;
}

/// Answers and statistics collaborator
#[async_trait]
pub trait AnswersService: Debug + Send + Sync {
    /// Submit an answer for judgement
    async fn submit(&self, submission: &AnswerSubmission) -> Result<AnswerVerdict, ServiceError>;

    /// Fetch authoritative statistics for an entity
    async fn stats(&self, entity: EntityId) -> Result<QuestionStats, ServiceError>;
}

/// The three collaborators the engine needs
#[derive(Debug, Clone)]
pub struct Services {
    pub views: Arc<dyn ViewsService>,
    pub reactions: Arc<dyn ReactionsService>,
    pub answers: Arc<dyn AnswersService>,
}

impl Services {
    /// Create from individual collaborators
    #[inline]
    #[must_use]
    pub fn new(
        views: Arc<dyn ViewsService>,
        reactions: Arc<dyn ReactionsService>,
        answers: Arc<dyn AnswersService>,
    ) -> Self {
        Self {
            views,
            reactions,
            answers,
        }
    }

    /// Use one backend for all three collaborators
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ViewsService + ReactionsService + AnswersService + 'static,
    {
        Self {
            views: backend.clone(),
            reactions: backend.clone(),
            answers: backend,
        }
    }
}
