//! Core types for the engagement engine
//!
//! Defines:
//! - Entity and answer identifiers
//! - Viewer identity and its deduplication key
//! - View records
//! - The closed set of reaction kinds
//! - Answer state machine states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngagementError;

/// Quiz item (question) identifier, owned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Answer option identifier within a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerId(pub i64);

impl fmt::Display for AnswerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved viewer reference
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Username, when the credential carries one
    pub username: Option<String>,
    /// Numeric user id, when the credential carries one
    pub user_id: Option<i64>,
}

impl Identity {
    /// Identity known by username only
    #[inline]
    #[must_use]
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            user_id: None,
        }
    }

    /// Attach a user id
    #[inline]
    #[must_use]
    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Deduplication key: username first, then the numeric id.
    ///
    /// Returns `None` for an identity that carries neither.
    #[must_use]
    pub fn key(&self) -> Option<IdentityKey> {
        match (&self.username, self.user_id) {
            (Some(name), _) if !name.is_empty() => Some(IdentityKey(name.clone())),
            (_, Some(id)) => Some(IdentityKey(format!("user:{id}"))),
            _ => None,
        }
    }

    /// Check whether this identity refers to the given username or id
    #[must_use]
    pub fn matches(&self, username: Option<&str>, user_id: Option<i64>) -> bool {
        match (self.username.as_deref(), username) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => matches!((self.user_id, user_id), (Some(a), Some(b)) if a == b),
        }
    }
}

/// Key used to count a viewer once per entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(pub String);

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded view event, repeats included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    /// Server-assigned record id
    pub id: i64,
    /// Viewed entity
    pub entity: EntityId,
    /// Viewer, `None` when anonymous
    pub identity: Option<Identity>,
    /// Server timestamp of the view
    pub created_at: DateTime<Utc>,
}

/// Closed set of reaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
}

impl ReactionKind {
    /// All kinds, in display order
    pub const ALL: [ReactionKind; 6] = [
        ReactionKind::Like,
        ReactionKind::Love,
        ReactionKind::Haha,
        ReactionKind::Wow,
        ReactionKind::Sad,
        ReactionKind::Angry,
    ];

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Love => "love",
            ReactionKind::Haha => "haha",
            ReactionKind::Wow => "wow",
            ReactionKind::Sad => "sad",
            ReactionKind::Angry => "angry",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = EngagementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| EngagementError::UnknownReactionKind(s.to_string()))
    }
}

/// Answer state for one question in the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerState {
    /// Nothing chosen yet
    Unanswered,
    /// Multi-choice selection in progress
    Selecting,
    /// Submission call outstanding
    Submitting,
    /// Server judged the answer correct (terminal)
    Correct,
    /// Server judged the answer wrong (terminal)
    Incorrect,
}

impl AnswerState {
    /// Terminal states accept no further input this session
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnswerState::Correct | AnswerState::Incorrect)
    }
}

/// How a question accepts answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionMode {
    /// One tap submits
    Single,
    /// Toggle options, then submit explicitly
    Multi,
}
