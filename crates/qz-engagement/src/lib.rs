//! Quiz feed engagement engine
//!
//! Tracks what the viewer does with feed items and keeps the displayed
//! numbers honest:
//! - Records view events and counts each viewer once per item
//! - Toggles reactions optimistically, resynchronizing on failure
//! - Drives the per-question answer state machine
//! - Reconciles optimistic counters with server statistics after a settle window
//!
//! # Example
//!
//! ```rust,ignore
//! use qz_engagement::{EngagementConfig, EngagementStore, EntityId, Services, SessionCredential};
//! use std::sync::Arc;
//!
//! # async fn example(services: Services) -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Arc::new(SessionCredential::with_token("header.payload.sig"));
//! let store = EngagementStore::new(EngagementConfig::new(), services, credentials)?;
//!
//! store.record_view(EntityId(42)).await?;
//! store.toggle_reaction(EntityId(42), "like").await?;
//! println!("{:?}", store.statistics(EntityId(42)));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod answers;
pub mod config;
mod context;
pub mod counters;
pub mod dedup;
pub mod error;
pub mod identity;
pub mod reactions;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod types;
pub mod views;

// Re-exports for convenience
pub use answers::{AnswerOutcome, RejectReason, SelectionOutcome, SessionScore};
pub use config::EngagementConfig;
pub use counters::{CounterBoard, EntityCounters};
pub use dedup::{DedupGuard, InFlight, OperationKind};
pub use error::{ConfigError, EngagementError, IdentityError, ServiceError};
pub use identity::{decode_token, CredentialSource, IdentityResolver, SessionCredential};
pub use reactions::{ConfirmedReaction, ReactionOutcome, ReactionSummary};
pub use reconcile::Reconciler;
pub use service::{
    AnswerSubmission, AnswerVerdict, AnswersService, CreatedView, QuestionStats, ReactionAck,
    ReactionDto, ReactionsService, Services, UserRef, ViewDto, ViewsService,
};
pub use store::{EngagementStore, EntityHydration};
pub use types::{
    AnswerId, AnswerState, EntityId, Identity, IdentityKey, QuestionMode, ReactionKind, ViewRecord,
};
pub use views::{EngagementState, HydrateOutcome, UniqueViewCount, ViewOutcome, ViewStatistics};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the engagement engine
    pub use crate::{
        AnswerId, AnswerOutcome, EngagementConfig, EngagementError, EngagementStore, EntityId,
        QuestionMode, ReactionKind, ReactionOutcome, Services, SessionCredential, ViewOutcome,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
