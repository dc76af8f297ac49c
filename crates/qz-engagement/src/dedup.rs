//! In-flight deduplication per (entity, operation kind)
//!
//! At most one network call of a given kind may be outstanding for an entity.
//! A busy acquire is dropped by the caller, never queued. Release is tied to
//! the [`InFlight`] guard's drop, so it happens on every exit path, including
//! a caller dropping the future mid-flight.

use crate::types::EntityId;
use dashmap::DashSet;

/// Guarded operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// View creation
    View,
    /// Reaction toggle (including its resync on failure)
    Reaction,
    /// View list hydration
    ViewHydrate,
    /// Reaction list hydration
    ReactionHydrate,
}

/// Per-(entity, kind) in-flight lock
#[derive(Debug, Default)]
pub struct DedupGuard {
    in_flight: DashSet<(EntityId, OperationKind)>,
}

impl DedupGuard {
    /// Create empty guard
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `(entity, kind)`
    ///
    /// Returns `None` when an operation of that kind is already outstanding.
    #[must_use]
    pub fn acquire(&self, entity: EntityId, kind: OperationKind) -> Option<InFlight<'_>> {
        if self.in_flight.insert((entity, kind)) {
            Some(InFlight {
                guard: self,
                entity,
                kind,
            })
        } else {
            tracing::debug!(entity = %entity, ?kind, "operation already in flight");
            None
        }
    }

    /// Check whether `(entity, kind)` is currently claimed
    #[inline]
    #[must_use]
    pub fn is_busy(&self, entity: EntityId, kind: OperationKind) -> bool {
        self.in_flight.contains(&(entity, kind))
    }

    /// Number of outstanding guarded operations
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn release(&self, entity: EntityId, kind: OperationKind) {
        self.in_flight.remove(&(entity, kind));
    }
}

/// Scope guard for a claimed slot; releases on drop
#[derive(Debug)]
#[must_use = "dropping the guard releases the slot immediately"]
pub struct InFlight<'a> {
    guard: &'a DedupGuard,
    entity: EntityId,
    kind: OperationKind,
}

impl InFlight<'_> {
    /// Entity this slot belongs to
    #[inline]
    #[must_use]
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Operation kind of this slot
    #[inline]
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.guard.release(self.entity, self.kind);
    }
}
