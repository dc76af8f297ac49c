//! Delayed authoritative refetch of entity statistics
//!
//! After an optimistic mutation the entity's server statistics are refetched
//! once the settle window has passed, and the displayed counters are
//! overwritten with them (server truth always wins).
//!
//! - Triggers arriving while a refetch is waiting collapse into it.
//! - A trigger arriving while the fetch is on the wire queues exactly one
//!   follow-up refetch.
//! - Each pending refetch carries a ticket. Teardown drops the ticket and
//!   aborts the task; a continuation whose ticket is gone writes nothing.

use crate::counters::CounterBoard;
use crate::service::AnswersService;
use crate::types::EntityId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Fetching,
}

#[derive(Debug)]
struct Pending {
    ticket: u64,
    phase: Phase,
    rerun: bool,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Inner {
    answers: Arc<dyn AnswersService>,
    counters: Arc<CounterBoard>,
    delay: Duration,
    pending: Mutex<HashMap<EntityId, Pending>>,
    next_ticket: AtomicU64,
}

/// Debounced, cancellable stats refetch scheduler
#[derive(Debug, Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    /// Create scheduler writing into `counters` after `delay`
    #[must_use]
    pub fn new(
        answers: Arc<dyn AnswersService>,
        counters: Arc<CounterBoard>,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                answers,
                counters,
                delay,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    /// Queue a refetch for `entity`
    ///
    /// Must be called from within a tokio runtime. Returns `true` when a new
    /// refetch was spawned, `false` when the trigger collapsed into one that
    /// is already pending.
    pub fn schedule(&self, entity: EntityId) -> bool {
        let mut pending = self.inner.pending.lock();
        if let Some(existing) = pending.get_mut(&entity) {
            if existing.phase == Phase::Fetching {
                existing.rerun = true;
            }
            tracing::debug!(entity = %entity, "reconciliation already pending, collapsing trigger");
            return false;
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(run(self.inner.clone(), entity, ticket));
        pending.insert(
            entity,
            Pending {
                ticket,
                phase: Phase::Waiting,
                rerun: false,
                handle: Some(handle),
            },
        );
        tracing::debug!(entity = %entity, ticket, "reconciliation scheduled");
        true
    }

    /// Cancel the pending refetch for `entity`, if any
    pub fn cancel(&self, entity: EntityId) -> bool {
        let removed = self.inner.pending.lock().remove(&entity);
        match removed {
            Some(pending) => {
                if let Some(handle) = pending.handle {
                    handle.abort();
                }
                tracing::debug!(entity = %entity, "reconciliation cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending refetch
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Pending> = self.inner.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            if let Some(handle) = pending.handle {
                handle.abort();
            }
        }
        if count > 0 {
            tracing::debug!(count, "cancelled pending reconciliations");
        }
        count
    }

    /// Check whether a refetch is pending for `entity`
    #[inline]
    #[must_use]
    pub fn is_pending(&self, entity: EntityId) -> bool {
        self.inner.pending.lock().contains_key(&entity)
    }

    /// Number of pending refetches
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Configured settle window
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }
}

async fn run(inner: Arc<Inner>, entity: EntityId, ticket: u64) {
    loop {
        tokio::time::sleep(inner.delay).await;

        {
            let mut pending = inner.pending.lock();
            let Some(entry) = pending.get_mut(&entity).filter(|p| p.ticket == ticket) else {
                return;
            };
            entry.phase = Phase::Fetching;
        }

        let result = inner.answers.stats(entity).await;

        // The pending lock is held while writing so teardown cannot interleave.
        let mut pending = inner.pending.lock();
        let Some(entry) = pending.get_mut(&entity).filter(|p| p.ticket == ticket) else {
            tracing::debug!(entity = %entity, "entity torn down, dropping reconciliation result");
            return;
        };

        match result {
            Ok(stats) => {
                inner.counters.overwrite(entity, &stats);
                tracing::info!(
                    entity = %entity,
                    views = stats.view_count,
                    correct = stats.correct_count,
                    wrong = stats.wrong_count,
                    "counters reconciled with server"
                );
            }
            Err(err) => {
                tracing::warn!(entity = %entity, "reconciliation fetch failed, keeping local counters: {}", err);
            }
        }

        if entry.rerun {
            entry.rerun = false;
            entry.phase = Phase::Waiting;
            continue;
        }
        pending.remove(&entity);
        return;
    }
}
