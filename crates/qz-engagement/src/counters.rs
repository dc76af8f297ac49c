//! Displayed aggregate counters per entity
//!
//! These are the numbers the feed shows. Local operations bump them
//! optimistically; reconciliation overwrites them with server truth.

use crate::service::QuestionStats;
use crate::types::EntityId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Aggregate counters for one entity
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EntityCounters {
    pub views: u64,
    pub unique_viewers: u64,
    pub correct: u64,
    pub wrong: u64,
    /// Percentage of correct answers, `None` before any answer
    pub accuracy: Option<f64>,
    /// Average answer time in seconds, known only from the server
    pub average_time: Option<f64>,
    /// When server truth last overwrote these counters
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl EntityCounters {
    fn recompute_accuracy(&mut self) {
        let answered = self.correct + self.wrong;
        self.accuracy = (answered > 0).then(|| self.correct as f64 * 100.0 / answered as f64);
    }
}

/// Counter store keyed by entity
#[derive(Debug, Default)]
pub struct CounterBoard {
    entries: DashMap<EntityId, EntityCounters>,
}

impl CounterBoard {
    /// Create empty board
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of an entity's counters (zeroes when untouched)
    #[must_use]
    pub fn get(&self, entity: EntityId) -> EntityCounters {
        self.entries
            .get(&entity)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Optimistically count a recorded view
    pub fn record_view(&self, entity: EntityId, first_for_viewer: bool) {
        let mut counters = self.entries.entry(entity).or_default();
        counters.views += 1;
        if first_for_viewer {
            counters.unique_viewers += 1;
        }
    }

    /// Optimistically count a judged answer
    pub fn record_verdict(&self, entity: EntityId, correct: bool) {
        let mut counters = self.entries.entry(entity).or_default();
        if correct {
            counters.correct += 1;
        } else {
            counters.wrong += 1;
        }
        counters.recompute_accuracy();
    }

    /// Replace an entity's counters with server statistics
    pub fn overwrite(&self, entity: EntityId, stats: &QuestionStats) {
        let mut unique_viewers = stats.unique_viewers;
        if unique_viewers > stats.view_count {
            tracing::warn!(
                entity = %entity,
                unique_viewers,
                views = stats.view_count,
                "server reported more unique viewers than views, clamping"
            );
            unique_viewers = stats.view_count;
        }

        self.entries.insert(
            entity,
            EntityCounters {
                views: stats.view_count,
                unique_viewers,
                correct: stats.correct_count,
                wrong: stats.wrong_count,
                accuracy: Some(stats.accuracy),
                average_time: Some(stats.average_time),
                reconciled_at: Some(Utc::now()),
            },
        );
    }

    /// Drop an entity's counters
    pub fn remove(&self, entity: EntityId) {
        self.entries.remove(&entity);
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimistic_bumps() {
        let board = CounterBoard::new();
        let e = EntityId(1);
        board.record_view(e, true);
        board.record_view(e, false);
        board.record_verdict(e, true);
        board.record_verdict(e, false);
        board.record_verdict(e, true);

        let c = board.get(e);
        assert_eq!((c.views, c.unique_viewers), (2, 1));
        assert_eq!((c.correct, c.wrong), (2, 1));
        let accuracy = c.accuracy.unwrap();
        assert!((accuracy - 66.666).abs() < 0.01);
        assert!(c.reconciled_at.is_none());
    }

    #[test]
    fn overwrite_replaces_wholesale_and_clamps() {
        let board = CounterBoard::new();
        let e = EntityId(2);
        board.record_verdict(e, true);

        board.overwrite(
            e,
            &QuestionStats {
                view_count: 3,
                unique_viewers: 5,
                correct_count: 0,
                wrong_count: 4,
                accuracy: 0.0,
                average_time: 12.5,
            },
        );

        let c = board.get(e);
        assert_eq!(c.views, 3);
        assert_eq!(c.unique_viewers, 3);
        assert_eq!((c.correct, c.wrong), (0, 4));
        assert_eq!(c.average_time, Some(12.5));
        assert!(c.reconciled_at.is_some());
    }
}
