//! Answer submission state machine
//!
//! Per question: `Unanswered -> (Selecting ->) Submitting -> Correct | Incorrect`.
//! Double submission is prevented by the state itself. A failed submission
//! returns the question to where it was so the viewer can retry.

use crate::context::EngineContext;
use crate::error::EngagementError;
use crate::service::AnswerSubmission;
use crate::types::{AnswerId, AnswerState, EntityId, QuestionMode};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;

/// Why an answer action was refused client-side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The question already has a verdict this session
    AlreadyAnswered,
    /// A submission for the question is outstanding
    SubmissionPending,
    /// Submit requested with nothing selected
    EmptySelection,
    /// Single-choice action on a multi-choice question or vice versa
    ModeMismatch,
}

/// Result of a submitting action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Server judged the answer
    Judged { correct: bool },
    /// Refused without contacting the server
    Rejected(RejectReason),
}

/// Result of toggling a multi-choice option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Selection after the toggle
    Selection {
        state: AnswerState,
        selected: Vec<AnswerId>,
    },
    /// Refused; selection unchanged
    Rejected(RejectReason),
}

/// Answers given during this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionScore {
    pub answered: u64,
    pub correct: u64,
    pub wrong: u64,
}

#[derive(Debug, Clone)]
struct QuestionProgress {
    mode: QuestionMode,
    state: AnswerState,
    selection: BTreeSet<AnswerId>,
    opened_at: Instant,
}

impl QuestionProgress {
    fn new(mode: QuestionMode) -> Self {
        Self {
            mode,
            state: AnswerState::Unanswered,
            selection: BTreeSet::new(),
            opened_at: Instant::now(),
        }
    }

    fn check_open(&self, mode: QuestionMode) -> Result<(), RejectReason> {
        if self.mode != mode {
            return Err(RejectReason::ModeMismatch);
        }
        match self.state {
            AnswerState::Unanswered | AnswerState::Selecting => Ok(()),
            AnswerState::Submitting => Err(RejectReason::SubmissionPending),
            AnswerState::Correct | AnswerState::Incorrect => Err(RejectReason::AlreadyAnswered),
        }
    }

    fn begin_submission(&mut self, entity: EntityId) -> AnswerSubmission {
        self.state = AnswerState::Submitting;
        AnswerSubmission {
            question: entity,
            selected_answers: self.selection.iter().copied().collect(),
            duration: Some(self.opened_at.elapsed().as_secs_f64()),
        }
    }
}

/// Tracks answer state per question
#[derive(Debug)]
pub struct AnswerTracker {
    ctx: Arc<EngineContext>,
    progress: DashMap<EntityId, QuestionProgress>,
}

impl AnswerTracker {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            progress: DashMap::new(),
        }
    }

    /// Start the answer clock for a question and fix its mode
    ///
    /// Returns `false` when the question was already open; its mode is kept.
    pub fn open_question(&self, entity: EntityId, mode: QuestionMode) -> bool {
        let mut opened = false;
        self.progress.entry(entity).or_insert_with(|| {
            opened = true;
            QuestionProgress::new(mode)
        });
        opened
    }

    /// Single-choice: pick `answer` and submit it
    ///
    /// # Errors
    /// - `EngagementError::Network` when submission fails; the question is
    ///   back to `Unanswered`
    /// - `EngagementError::TornDown` when the question was discarded meanwhile
    pub async fn select_answer(
        &self,
        entity: EntityId,
        answer: AnswerId,
    ) -> Result<AnswerOutcome, EngagementError> {
        let submission = {
            let mut progress = self
                .progress
                .entry(entity)
                .or_insert_with(|| QuestionProgress::new(QuestionMode::Single));
            if let Err(reason) = progress.check_open(QuestionMode::Single) {
                tracing::debug!(entity = %entity, ?reason, "answer rejected");
                return Ok(AnswerOutcome::Rejected(reason));
            }
            progress.selection = BTreeSet::from([answer]);
            progress.begin_submission(entity)
        };
        self.submit(entity, submission, AnswerState::Unanswered).await
    }

    /// Multi-choice: add or remove `answer` from the selection
    pub fn toggle_selection(&self, entity: EntityId, answer: AnswerId) -> SelectionOutcome {
        let mut progress = self
            .progress
            .entry(entity)
            .or_insert_with(|| QuestionProgress::new(QuestionMode::Multi));
        if let Err(reason) = progress.check_open(QuestionMode::Multi) {
            return SelectionOutcome::Rejected(reason);
        }

        if !progress.selection.remove(&answer) {
            progress.selection.insert(answer);
        }
        progress.state = if progress.selection.is_empty() {
            AnswerState::Unanswered
        } else {
            AnswerState::Selecting
        };
        SelectionOutcome::Selection {
            state: progress.state,
            selected: progress.selection.iter().copied().collect(),
        }
    }

    /// Multi-choice: submit the current selection
    ///
    /// # Errors
    /// - `EngagementError::Network` when submission fails; the question is
    ///   back to `Selecting` with its selection intact
    /// - `EngagementError::TornDown` when the question was discarded meanwhile
    pub async fn submit_selection(&self, entity: EntityId) -> Result<AnswerOutcome, EngagementError> {
        let submission = {
            let Some(mut progress) = self.progress.get_mut(&entity) else {
                return Ok(AnswerOutcome::Rejected(RejectReason::EmptySelection));
            };
            if let Err(reason) = progress.check_open(QuestionMode::Multi) {
                return Ok(AnswerOutcome::Rejected(reason));
            }
            if progress.selection.is_empty() {
                return Ok(AnswerOutcome::Rejected(RejectReason::EmptySelection));
            }
            progress.begin_submission(entity)
        };
        self.submit(entity, submission, AnswerState::Selecting).await
    }

    /// Current state (`Unanswered` for untouched questions)
    #[must_use]
    pub fn state(&self, entity: EntityId) -> AnswerState {
        self.progress
            .get(&entity)
            .map_or(AnswerState::Unanswered, |p| p.state)
    }

    /// Current multi-choice selection
    #[must_use]
    pub fn selection(&self, entity: EntityId) -> Vec<AnswerId> {
        self.progress
            .get(&entity)
            .map(|p| p.selection.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Verdicts received this session
    #[must_use]
    pub fn session_score(&self) -> SessionScore {
        self.progress
            .iter()
            .fold(SessionScore::default(), |mut score, entry| {
                match entry.state {
                    AnswerState::Correct => score.correct += 1,
                    AnswerState::Incorrect => score.wrong += 1,
                    _ => return score,
                }
                score.answered += 1;
                score
            })
    }

    pub(crate) fn forget(&self, entity: EntityId) {
        self.progress.remove(&entity);
    }

    pub(crate) fn clear(&self) {
        self.progress.clear();
    }

    async fn submit(
        &self,
        entity: EntityId,
        submission: AnswerSubmission,
        revert_to: AnswerState,
    ) -> Result<AnswerOutcome, EngagementError> {
        let seen = self.ctx.liveness(entity);
        let result = self.ctx.services.answers.submit(&submission).await;
        if !self.ctx.is_live(entity, seen) {
            return Err(EngagementError::TornDown);
        }

        match result {
            Ok(verdict) => {
                {
                    let Some(mut progress) = self.progress.get_mut(&entity) else {
                        return Err(EngagementError::TornDown);
                    };
                    progress.state = if verdict.is_correct {
                        AnswerState::Correct
                    } else {
                        AnswerState::Incorrect
                    };
                }
                self.ctx.counters.record_verdict(entity, verdict.is_correct);
                self.ctx.reconciler.schedule(entity);
                tracing::debug!(entity = %entity, correct = verdict.is_correct, "answer judged");
                Ok(AnswerOutcome::Judged {
                    correct: verdict.is_correct,
                })
            }
            Err(err) => {
                tracing::warn!(entity = %entity, "answer submission failed: {}", err);
                if let Some(mut progress) = self.progress.get_mut(&entity) {
                    progress.state = revert_to;
                    if revert_to == AnswerState::Unanswered {
                        progress.selection.clear();
                    }
                }
                Err(err.into())
            }
        }
    }
}
