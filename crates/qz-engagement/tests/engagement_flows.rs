//! End-to-end engagement flows against the in-memory backend

use pretty_assertions::assert_eq;
use qz_engagement::prelude::*;
use qz_engagement::{
    AnswerState, HydrateOutcome, QuestionStats, ReactionSummary, RejectReason, SelectionOutcome,
};
use qz_test_utils::{Op, TestSession};
use std::time::Duration;

fn updated(outcome: ReactionOutcome) -> ReactionSummary {
    match outcome {
        ReactionOutcome::Updated(summary) => summary,
        ReactionOutcome::AlreadyInFlight => panic!("expected an updated summary"),
    }
}

async fn wait_for_call(session: &TestSession, op: Op) {
    while session.backend.calls(op) == 0 {
        tokio::task::yield_now().await;
    }
}

// Views

#[tokio::test]
async fn repeat_views_count_once_per_viewer() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(42);

    let first = session.store.record_view(entity).await.unwrap();
    assert!(matches!(first, ViewOutcome::Recorded { first_for_viewer: true, .. }));
    let second = session.store.record_view(entity).await.unwrap();
    assert!(matches!(second, ViewOutcome::Recorded { first_for_viewer: false, .. }));

    let stats = session.store.statistics(entity);
    assert_eq!(stats.total_views, 2);
    assert_eq!(stats.unique_views, 1);
    assert_eq!(stats.viewers.len(), 1);

    let counters = session.store.counters(entity);
    assert_eq!((counters.views, counters.unique_viewers), (2, 1));
}

#[tokio::test]
async fn distinct_viewers_each_count() {
    let session = TestSession::signed_in("alice", 1);
    let entity = EntityId(3);

    session.store.record_view(entity).await.unwrap();
    session.sign_in("bob", 2);
    session.store.record_view(entity).await.unwrap();

    let stats = session.store.statistics(entity);
    assert_eq!((stats.total_views, stats.unique_views), (2, 2));
}

#[tokio::test]
async fn anonymous_views_only_count_toward_total() {
    let session = TestSession::new();
    session.credential.set("not-a-token");
    assert_eq!(session.store.current_identity(), None);

    let outcome = session.store.record_view(EntityId(5)).await.unwrap();
    assert!(matches!(outcome, ViewOutcome::Recorded { first_for_viewer: false, .. }));

    let stats = session.store.statistics(EntityId(5));
    assert_eq!((stats.total_views, stats.unique_views), (1, 0));
}

#[tokio::test]
async fn concurrent_view_sends_one_request() {
    let session = TestSession::signed_in("alice", 42);
    let gate = session.backend.gate(Op::CreateView);

    let store = session.store.clone();
    let pending = tokio::spawn(async move { store.record_view(EntityId(42)).await });
    wait_for_call(&session, Op::CreateView).await;

    let second = session.store.record_view(EntityId(42)).await.unwrap();
    assert_eq!(second, ViewOutcome::AlreadyInFlight);
    assert_eq!(session.store.in_flight(), 1);

    gate.add_permits(1);
    let first = pending.await.unwrap().unwrap();
    assert!(first.is_recorded());
    assert_eq!(session.backend.calls(Op::CreateView), 1);
    assert_eq!(session.store.statistics(EntityId(42)).total_views, 1);
    assert_eq!(session.store.in_flight(), 0);
}

#[tokio::test]
async fn failed_view_leaves_no_trace() {
    let session = TestSession::signed_in("alice", 42);
    session.backend.fail(Op::CreateView, 1);

    let err = session.store.record_view(EntityId(42)).await.unwrap_err();
    assert!(matches!(err, EngagementError::Network(_)));
    assert!(err.is_retryable());
    assert_eq!(session.store.statistics(EntityId(42)).total_views, 0);
    assert_eq!(session.store.counters(EntityId(42)).views, 0);
    assert!(!session.store.reconciliation_pending(EntityId(42)));
    assert_eq!(session.store.in_flight(), 0);

    // the guard was released, so a retry goes through
    let retry = session.store.record_view(EntityId(42)).await.unwrap();
    assert!(retry.is_recorded());
}

#[tokio::test]
async fn unique_count_is_cached_until_ttl() {
    let session = TestSession::with_config(EngagementConfig::new().with_unique_view_ttl_secs(1));
    session.sign_in("alice", 42);
    let entity = EntityId(42);

    let empty = session.store.unique_view_count(entity).await;
    assert_eq!((empty.value, empty.from_cache), (0, false));

    session.store.record_view(entity).await.unwrap();
    let cached = session.store.unique_view_count(entity).await;
    assert_eq!((cached.value, cached.from_cache), (1, true));

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let fresh = session.store.unique_view_count(entity).await;
    assert_eq!((fresh.value, fresh.from_cache), (1, false));
}

// Reactions

#[tokio::test]
async fn like_then_love_moves_the_reaction() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(7);

    let liked = updated(session.store.toggle_reaction(entity, "like").await.unwrap());
    assert_eq!(liked.count(ReactionKind::Like), 1);
    assert_eq!(liked.total(), 1);
    assert!(liked.confirmed().is_some());

    let loved = updated(session.store.toggle_reaction(entity, "Love").await.unwrap());
    assert_eq!(loved.count(ReactionKind::Like), 0);
    assert_eq!(loved.count(ReactionKind::Love), 1);
    assert_eq!(loved.total(), 1);
    assert_eq!(loved.current_user_kind(), Some(ReactionKind::Love));

    let server = session.backend.server_reactions(entity);
    assert_eq!(server.len(), 1);
    assert_eq!(server[0].reaction_type, "love");
}

#[tokio::test]
async fn toggling_twice_removes_the_reaction() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(7);

    session.store.toggle_reaction(entity, "wow").await.unwrap();
    let cleared = updated(session.store.toggle_reaction(entity, "wow").await.unwrap());

    assert_eq!(cleared.total(), 0);
    assert_eq!(cleared.current_user_kind(), None);
    assert!(session.backend.server_reactions(entity).is_empty());
}

#[tokio::test]
async fn unknown_reaction_kind_is_rejected_before_any_call() {
    let session = TestSession::signed_in("alice", 42);

    let err = session.store.toggle_reaction(EntityId(7), "meh").await.unwrap_err();
    assert!(matches!(err, EngagementError::UnknownReactionKind(ref kind) if kind == "meh"));
    assert_eq!(session.backend.calls(Op::UpsertReaction), 0);
    assert_eq!(session.store.reactions(EntityId(7)).total(), 0);
}

#[tokio::test]
async fn failed_toggle_resyncs_from_server() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(7);
    session.backend.seed_reaction(entity, "bob", "like");
    session.store.hydrate_reactions(entity).await.unwrap();

    session.backend.fail(Op::UpsertReaction, 1);
    let err = session.store.toggle_reaction(entity, "haha").await.unwrap_err();
    assert!(matches!(err, EngagementError::Network(_)));

    let summary = session.store.reactions(entity);
    assert_eq!(summary.total(), 1);
    assert_eq!(summary.count(ReactionKind::Like), 1);
    assert_eq!(summary.count(ReactionKind::Haha), 0);
    assert_eq!(summary.current_user_kind(), None);
    assert_eq!(session.backend.calls(Op::ListReactions), 2);
}

#[tokio::test]
async fn failed_resync_restores_previous_summary() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(7);
    session.backend.seed_reaction(entity, "bob", "sad");
    let before = updated(session.store.hydrate_reactions(entity).await.unwrap());

    session.backend.fail(Op::UpsertReaction, 1);
    session.backend.fail(Op::ListReactions, 1);
    session.store.toggle_reaction(entity, "angry").await.unwrap_err();

    assert_eq!(session.store.reactions(entity), before);
}

#[tokio::test]
async fn hydrate_is_skipped_while_toggle_in_flight() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(7);
    let gate = session.backend.gate(Op::UpsertReaction);

    let store = session.store.clone();
    let toggle = tokio::spawn(async move { store.toggle_reaction(entity, "like").await });
    wait_for_call(&session, Op::UpsertReaction).await;

    let skipped = session.store.hydrate_reactions(entity).await.unwrap();
    assert_eq!(skipped, ReactionOutcome::AlreadyInFlight);
    let again = session.store.toggle_reaction(entity, "like").await.unwrap();
    assert_eq!(again, ReactionOutcome::AlreadyInFlight);
    assert_eq!(session.backend.calls(Op::ListReactions), 0);

    gate.add_permits(1);
    let summary = updated(toggle.await.unwrap().unwrap());
    assert_eq!(summary.count(ReactionKind::Like), 1);
}

// Answers

#[tokio::test]
async fn answered_question_rejects_further_answers() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(9);
    session.backend.set_answer_key(entity, [2]);

    let outcome = session.store.select_answer(entity, AnswerId(2)).await.unwrap();
    assert_eq!(outcome, AnswerOutcome::Judged { correct: true });
    assert_eq!(session.store.answer_state(entity), AnswerState::Correct);

    let again = session.store.select_answer(entity, AnswerId(3)).await.unwrap();
    assert_eq!(again, AnswerOutcome::Rejected(RejectReason::AlreadyAnswered));
    assert_eq!(session.backend.calls(Op::SubmitAnswer), 1);
    assert_eq!(session.store.answer_state(entity), AnswerState::Correct);
}

#[tokio::test]
async fn wrong_answer_is_terminal_too() {
    let session = TestSession::signed_in("alice", 42);
    session.backend.set_answer_key(EntityId(9), [2]);

    let outcome = session.store.select_answer(EntityId(9), AnswerId(1)).await.unwrap();
    assert_eq!(outcome, AnswerOutcome::Judged { correct: false });
    assert_eq!(session.store.answer_state(EntityId(9)), AnswerState::Incorrect);

    let counters = session.store.counters(EntityId(9));
    assert_eq!((counters.correct, counters.wrong), (0, 1));
    assert_eq!(counters.accuracy, Some(0.0));
}

#[tokio::test]
async fn failed_submission_returns_to_unanswered() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(9);
    session.backend.set_answer_key(entity, [2]);
    session.backend.fail(Op::SubmitAnswer, 1);

    let err = session.store.select_answer(entity, AnswerId(2)).await.unwrap_err();
    assert!(matches!(err, EngagementError::Network(_)));
    assert_eq!(session.store.answer_state(entity), AnswerState::Unanswered);
    assert_eq!(session.store.counters(entity).correct, 0);

    let retry = session.store.select_answer(entity, AnswerId(2)).await.unwrap();
    assert_eq!(retry, AnswerOutcome::Judged { correct: true });
}

#[tokio::test]
async fn double_submission_is_rejected_while_pending() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(9);
    let gate = session.backend.gate(Op::SubmitAnswer);

    let store = session.store.clone();
    let first = tokio::spawn(async move { store.select_answer(entity, AnswerId(1)).await });
    wait_for_call(&session, Op::SubmitAnswer).await;
    assert_eq!(session.store.answer_state(entity), AnswerState::Submitting);

    let second = session.store.select_answer(entity, AnswerId(1)).await.unwrap();
    assert_eq!(second, AnswerOutcome::Rejected(RejectReason::SubmissionPending));

    gate.add_permits(1);
    first.await.unwrap().unwrap();
    assert_eq!(session.backend.calls(Op::SubmitAnswer), 1);
}

#[tokio::test]
async fn multi_choice_flow() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(11);
    session.backend.set_answer_key(entity, [1, 3]);

    session.store.toggle_selection(entity, AnswerId(3));
    session.store.toggle_selection(entity, AnswerId(2));
    session.store.toggle_selection(entity, AnswerId(1));
    let outcome = session.store.toggle_selection(entity, AnswerId(2));
    assert_eq!(
        outcome,
        SelectionOutcome::Selection {
            state: AnswerState::Selecting,
            selected: vec![AnswerId(1), AnswerId(3)],
        }
    );

    let mismatch = session.store.select_answer(entity, AnswerId(1)).await.unwrap();
    assert_eq!(mismatch, AnswerOutcome::Rejected(RejectReason::ModeMismatch));

    let verdict = session.store.submit_selection(entity).await.unwrap();
    assert_eq!(verdict, AnswerOutcome::Judged { correct: true });
    assert_eq!(
        session.store.toggle_selection(entity, AnswerId(2)),
        SelectionOutcome::Rejected(RejectReason::AlreadyAnswered)
    );
    assert_eq!(session.store.selection(entity), vec![AnswerId(1), AnswerId(3)]);
}

#[tokio::test]
async fn clearing_the_selection_returns_to_unanswered() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(11);

    session.store.toggle_selection(entity, AnswerId(4));
    session.store.toggle_selection(entity, AnswerId(4));
    assert_eq!(session.store.answer_state(entity), AnswerState::Unanswered);

    let outcome = session.store.submit_selection(entity).await.unwrap();
    assert_eq!(outcome, AnswerOutcome::Rejected(RejectReason::EmptySelection));
    assert_eq!(session.backend.calls(Op::SubmitAnswer), 0);
}

#[tokio::test]
async fn failed_multi_submission_keeps_selection() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(11);
    session.backend.fail(Op::SubmitAnswer, 1);

    session.store.toggle_selection(entity, AnswerId(1));
    session.store.submit_selection(entity).await.unwrap_err();

    assert_eq!(session.store.answer_state(entity), AnswerState::Selecting);
    assert_eq!(session.store.selection(entity), vec![AnswerId(1)]);
}

#[tokio::test]
async fn opened_question_keeps_its_mode() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(13);

    assert!(session.store.open_question(entity, QuestionMode::Multi));
    assert!(!session.store.open_question(entity, QuestionMode::Single));
    let outcome = session.store.select_answer(entity, AnswerId(1)).await.unwrap();
    assert_eq!(outcome, AnswerOutcome::Rejected(RejectReason::ModeMismatch));
}

#[tokio::test]
async fn session_score_counts_verdicts() {
    let session = TestSession::signed_in("alice", 42);
    session.backend.set_answer_key(EntityId(1), [1]);
    session.backend.set_answer_key(EntityId(2), [1]);

    session.store.select_answer(EntityId(1), AnswerId(1)).await.unwrap();
    session.store.select_answer(EntityId(2), AnswerId(2)).await.unwrap();
    session.store.toggle_selection(EntityId(3), AnswerId(1));

    let score = session.store.session_score();
    assert_eq!((score.answered, score.correct, score.wrong), (2, 1, 1));
}

// Reconciliation and lifecycle

#[tokio::test(start_paused = true)]
async fn reconciliation_overwrites_counters_but_not_reactions() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(9);
    session.backend.set_answer_key(entity, [1]);
    session.backend.seed_reaction(entity, "bob", "like");
    session.store.hydrate_reactions(entity).await.unwrap();
    let reactions = session.store.reactions(entity);

    session.store.select_answer(entity, AnswerId(1)).await.unwrap();
    assert_eq!(session.store.counters(entity).correct, 1);
    assert!(session.store.reconciliation_pending(entity));

    session.backend.set_stats(
        entity,
        QuestionStats {
            view_count: 10,
            unique_viewers: 4,
            correct_count: 5,
            wrong_count: 3,
            accuracy: 62.5,
            average_time: 12.0,
        },
    );
    tokio::time::sleep(Duration::from_millis(700)).await;

    let counters = session.store.counters(entity);
    assert_eq!((counters.correct, counters.wrong), (5, 3));
    assert_eq!((counters.views, counters.unique_viewers), (10, 4));
    assert_eq!(counters.accuracy, Some(62.5));
    assert!(counters.reconciled_at.is_some());
    assert!(!session.store.reconciliation_pending(entity));
    assert_eq!(session.store.reactions(entity), reactions);
}

#[tokio::test(start_paused = true)]
async fn burst_of_actions_reconciles_once() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(4);

    session.store.record_view(entity).await.unwrap();
    session.store.record_view(entity).await.unwrap();
    session.store.toggle_reaction(entity, "like").await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(session.backend.calls(Op::Stats), 1);
    let counters = session.store.counters(entity);
    assert_eq!((counters.views, counters.unique_viewers), (2, 1));
}

#[tokio::test(start_paused = true)]
async fn failed_reconciliation_keeps_optimistic_counters() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(4);
    session.backend.fail_always(Op::Stats);

    session.store.record_view(entity).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let counters = session.store.counters(entity);
    assert_eq!(counters.views, 1);
    assert_eq!(counters.reconciled_at, None);
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_reconciliation_and_discards_state() {
    let session = TestSession::signed_in("alice", 42);
    session.store.record_view(EntityId(42)).await.unwrap();
    session.store.toggle_reaction(EntityId(42), "like").await.unwrap();
    assert!(session.store.reconciliation_pending(EntityId(42)));

    session.store.reset();
    assert!(!session.store.reconciliation_pending(EntityId(42)));
    assert_eq!(session.store.statistics(EntityId(42)).total_views, 0);
    assert_eq!(session.store.reactions(EntityId(42)).total(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.backend.calls(Op::Stats), 0);
}

#[tokio::test(start_paused = true)]
async fn release_drops_only_that_entity() {
    let session = TestSession::signed_in("alice", 42);
    session.store.record_view(EntityId(1)).await.unwrap();
    session.store.record_view(EntityId(2)).await.unwrap();

    session.store.release(EntityId(1)).await;
    assert_eq!(session.store.statistics(EntityId(1)).total_views, 0);
    assert_eq!(session.store.engagement(EntityId(1)), None);
    assert!(!session.store.reconciliation_pending(EntityId(1)));
    assert!(session.store.reconciliation_pending(EntityId(2)));
    assert_eq!(session.store.statistics(EntityId(2)).total_views, 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.backend.calls(Op::Stats), 1);
}

#[tokio::test]
async fn reset_during_view_discards_its_result() {
    let session = TestSession::signed_in("alice", 42);
    let gate = session.backend.gate(Op::CreateView);

    let store = session.store.clone();
    let pending = tokio::spawn(async move { store.record_view(EntityId(42)).await });
    wait_for_call(&session, Op::CreateView).await;

    session.store.reset();
    gate.add_permits(1);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, EngagementError::TornDown));
    assert_eq!(session.store.statistics(EntityId(42)).total_views, 0);
    assert!(!session.store.reconciliation_pending(EntityId(42)));
}

#[tokio::test(start_paused = true)]
async fn release_during_view_discards_its_result() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(42);
    let gate = session.backend.gate(Op::CreateView);

    let store = session.store.clone();
    let pending = tokio::spawn(async move { store.record_view(entity).await });
    wait_for_call(&session, Op::CreateView).await;

    session.store.release(entity).await;
    gate.add_permits(1);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, EngagementError::TornDown));
    assert_eq!(session.store.engagement(entity), None);
    assert!(!session.store.reconciliation_pending(entity));

    session.backend.set_stats(
        entity,
        QuestionStats {
            view_count: 99,
            unique_viewers: 3,
            correct_count: 0,
            wrong_count: 0,
            accuracy: 0.0,
            average_time: 0.0,
        },
    );
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.backend.calls(Op::Stats), 0);
    assert_eq!(session.store.counters(entity).views, 0);

    session.backend.ungate(Op::CreateView);
    let outcome = session.store.record_view(entity).await.unwrap();
    assert!(outcome.is_recorded());
    assert_eq!(session.store.statistics(entity).total_views, 1);
}

#[tokio::test]
async fn release_during_failed_toggle_skips_resync() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(7);
    session.backend.seed_reaction(entity, "bob", "like");
    session.backend.fail(Op::UpsertReaction, 1);
    let gate = session.backend.gate(Op::UpsertReaction);

    let store = session.store.clone();
    let pending = tokio::spawn(async move { store.toggle_reaction(entity, "love").await });
    wait_for_call(&session, Op::UpsertReaction).await;

    session.store.release(entity).await;
    gate.add_permits(1);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, EngagementError::TornDown));
    assert_eq!(session.backend.calls(Op::ListReactions), 0);
    assert_eq!(session.store.reactions(entity), ReactionSummary::default());
}

#[tokio::test]
async fn reset_during_failed_toggle_reports_torn_down() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(7);
    session.backend.fail(Op::UpsertReaction, 1);
    let gate = session.backend.gate(Op::UpsertReaction);

    let store = session.store.clone();
    let pending = tokio::spawn(async move { store.toggle_reaction(entity, "wow").await });
    wait_for_call(&session, Op::UpsertReaction).await;

    session.store.reset();
    gate.add_permits(1);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, EngagementError::TornDown));
    assert_eq!(session.backend.calls(Op::ListReactions), 0);
    assert_eq!(session.store.reactions(entity).total(), 0);
}

#[tokio::test]
async fn failed_reaction_hydrate_is_a_network_error() {
    let session = TestSession::signed_in("alice", 42);
    session.backend.fail(Op::ListReactions, 1);

    let err = session.store.hydrate_reactions(EntityId(3)).await.unwrap_err();
    assert!(matches!(err, EngagementError::Network(_)));
    assert!(err.is_retryable());
    assert_eq!(session.store.reactions(EntityId(3)).total(), 0);
}

#[tokio::test]
async fn hydrate_rebuilds_views_and_reactions() {
    let session = TestSession::signed_in("alice", 42);
    let entity = EntityId(5);
    session.backend.seed_view(entity, Some("alice"));
    session.backend.seed_view(entity, Some("bob"));
    session.backend.seed_view(entity, Some("alice"));
    session.backend.seed_view(entity, None);
    session.backend.seed_view(EntityId(6), Some("carol"));
    session.backend.seed_reaction(entity, "bob", "like");
    session.backend.seed_reaction(entity, "carol", "love");
    session.backend.seed_reaction(entity, "alice", "haha");

    let results = session.store.hydrate(&[entity, EntityId(8)]).await;
    assert_eq!(results.len(), 2);
    assert!(matches!(
        results[0].views,
        Ok(HydrateOutcome::Hydrated { total_views: 4, unique_views: 2 })
    ));
    assert!(matches!(
        results[1].views,
        Ok(HydrateOutcome::Hydrated { total_views: 0, unique_views: 0 })
    ));

    let summary = session.store.reactions(entity);
    assert_eq!(summary.total(), 3);
    assert_eq!(summary.current_user_kind(), Some(ReactionKind::Haha));
    assert!(summary.confirmed().is_some());

    let state = session.store.engagement(entity).unwrap();
    assert!(state.has_viewer(&qz_engagement::Identity::named("alice")));
    assert_eq!(session.store.unique_view_count(entity).await.value, 2);
}

#[tokio::test]
async fn hydrate_reports_failures_per_entity() {
    let session = TestSession::signed_in("alice", 42);
    session.backend.fail(Op::ListViews, 1);

    let results = session.store.hydrate(&[EntityId(1)]).await;
    assert!(matches!(results[0].views, Err(EngagementError::Network(_))));
    assert!(results[0].reactions.is_ok());
}
