use time::Duration;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::Round;
use crate::db::types::RoundStatus;
use crate::services::audit::AuditEvent;
use crate::services::{scoring, shortlist, ExamError};
use crate::store::NewQuestion;

#[derive(Debug)]
pub(crate) struct RoundSetup {
    pub(crate) round_no: i32,
    pub(crate) duration_seconds: i64,
    pub(crate) cutoff: i32,
    pub(crate) questions: Vec<NewQuestion>,
}

#[derive(Debug)]
pub(crate) struct EndRoundSummary {
    pub(crate) round_no: i32,
    pub(crate) already_completed: bool,
    pub(crate) auto_submitted_count: u64,
    pub(crate) scored_count: i64,
    pub(crate) qualified_count: i64,
}

#[derive(Debug)]
pub(crate) struct RescoreSummary {
    pub(crate) scored_count: i64,
    pub(crate) qualified_count: i64,
}

/// Creates or reconfigures a round while it is still pending. A round that
/// has started is immutable; reconfiguration attempts are rejected.
pub(crate) async fn configure_round(
    state: &AppState,
    setup: RoundSetup,
) -> Result<Round, ExamError> {
    let store = state.store();
    let round = store
        .upsert_pending_round(setup.round_no, setup.duration_seconds, setup.cutoff)
        .await?
        .ok_or_else(|| {
            ExamError::Precondition(format!(
                "round {} has already started and cannot be reconfigured",
                setup.round_no
            ))
        })?;

    store.replace_questions(setup.round_no, &setup.questions).await?;

    tracing::info!(
        round_no = setup.round_no,
        questions = setup.questions.len(),
        cutoff = setup.cutoff,
        "Round configured"
    );
    Ok(round)
}

/// Transitions a pending round to running, stamping the shared deadline.
/// Guarded by a compare-and-set so concurrent starts cannot double-fire.
pub(crate) async fn start_round(state: &AppState, round_no: i32) -> Result<Round, ExamError> {
    let store = state.store();
    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;
    if round.status != RoundStatus::Pending {
        return Err(ExamError::Precondition(format!("round {round_no} is not pending")));
    }

    if let Some(active) = store.active_round().await? {
        return Err(ExamError::Precondition(format!(
            "round {} is still running",
            active.round_no
        )));
    }

    if round_no > 1 {
        let previous = store.get_round(round_no - 1).await?;
        let ready = previous
            .as_ref()
            .is_some_and(|r| r.status == RoundStatus::Completed && r.shortlisted);
        if !ready {
            return Err(ExamError::Precondition(format!(
                "round {} must be completed and shortlisted before round {round_no} starts",
                round_no - 1
            )));
        }
    }

    let question_count = store.question_count(round_no).await?;
    let min_questions = state.settings().exam().min_questions;
    if question_count < min_questions {
        return Err(ExamError::Precondition(format!(
            "round {round_no} has {question_count} questions, minimum is {min_questions}"
        )));
    }

    let started_at = primitive_now_utc();
    let deadline = started_at + Duration::seconds(round.duration_seconds);
    if !store.try_start_round(round_no, started_at, deadline).await? {
        return Err(ExamError::Precondition(format!("round {round_no} is not pending")));
    }

    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;
    metrics::counter!("exam_rounds_started_total").increment(1);
    state.audit().emit(AuditEvent::RoundStarted { round_no });
    tracing::info!(round_no, %deadline, "Round started");

    Ok(round)
}

/// Finalizes the active round: exactly one caller wins the completion guard
/// and runs the pipeline (force-submit stragglers, score, rank, shortlist).
/// Every other caller, concurrent or later, gets the recorded outcome.
pub(crate) async fn end_round(state: &AppState) -> Result<EndRoundSummary, ExamError> {
    let store = state.store();

    let round = match store.active_round().await? {
        Some(round) => round,
        None => {
            let latest = store.latest_round().await?.ok_or(ExamError::NoActiveRound)?;
            return already_completed_summary(state, latest.round_no).await;
        }
    };
    let round_no = round.round_no;

    if !store.try_complete_round(round_no).await? {
        return already_completed_summary(state, round_no).await;
    }

    // This caller owns the pipeline from here. Each step is individually
    // idempotent so a crash mid-way is repaired by an admin rescore.
    let now = primitive_now_utc();
    let auto_submitted = store.force_submit_open_sessions(round_no, now).await?;

    let scored_count = compute_and_store_results(state, round_no).await?;
    let summary = state
        .retry()
        .run(|| shortlist::apply(store, round_no, round.cutoff))
        .await?;
    store.set_shortlisted(round_no).await?;

    metrics::counter!("exam_rounds_completed_total").increment(1);
    metrics::counter!("exam_auto_submissions_total").increment(auto_submitted);
    state.audit().emit(AuditEvent::RoundCompleted {
        round_no,
        auto_submitted,
        scored: scored_count,
        qualified: summary.qualified_count,
    });
    tracing::info!(
        round_no,
        auto_submitted,
        scored = scored_count,
        qualified = summary.qualified_count,
        "Round completed"
    );

    Ok(EndRoundSummary {
        round_no,
        already_completed: false,
        auto_submitted_count: auto_submitted,
        scored_count,
        qualified_count: summary.qualified_count,
    })
}

async fn already_completed_summary(
    state: &AppState,
    round_no: i32,
) -> Result<EndRoundSummary, ExamError> {
    let counts = state.store().result_counts(round_no).await?;
    Ok(EndRoundSummary {
        round_no,
        already_completed: true,
        auto_submitted_count: 0,
        scored_count: counts.scored,
        qualified_count: counts.qualified,
    })
}

async fn compute_and_store_results(state: &AppState, round_no: i32) -> Result<i64, ExamError> {
    let store = state.store();
    let sessions = store.submitted_sessions(round_no).await?;
    let questions = store.questions(round_no).await?;

    let rows = scoring::rank(round_no, scoring::score_round(&sessions, &questions));
    state.retry().run(|| store.replace_results(round_no, &rows)).await?;

    Ok(rows.len() as i64)
}

/// Admin repair path: recomputes scores, ranks and the shortlist for a
/// completed round from the stored sessions. Safe to run any number of
/// times; the output is a pure function of the ledger.
pub(crate) async fn rescore(state: &AppState, round_no: i32) -> Result<RescoreSummary, ExamError> {
    let store = state.store();
    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;
    if round.status != RoundStatus::Completed {
        return Err(ExamError::Precondition(format!("round {round_no} has not been completed")));
    }

    let scored_count = compute_and_store_results(state, round_no).await?;
    let summary = shortlist::apply(store, round_no, round.cutoff).await?;
    store.set_shortlisted(round_no).await?;

    tracing::info!(round_no, scored = scored_count, "Round rescored");
    Ok(RescoreSummary { scored_count, qualified_count: summary.qualified_count })
}

/// Manual shortlist override with an explicit N. The stored cutoff stays
/// untouched; the qualified flags are rewritten from scratch.
pub(crate) async fn apply_shortlist(
    state: &AppState,
    round_no: i32,
    top_n: i32,
) -> Result<shortlist::ShortlistSummary, ExamError> {
    let store = state.store();
    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;
    if round.status != RoundStatus::Completed {
        return Err(ExamError::Precondition(format!("round {round_no} has not been completed")));
    }

    let summary = shortlist::apply(store, round_no, top_n).await?;
    store.set_shortlisted(round_no).await?;

    state.audit().emit(AuditEvent::Shortlisted {
        round_no,
        top_n,
        qualified: summary.qualified_count,
    });
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::SubmissionKind;
    use crate::services::sessions;
    use crate::test_support::{self, question_set, uniform_answers};

    #[tokio::test]
    async fn round_cannot_start_below_the_question_minimum() {
        let ctx = test_support::setup_test_context().await;
        // Test env sets the minimum to 3.
        test_support::seed_round(&ctx.state, 1, 2, 10).await;

        let err = start_round(&ctx.state, 1).await.unwrap_err();
        assert!(matches!(err, ExamError::Precondition(_)));

        test_support::seed_round(&ctx.state, 1, 3, 10).await;
        assert!(start_round(&ctx.state, 1).await.is_ok());
    }

    #[tokio::test]
    async fn started_round_cannot_be_reconfigured() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 10).await;

        let err = configure_round(
            &ctx.state,
            RoundSetup { round_no: 1, duration_seconds: 60, cutoff: 1, questions: question_set(3) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExamError::Precondition(_)));
    }

    #[tokio::test]
    async fn only_one_round_runs_at_a_time() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 10).await;
        test_support::seed_round(&ctx.state, 2, 3, 10).await;

        let err = start_round(&ctx.state, 2).await.unwrap_err();
        assert!(matches!(err, ExamError::Precondition(_)));
    }

    #[tokio::test]
    async fn end_round_force_submits_open_sessions_and_scores_them() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 1).await;

        sessions::start_exam(&ctx.state, "finisher", 1).await.unwrap();
        sessions::submit_exam(&ctx.state, "finisher", 1, &uniform_answers(3, "A"), SubmissionKind::Manual)
            .await
            .unwrap();

        sessions::start_exam(&ctx.state, "straggler", 1).await.unwrap();
        sessions::save_progress(&ctx.state, "straggler", 1, &uniform_answers(2, "A"))
            .await
            .unwrap();

        let summary = end_round(&ctx.state).await.unwrap();
        assert!(!summary.already_completed);
        assert_eq!(summary.auto_submitted_count, 1);
        assert_eq!(summary.scored_count, 2);
        assert_eq!(summary.qualified_count, 1);

        // The straggler's autosaved answers were scored.
        let results = ctx.state.store().results(1).await.unwrap();
        let straggler = results.iter().find(|r| r.candidate == "straggler").unwrap();
        assert_eq!(straggler.score, 2);
        assert_eq!(straggler.rank, Some(2));
        assert!(!straggler.qualified);

        let session = ctx.state.store().find_session("straggler", 1).await.unwrap().unwrap();
        assert_eq!(session.submission_kind, Some(SubmissionKind::RoundForced));
    }

    #[tokio::test]
    async fn concurrent_end_round_calls_complete_exactly_once() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 2).await;

        for i in 0..5 {
            let candidate = format!("tok-{i}");
            sessions::start_exam(&ctx.state, &candidate, 1).await.unwrap();
            sessions::submit_exam(
                &ctx.state,
                &candidate,
                1,
                &uniform_answers(3, "A"),
                SubmissionKind::Manual,
            )
            .await
            .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = ctx.state.clone();
            handles.push(tokio::spawn(async move { end_round(&state).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            let summary = handle.await.unwrap();
            assert_eq!(summary.round_no, 1);
            if !summary.already_completed {
                // Only the winner's counts are stable; a loser may read the
                // ledger while the winner is still writing results.
                assert_eq!(summary.scored_count, 5);
                assert_eq!(summary.qualified_count, 2);
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        // A later call reports the recorded outcome too.
        let again = end_round(&ctx.state).await.unwrap();
        assert!(again.already_completed);
        assert_eq!(again.scored_count, 5);
    }

    #[tokio::test]
    async fn end_round_with_no_round_ever_started_fails() {
        let ctx = test_support::setup_test_context().await;
        let err = end_round(&ctx.state).await.unwrap_err();
        assert!(matches!(err, ExamError::NoActiveRound));
    }

    #[tokio::test]
    async fn rescore_reproduces_the_original_outcome() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 1).await;

        for (candidate, letter) in [("alice", "A"), ("bob", "B")] {
            sessions::start_exam(&ctx.state, candidate, 1).await.unwrap();
            sessions::submit_exam(
                &ctx.state,
                candidate,
                1,
                &uniform_answers(3, letter),
                SubmissionKind::Manual,
            )
            .await
            .unwrap();
        }
        end_round(&ctx.state).await.unwrap();
        let before = ctx.state.store().results(1).await.unwrap();

        let summary = rescore(&ctx.state, 1).await.unwrap();
        assert_eq!(summary.scored_count, 2);
        assert_eq!(summary.qualified_count, 1);
        assert_eq!(ctx.state.store().results(1).await.unwrap(), before);
    }

    #[tokio::test]
    async fn rescore_requires_a_completed_round() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 1).await;

        let err = rescore(&ctx.state, 1).await.unwrap_err();
        assert!(matches!(err, ExamError::Precondition(_)));
    }
}
