use std::collections::HashMap;

use time::{Duration, PrimitiveDateTime};

use crate::core::state::AppState;
use crate::core::time::{elapsed_seconds, primitive_now_utc};
use crate::db::models::{AnswerSet, ExamSession, Question, Round};
use crate::db::types::{RoundStatus, SubmissionKind};
use crate::services::audit::AuditEvent;
use crate::services::ExamError;

#[derive(Debug)]
pub(crate) struct StartOutcome {
    pub(crate) session: ExamSession,
    pub(crate) deadline: PrimitiveDateTime,
    pub(crate) resumed: bool,
}

#[derive(Debug)]
pub(crate) struct SubmitSummary {
    pub(crate) already_submitted: bool,
    pub(crate) elapsed_seconds: i64,
    pub(crate) recorded_answer_count: usize,
}

#[derive(Debug)]
pub(crate) struct ViolationSummary {
    pub(crate) warning: bool,
    pub(crate) auto_submitted: bool,
    pub(crate) disqualified: bool,
    pub(crate) violation_count: i32,
}

/// Drops unknown question ids and malformed option letters; keeps at most
/// one selection per question (last write wins).
pub(crate) fn sanitize_answers(entries: &[(String, String)], questions: &[Question]) -> AnswerSet {
    let option_counts: HashMap<&str, usize> =
        questions.iter().map(|q| (q.id.as_str(), q.options.0.len())).collect();

    let mut answers = AnswerSet::new();
    for (question_id, selected) in entries {
        let Some(&option_count) = option_counts.get(question_id.as_str()) else {
            continue;
        };

        let trimmed = selected.trim();
        let mut chars = trimmed.chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            continue;
        };
        let letter = letter.to_ascii_uppercase();
        if !letter.is_ascii_uppercase() {
            continue;
        }
        if (letter as u8 - b'A') as usize >= option_count {
            continue;
        }

        answers.insert(question_id.clone(), letter.to_string());
    }

    answers
}

async fn ensure_eligible(state: &AppState, candidate: &str, round_no: i32) -> Result<(), ExamError> {
    if round_no <= 1 {
        return Ok(());
    }

    let previous = round_no - 1;
    if let Some(session) = state.store().find_session(candidate, previous).await? {
        if session.disqualified {
            return Err(ExamError::Disqualified(previous));
        }
    }
    if !state.store().is_qualified(candidate, previous).await? {
        return Err(ExamError::NotEligible(round_no));
    }

    Ok(())
}

fn round_deadline(round: &Round) -> Result<PrimitiveDateTime, ExamError> {
    round
        .deadline
        .ok_or_else(|| ExamError::Precondition(format!("round {} has no deadline", round.round_no)))
}

/// Idempotent start/resume. An existing session is returned unchanged so a
/// reconnecting client lands exactly where it left off.
pub(crate) async fn start_exam(
    state: &AppState,
    candidate: &str,
    round_no: i32,
) -> Result<StartOutcome, ExamError> {
    let store = state.store();
    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;
    if round.status != RoundStatus::Running {
        return Err(ExamError::RoundNotRunning(round_no));
    }
    let deadline = round_deadline(&round)?;

    ensure_eligible(state, candidate, round_no).await?;

    if let Some(existing) = store.find_session(candidate, round_no).await? {
        if existing.disqualified {
            return Err(ExamError::Disqualified(round_no));
        }
        state.audit().emit(AuditEvent::SessionStarted {
            candidate: candidate.to_string(),
            round_no,
            resumed: true,
        });
        return Ok(StartOutcome { session: existing, deadline, resumed: true });
    }

    let session = store.create_session_if_absent(candidate, round_no, primitive_now_utc()).await?;
    metrics::counter!("exam_sessions_started_total").increment(1);
    state.audit().emit(AuditEvent::SessionStarted {
        candidate: candidate.to_string(),
        round_no,
        resumed: false,
    });

    Ok(StartOutcome { session, deadline, resumed: false })
}

/// The primary idempotence contract: a duplicate submit is a success that
/// reads the terminal state, never an error and never a re-process.
pub(crate) async fn submit_exam(
    state: &AppState,
    candidate: &str,
    round_no: i32,
    entries: &[(String, String)],
    kind: SubmissionKind,
) -> Result<SubmitSummary, ExamError> {
    let store = state.store();
    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;
    let now = primitive_now_utc();

    match round.status {
        RoundStatus::Pending => return Err(ExamError::RoundNotRunning(round_no)),
        RoundStatus::Running => {
            // Timer-driven auto-submission is the authoritative end-of-round
            // event and is exempt from the deadline check.
            if kind != SubmissionKind::TimerExpiry {
                let grace = Duration::seconds(state.settings().exam().grace_seconds);
                if now > round_deadline(&round)? + grace {
                    return Err(ExamError::SubmissionClosed(round_no));
                }
            }
        }
        RoundStatus::Completed => {
            let session =
                store.find_session(candidate, round_no).await?.ok_or(ExamError::NoSession(round_no))?;
            if session.is_submitted() {
                return Ok(summary_of(&session, true));
            }
            return Err(ExamError::SubmissionClosed(round_no));
        }
    }

    let session =
        store.find_session(candidate, round_no).await?.ok_or(ExamError::NoSession(round_no))?;
    if session.is_submitted() {
        state.audit().emit(AuditEvent::Submitted {
            candidate: candidate.to_string(),
            round_no,
            kind,
            duplicate: true,
        });
        return Ok(summary_of(&session, true));
    }

    let questions = store.questions(round_no).await?;
    let answers = sanitize_answers(entries, &questions);
    let elapsed = elapsed_seconds(session.started_at, now);

    let outcome = store
        .try_submit_session(candidate, round_no, &answers, kind, now, elapsed)
        .await?
        .ok_or(ExamError::NoSession(round_no))?;

    if !outcome.already_submitted {
        metrics::counter!("exam_submissions_total", "kind" => kind.as_str()).increment(1);
    }
    state.audit().emit(AuditEvent::Submitted {
        candidate: candidate.to_string(),
        round_no,
        kind,
        duplicate: outcome.already_submitted,
    });

    Ok(summary_of(&outcome.session, outcome.already_submitted))
}

fn summary_of(session: &ExamSession, already_submitted: bool) -> SubmitSummary {
    SubmitSummary {
        already_submitted,
        elapsed_seconds: session.elapsed_seconds.unwrap_or(0),
        recorded_answer_count: session.answers.0.len(),
    }
}

/// Two-strike rule: the first violation only warns; the second persists the
/// answers-so-far, force-submits and disqualifies in one atomic unit.
pub(crate) async fn report_violation(
    state: &AppState,
    candidate: &str,
    round_no: i32,
    entries: &[(String, String)],
) -> Result<ViolationSummary, ExamError> {
    let store = state.store();
    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;

    if round.status != RoundStatus::Running {
        let session =
            store.find_session(candidate, round_no).await?.ok_or(ExamError::NoSession(round_no))?;
        return Ok(ViolationSummary {
            warning: false,
            auto_submitted: false,
            disqualified: session.disqualified,
            violation_count: session.violations,
        });
    }

    let questions = store.questions(round_no).await?;
    let answers = sanitize_answers(entries, &questions);
    let now = primitive_now_utc();

    let record = store
        .register_violation(candidate, round_no, &answers, now)
        .await?
        .ok_or(ExamError::NoSession(round_no))?;

    let session = &record.session;
    if record.applied {
        metrics::counter!("exam_violations_total").increment(1);
        if session.disqualified {
            metrics::counter!("exam_disqualifications_total").increment(1);
        }
    }
    state.audit().emit(AuditEvent::ViolationReported {
        candidate: candidate.to_string(),
        round_no,
        violations: session.violations,
        disqualified: session.disqualified,
    });

    Ok(ViolationSummary {
        warning: record.applied && session.violations == 1,
        auto_submitted: record.applied && session.is_submitted(),
        disqualified: session.disqualified,
        violation_count: session.violations,
    })
}

/// Autosave. Returns false when the session is already terminal; the saved
/// snapshot feeds resume positions and round-forced submissions.
pub(crate) async fn save_progress(
    state: &AppState,
    candidate: &str,
    round_no: i32,
    entries: &[(String, String)],
) -> Result<bool, ExamError> {
    let store = state.store();
    let round = store.get_round(round_no).await?.ok_or(ExamError::RoundNotFound(round_no))?;
    if round.status != RoundStatus::Running {
        return Err(ExamError::RoundNotRunning(round_no));
    }

    let questions = store.questions(round_no).await?;
    let answers = sanitize_answers(entries, &questions);
    Ok(store.save_progress(candidate, round_no, &answers).await?)
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::services::rounds;
    use crate::test_support::{self, uniform_answers};

    #[tokio::test]
    async fn duplicate_submit_is_a_success_with_the_first_outcome() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 10).await;

        start_exam(&ctx.state, "tok-1", 1).await.unwrap();
        let first =
            submit_exam(&ctx.state, "tok-1", 1, &uniform_answers(3, "A"), SubmissionKind::Manual)
                .await
                .unwrap();
        assert!(!first.already_submitted);
        assert_eq!(first.recorded_answer_count, 3);

        let second =
            submit_exam(&ctx.state, "tok-1", 1, &uniform_answers(3, "B"), SubmissionKind::Manual)
                .await
                .unwrap();
        assert!(second.already_submitted);
        assert_eq!(second.elapsed_seconds, first.elapsed_seconds);

        // The duplicate's payload was discarded.
        let session = ctx.state.store().find_session("tok-1", 1).await.unwrap().unwrap();
        assert_eq!(session.answers.0.get("q01").map(String::as_str), Some("A"));
    }

    #[tokio::test]
    async fn concurrent_duplicate_submits_record_exactly_one_payload() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 10).await;
        start_exam(&ctx.state, "tok-1", 1).await.unwrap();

        let state_a = ctx.state.clone();
        let state_b = ctx.state.clone();
        let a = tokio::spawn(async move {
            submit_exam(&state_a, "tok-1", 1, &uniform_answers(3, "A"), SubmissionKind::Manual)
                .await
                .unwrap()
        });
        let b = tokio::spawn(async move {
            submit_exam(&state_b, "tok-1", 1, &uniform_answers(3, "B"), SubmissionKind::Manual)
                .await
                .unwrap()
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_ne!(a.already_submitted, b.already_submitted);

        // Exactly one payload landed, never a mix of the two.
        let session = ctx.state.store().find_session("tok-1", 1).await.unwrap().unwrap();
        let letters: Vec<&str> = session.answers.0.values().map(String::as_str).collect();
        assert_eq!(letters.len(), 3);
        assert!(letters.iter().all(|l| *l == letters[0]));
    }

    #[tokio::test]
    async fn second_violation_strikes_out_and_later_reports_are_inert() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 10).await;
        start_exam(&ctx.state, "tok-1", 1).await.unwrap();

        let first = report_violation(&ctx.state, "tok-1", 1, &uniform_answers(2, "A"))
            .await
            .unwrap();
        assert!(first.warning);
        assert!(!first.auto_submitted);
        assert!(!first.disqualified);
        assert_eq!(first.violation_count, 1);

        let second = report_violation(&ctx.state, "tok-1", 1, &uniform_answers(3, "A"))
            .await
            .unwrap();
        assert!(!second.warning);
        assert!(second.auto_submitted);
        assert!(second.disqualified);
        assert_eq!(second.violation_count, 2);

        let session = ctx.state.store().find_session("tok-1", 1).await.unwrap().unwrap();
        assert!(session.is_submitted());
        assert_eq!(session.submission_kind, Some(SubmissionKind::ViolationTriggered));
        assert_eq!(session.answers.0.len(), 3);

        // Terminal session: no further counting, and a manual submit is a
        // duplicate of the forced one.
        let third = report_violation(&ctx.state, "tok-1", 1, &[]).await.unwrap();
        assert!(!third.warning);
        assert!(!third.auto_submitted);
        assert_eq!(third.violation_count, 2);

        let submit =
            submit_exam(&ctx.state, "tok-1", 1, &uniform_answers(3, "B"), SubmissionKind::Manual)
                .await
                .unwrap();
        assert!(submit.already_submitted);
    }

    #[tokio::test]
    async fn manual_submit_inside_grace_window_is_accepted() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_round(&ctx.state, 1, 3, 10).await;
        let now = primitive_now_utc();
        let started =
            ctx.state.store().try_start_round(1, now - Duration::seconds(600), now - Duration::seconds(3));
        assert!(started.await.unwrap());

        start_exam(&ctx.state, "tok-1", 1).await.unwrap();
        let summary =
            submit_exam(&ctx.state, "tok-1", 1, &uniform_answers(3, "A"), SubmissionKind::Manual)
                .await
                .unwrap();
        assert!(!summary.already_submitted);
    }

    #[tokio::test]
    async fn manual_submit_past_grace_window_is_rejected_but_timer_expiry_lands() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_round(&ctx.state, 1, 3, 10).await;
        let now = primitive_now_utc();
        let started =
            ctx.state.store().try_start_round(1, now - Duration::seconds(600), now - Duration::seconds(10));
        assert!(started.await.unwrap());

        start_exam(&ctx.state, "tok-1", 1).await.unwrap();
        let err =
            submit_exam(&ctx.state, "tok-1", 1, &uniform_answers(3, "A"), SubmissionKind::Manual)
                .await
                .unwrap_err();
        assert!(matches!(err, ExamError::SubmissionClosed(1)));

        let forced =
            submit_exam(&ctx.state, "tok-1", 1, &uniform_answers(3, "A"), SubmissionKind::TimerExpiry)
                .await
                .unwrap();
        assert!(!forced.already_submitted);
    }

    #[tokio::test]
    async fn later_rounds_require_qualification_from_the_previous_one() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 1).await;

        for candidate in ["alice", "bob", "mallory"] {
            start_exam(&ctx.state, candidate, 1).await.unwrap();
        }
        submit_exam(&ctx.state, "alice", 1, &uniform_answers(3, "A"), SubmissionKind::Manual)
            .await
            .unwrap();
        submit_exam(&ctx.state, "bob", 1, &uniform_answers(3, "B"), SubmissionKind::Manual)
            .await
            .unwrap();
        report_violation(&ctx.state, "mallory", 1, &[]).await.unwrap();
        report_violation(&ctx.state, "mallory", 1, &[]).await.unwrap();

        rounds::end_round(&ctx.state).await.unwrap();
        test_support::seed_round(&ctx.state, 2, 3, 1).await;
        rounds::start_round(&ctx.state, 2).await.unwrap();

        assert!(start_exam(&ctx.state, "alice", 2).await.is_ok());
        assert!(matches!(
            start_exam(&ctx.state, "bob", 2).await.unwrap_err(),
            ExamError::NotEligible(2)
        ));
        assert!(matches!(
            start_exam(&ctx.state, "mallory", 2).await.unwrap_err(),
            ExamError::Disqualified(1)
        ));
        assert!(matches!(
            start_exam(&ctx.state, "nobody", 2).await.unwrap_err(),
            ExamError::NotEligible(2)
        ));
    }

    #[tokio::test]
    async fn progress_snapshots_drop_malformed_answers_and_feed_resume() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_running_round(&ctx.state, 1, 3, 10).await;

        let started = start_exam(&ctx.state, "tok-1", 1).await.unwrap();
        assert!(!started.resumed);

        let entries = vec![
            ("q01".to_string(), " b ".to_string()),
            ("q02".to_string(), "Z".to_string()),
            ("ghost".to_string(), "A".to_string()),
            ("q03".to_string(), "c".to_string()),
        ];
        assert!(save_progress(&ctx.state, "tok-1", 1, &entries).await.unwrap());

        let resumed = start_exam(&ctx.state, "tok-1", 1).await.unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.session.answers.0.len(), 2);
        assert_eq!(resumed.session.answers.0.get("q01").map(String::as_str), Some("B"));
    }
}
