use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::types::Json;
use time::PrimitiveDateTime;
use tokio::sync::Mutex;

use crate::core::time::elapsed_seconds;
use crate::db::models::{AnswerSet, ExamSession, Question, ResultRow, Round};
use crate::db::types::{RoundStatus, SessionStatus, SubmissionKind};
use crate::store::{
    ExamStore, NewQuestion, ResultCounts, StoreError, SubmitOutcome, ViolationRecord,
};

/// In-memory store for local runs and the test suite. One mutex over the
/// whole state makes every trait method an atomic unit, which is exactly
/// the contract the Postgres store provides with conditional UPDATEs and
/// transactions.
#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    rounds: BTreeMap<i32, Round>,
    questions: BTreeMap<i32, Vec<Question>>,
    sessions: BTreeMap<(i32, String), ExamSession>,
    results: BTreeMap<i32, Vec<ResultRow>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

fn result_sort_key(row: &ResultRow) -> (bool, i32, String) {
    (row.rank.is_none(), row.rank.unwrap_or(i32::MAX), row.candidate.clone())
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_pending_round(
        &self,
        round_no: i32,
        duration_seconds: i64,
        cutoff: i32,
    ) -> Result<Option<Round>, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(round) = inner.rounds.get_mut(&round_no) {
            if round.status != RoundStatus::Pending {
                return Ok(None);
            }
            round.duration_seconds = duration_seconds;
            round.cutoff = cutoff;
            return Ok(Some(round.clone()));
        }

        let round = Round {
            round_no,
            status: RoundStatus::Pending,
            started_at: None,
            deadline: None,
            duration_seconds,
            cutoff,
            shortlisted: false,
        };
        inner.rounds.insert(round_no, round.clone());
        Ok(Some(round))
    }

    async fn get_round(&self, round_no: i32) -> Result<Option<Round>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.rounds.get(&round_no).cloned())
    }

    async fn active_round(&self) -> Result<Option<Round>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.rounds.values().find(|round| round.status == RoundStatus::Running).cloned())
    }

    async fn latest_round(&self) -> Result<Option<Round>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rounds
            .values()
            .filter(|round| round.status != RoundStatus::Pending)
            .next_back()
            .cloned())
    }

    async fn try_start_round(
        &self,
        round_no: i32,
        started_at: PrimitiveDateTime,
        deadline: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(round) = inner.rounds.get_mut(&round_no) else {
            return Ok(false);
        };
        if round.status != RoundStatus::Pending {
            return Ok(false);
        }

        round.status = RoundStatus::Running;
        round.started_at = Some(started_at);
        round.deadline = Some(deadline);
        Ok(true)
    }

    async fn try_complete_round(&self, round_no: i32) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(round) = inner.rounds.get_mut(&round_no) else {
            return Ok(false);
        };
        if round.status == RoundStatus::Completed {
            return Ok(false);
        }

        round.status = RoundStatus::Completed;
        Ok(true)
    }

    async fn set_shortlisted(&self, round_no: i32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(round) = inner.rounds.get_mut(&round_no) {
            round.shortlisted = true;
        }
        Ok(())
    }

    async fn replace_questions(
        &self,
        round_no: i32,
        questions: &[NewQuestion],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        let mut rows: Vec<Question> = questions
            .iter()
            .map(|question| Question {
                round_no,
                id: question.id.clone(),
                text: question.text.clone(),
                options: Json(question.options.clone()),
                correct_option: question.correct_option.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));

        inner.questions.insert(round_no, rows);
        Ok(())
    }

    async fn questions(&self, round_no: i32) -> Result<Vec<Question>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.questions.get(&round_no).cloned().unwrap_or_default())
    }

    async fn question_count(&self, round_no: i32) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.questions.get(&round_no).map(|rows| rows.len() as i64).unwrap_or(0))
    }

    async fn find_session(
        &self,
        candidate: &str,
        round_no: i32,
    ) -> Result<Option<ExamSession>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(&(round_no, candidate.to_string())).cloned())
    }

    async fn create_session_if_absent(
        &self,
        candidate: &str,
        round_no: i32,
        started_at: PrimitiveDateTime,
    ) -> Result<ExamSession, StoreError> {
        let mut inner = self.inner.lock().await;

        let session = inner
            .sessions
            .entry((round_no, candidate.to_string()))
            .or_insert_with(|| ExamSession {
                candidate: candidate.to_string(),
                round_no,
                status: SessionStatus::InProgress,
                started_at,
                submitted_at: None,
                elapsed_seconds: None,
                violations: 0,
                disqualified: false,
                submission_kind: None,
                answers: Json(AnswerSet::new()),
            })
            .clone();

        Ok(session)
    }

    async fn save_progress(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(session) = inner.sessions.get_mut(&(round_no, candidate.to_string())) else {
            return Ok(false);
        };
        if session.is_submitted() {
            return Ok(false);
        }

        session.answers = Json(answers.clone());
        Ok(true)
    }

    async fn try_submit_session(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
        kind: SubmissionKind,
        submitted_at: PrimitiveDateTime,
        elapsed_seconds: i64,
    ) -> Result<Option<SubmitOutcome>, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(session) = inner.sessions.get_mut(&(round_no, candidate.to_string())) else {
            return Ok(None);
        };

        if session.is_submitted() {
            return Ok(Some(SubmitOutcome { session: session.clone(), already_submitted: true }));
        }

        session.status = SessionStatus::Submitted;
        session.answers = Json(answers.clone());
        session.submission_kind = Some(kind);
        session.submitted_at = Some(submitted_at);
        session.elapsed_seconds = Some(elapsed_seconds);
        Ok(Some(SubmitOutcome { session: session.clone(), already_submitted: false }))
    }

    async fn register_violation(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
        now: PrimitiveDateTime,
    ) -> Result<Option<ViolationRecord>, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(session) = inner.sessions.get_mut(&(round_no, candidate.to_string())) else {
            return Ok(None);
        };

        if session.is_submitted() {
            return Ok(Some(ViolationRecord { session: session.clone(), applied: false }));
        }

        session.violations += 1;
        if session.violations >= 2 {
            session.answers = Json(answers.clone());
            session.status = SessionStatus::Submitted;
            session.submission_kind = Some(SubmissionKind::ViolationTriggered);
            session.submitted_at = Some(now);
            session.elapsed_seconds = Some(elapsed_seconds(session.started_at, now));
            session.disqualified = true;
        }

        Ok(Some(ViolationRecord { session: session.clone(), applied: true }))
    }

    async fn force_submit_open_sessions(
        &self,
        round_no: i32,
        now: PrimitiveDateTime,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;

        let mut forced = 0u64;
        for ((session_round, _), session) in inner.sessions.iter_mut() {
            if *session_round != round_no || session.is_submitted() {
                continue;
            }
            session.status = SessionStatus::Submitted;
            session.submission_kind = Some(SubmissionKind::RoundForced);
            session.submitted_at = Some(now);
            session.elapsed_seconds = Some(elapsed_seconds(session.started_at, now));
            forced += 1;
        }

        Ok(forced)
    }

    async fn submitted_sessions(&self, round_no: i32) -> Result<Vec<ExamSession>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .filter(|session| session.round_no == round_no && session.is_submitted())
            .cloned()
            .collect())
    }

    async fn replace_results(&self, round_no: i32, rows: &[ResultRow]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.results.insert(round_no, rows.to_vec());
        Ok(())
    }

    async fn results(&self, round_no: i32) -> Result<Vec<ResultRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows = inner.results.get(&round_no).cloned().unwrap_or_default();
        rows.sort_by_key(result_sort_key);
        Ok(rows)
    }

    async fn replace_qualified(
        &self,
        round_no: i32,
        qualified: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(rows) = inner.results.get_mut(&round_no) {
            for row in rows.iter_mut() {
                row.qualified = qualified.iter().any(|candidate| candidate == &row.candidate);
            }
        }
        Ok(())
    }

    async fn result_counts(&self, round_no: i32) -> Result<ResultCounts, StoreError> {
        let inner = self.inner.lock().await;
        let rows = inner.results.get(&round_no);
        Ok(ResultCounts {
            scored: rows.map(|rows| rows.len() as i64).unwrap_or(0),
            qualified: rows
                .map(|rows| rows.iter().filter(|row| row.qualified).count() as i64)
                .unwrap_or(0),
        })
    }

    async fn is_qualified(&self, candidate: &str, round_no: i32) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .results
            .get(&round_no)
            .map(|rows| rows.iter().any(|row| row.candidate == candidate && row.qualified))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn answers(pairs: &[(&str, &str)]) -> AnswerSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn submit_cas_records_exactly_one_payload() {
        let store = MemoryStore::new();
        let now = primitive_now_utc();
        store.upsert_pending_round(1, 600, 10).await.unwrap();
        store.create_session_if_absent("tok-1", 1, now).await.unwrap();

        let first = store
            .try_submit_session("tok-1", 1, &answers(&[("q1", "A")]), SubmissionKind::Manual, now, 42)
            .await
            .unwrap()
            .unwrap();
        assert!(!first.already_submitted);

        let second = store
            .try_submit_session("tok-1", 1, &answers(&[("q1", "B")]), SubmissionKind::Manual, now, 99)
            .await
            .unwrap()
            .unwrap();
        assert!(second.already_submitted);
        assert_eq!(second.session.answers.0.get("q1").map(String::as_str), Some("A"));
        assert_eq!(second.session.elapsed_seconds, Some(42));
    }

    #[tokio::test]
    async fn complete_round_guard_fires_once() {
        let store = MemoryStore::new();
        let now = primitive_now_utc();
        store.upsert_pending_round(1, 600, 10).await.unwrap();
        assert!(store.try_start_round(1, now, now).await.unwrap());
        assert!(!store.try_start_round(1, now, now).await.unwrap());

        assert!(store.try_complete_round(1).await.unwrap());
        assert!(!store.try_complete_round(1).await.unwrap());
    }

    #[tokio::test]
    async fn second_strike_bundles_submit_and_disqualify() {
        let store = MemoryStore::new();
        let now = primitive_now_utc();
        store.upsert_pending_round(1, 600, 10).await.unwrap();
        store.create_session_if_absent("tok-1", 1, now).await.unwrap();

        let first = store.register_violation("tok-1", 1, &AnswerSet::new(), now).await.unwrap().unwrap();
        assert!(first.applied);
        assert_eq!(first.session.violations, 1);
        assert!(!first.session.disqualified);
        assert!(!first.session.is_submitted());

        let saved = answers(&[("q1", "C")]);
        let second = store.register_violation("tok-1", 1, &saved, now).await.unwrap().unwrap();
        assert!(second.applied);
        assert_eq!(second.session.violations, 2);
        assert!(second.session.disqualified);
        assert!(second.session.is_submitted());
        assert_eq!(second.session.submission_kind, Some(SubmissionKind::ViolationTriggered));
        assert_eq!(second.session.answers.0, saved);

        let third = store.register_violation("tok-1", 1, &AnswerSet::new(), now).await.unwrap().unwrap();
        assert!(!third.applied);
        assert_eq!(third.session.violations, 2);
    }

    #[tokio::test]
    async fn force_submit_only_touches_open_sessions() {
        let store = MemoryStore::new();
        let now = primitive_now_utc();
        store.upsert_pending_round(1, 600, 10).await.unwrap();
        store.create_session_if_absent("tok-1", 1, now).await.unwrap();
        store.create_session_if_absent("tok-2", 1, now).await.unwrap();
        store
            .try_submit_session("tok-1", 1, &AnswerSet::new(), SubmissionKind::Manual, now, 10)
            .await
            .unwrap();

        assert_eq!(store.force_submit_open_sessions(1, now).await.unwrap(), 1);
        // Idempotent: nothing left in progress.
        assert_eq!(store.force_submit_open_sessions(1, now).await.unwrap(), 0);

        let tok1 = store.find_session("tok-1", 1).await.unwrap().unwrap();
        assert_eq!(tok1.submission_kind, Some(SubmissionKind::Manual));
        let tok2 = store.find_session("tok-2", 1).await.unwrap().unwrap();
        assert_eq!(tok2.submission_kind, Some(SubmissionKind::RoundForced));
    }
}
