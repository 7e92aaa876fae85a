pub(crate) mod memory;
pub(crate) mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{AnswerSet, ExamSession, Question, ResultRow, Round};
use crate::db::types::SubmissionKind;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct NewQuestion {
    pub(crate) id: String,
    pub(crate) text: String,
    pub(crate) options: Vec<String>,
    pub(crate) correct_option: String,
}

/// Result of the submit compare-and-set. Exactly one caller ever observes
/// `already_submitted == false` for a given session; everyone else reads
/// the winner's terminal state.
#[derive(Debug)]
pub(crate) struct SubmitOutcome {
    pub(crate) session: ExamSession,
    pub(crate) already_submitted: bool,
}

/// Result of a violation report. `applied == false` means the session was
/// already terminal and nothing changed.
#[derive(Debug)]
pub(crate) struct ViolationRecord {
    pub(crate) session: ExamSession,
    pub(crate) applied: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ResultCounts {
    pub(crate) scored: i64,
    pub(crate) qualified: i64,
}

/// Storage boundary of the exam core. Every method is an atomic unit: the
/// conditional transitions report whether the caller won the race, and the
/// multi-effect operations (violation strike-out, result rewrite) are applied
/// all-or-nothing by each implementation.
#[async_trait]
pub(crate) trait ExamStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    // Round lifecycle.
    async fn upsert_pending_round(
        &self,
        round_no: i32,
        duration_seconds: i64,
        cutoff: i32,
    ) -> Result<Option<Round>, StoreError>;
    async fn get_round(&self, round_no: i32) -> Result<Option<Round>, StoreError>;
    async fn active_round(&self) -> Result<Option<Round>, StoreError>;
    /// The highest-numbered round that has ever started (running or
    /// completed).
    async fn latest_round(&self) -> Result<Option<Round>, StoreError>;
    /// "Start where still pending" — true iff this caller performed the
    /// transition.
    async fn try_start_round(
        &self,
        round_no: i32,
        started_at: PrimitiveDateTime,
        deadline: PrimitiveDateTime,
    ) -> Result<bool, StoreError>;
    /// "Complete where not completed" — the round-finalization guard. True
    /// iff this caller won; losers must treat the round as already final.
    async fn try_complete_round(&self, round_no: i32) -> Result<bool, StoreError>;
    async fn set_shortlisted(&self, round_no: i32) -> Result<(), StoreError>;

    // Question store.
    async fn replace_questions(
        &self,
        round_no: i32,
        questions: &[NewQuestion],
    ) -> Result<(), StoreError>;
    async fn questions(&self, round_no: i32) -> Result<Vec<Question>, StoreError>;
    async fn question_count(&self, round_no: i32) -> Result<i64, StoreError>;

    // Sessions and the submission ledger.
    async fn find_session(
        &self,
        candidate: &str,
        round_no: i32,
    ) -> Result<Option<ExamSession>, StoreError>;
    /// Idempotent creation: a concurrent duplicate observes the row the
    /// winner inserted.
    async fn create_session_if_absent(
        &self,
        candidate: &str,
        round_no: i32,
        started_at: PrimitiveDateTime,
    ) -> Result<ExamSession, StoreError>;
    /// Last-write-wins answer snapshot while the session is open. False if
    /// the session is terminal (or missing) and nothing was saved.
    async fn save_progress(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
    ) -> Result<bool, StoreError>;
    /// "Mark submitted where not submitted", persisting the winner's answer
    /// payload. None if no session exists.
    async fn try_submit_session(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
        kind: SubmissionKind,
        submitted_at: PrimitiveDateTime,
        elapsed_seconds: i64,
    ) -> Result<Option<SubmitOutcome>, StoreError>;
    /// Increments the violation counter while the session is open; on the
    /// second strike persists `answers`, force-submits and disqualifies as
    /// one unit. None if no session exists.
    async fn register_violation(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
        now: PrimitiveDateTime,
    ) -> Result<Option<ViolationRecord>, StoreError>;
    /// Bulk terminal transition for round end; only touches sessions still
    /// in progress, so it is safe to re-run.
    async fn force_submit_open_sessions(
        &self,
        round_no: i32,
        now: PrimitiveDateTime,
    ) -> Result<u64, StoreError>;
    async fn submitted_sessions(&self, round_no: i32) -> Result<Vec<ExamSession>, StoreError>;

    // Results.
    async fn replace_results(&self, round_no: i32, rows: &[ResultRow]) -> Result<(), StoreError>;
    async fn results(&self, round_no: i32) -> Result<Vec<ResultRow>, StoreError>;
    async fn replace_qualified(
        &self,
        round_no: i32,
        qualified: &[String],
    ) -> Result<(), StoreError>;
    async fn result_counts(&self, round_no: i32) -> Result<ResultCounts, StoreError>;
    async fn is_qualified(&self, candidate: &str, round_no: i32) -> Result<bool, StoreError>;
}
