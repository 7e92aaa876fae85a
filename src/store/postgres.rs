use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::{AnswerSet, ExamSession, Question, ResultRow, Round};
use crate::db::types::SubmissionKind;
use crate::store::{
    ExamStore, NewQuestion, ResultCounts, StoreError, SubmitOutcome, ViolationRecord,
};

const ROUND_COLUMNS: &str =
    "round_no, status, started_at, deadline, duration_seconds, cutoff, shortlisted";

const QUESTION_COLUMNS: &str = "round_no, id, text, options, correct_option";

const SESSION_COLUMNS: &str = "\
    candidate, round_no, status, started_at, submitted_at, elapsed_seconds, \
    violations, disqualified, submission_kind, answers";

const RESULT_COLUMNS: &str = "candidate, round_no, score, elapsed_seconds, rank, qualified";

/// Production store. All conditional transitions are single conditional
/// UPDATEs so the database is the arbiter of every race; the violation
/// strike-out runs in a transaction with the session row locked.
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn upsert_pending_round(
        &self,
        round_no: i32,
        duration_seconds: i64,
        cutoff: i32,
    ) -> Result<Option<Round>, StoreError> {
        let round = sqlx::query_as::<_, Round>(&format!(
            "INSERT INTO rounds (round_no, duration_seconds, cutoff) VALUES ($1, $2, $3) \
             ON CONFLICT (round_no) DO UPDATE \
             SET duration_seconds = EXCLUDED.duration_seconds, cutoff = EXCLUDED.cutoff \
             WHERE rounds.status = 'pending' \
             RETURNING {ROUND_COLUMNS}"
        ))
        .bind(round_no)
        .bind(duration_seconds)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(round)
    }

    async fn get_round(&self, round_no: i32) -> Result<Option<Round>, StoreError> {
        let round =
            sqlx::query_as::<_, Round>(&format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE round_no = $1"))
                .bind(round_no)
                .fetch_optional(&self.pool)
                .await?;
        Ok(round)
    }

    async fn active_round(&self) -> Result<Option<Round>, StoreError> {
        let round = sqlx::query_as::<_, Round>(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE status = 'running'"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(round)
    }

    async fn latest_round(&self) -> Result<Option<Round>, StoreError> {
        let round = sqlx::query_as::<_, Round>(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE status <> 'pending' \
             ORDER BY round_no DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(round)
    }

    async fn try_start_round(
        &self,
        round_no: i32,
        started_at: PrimitiveDateTime,
        deadline: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE rounds SET status = 'running', started_at = $2, deadline = $3 \
             WHERE round_no = $1 AND status = 'pending'",
        )
        .bind(round_no)
        .bind(started_at)
        .bind(deadline)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_complete_round(&self, round_no: i32) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE rounds SET status = 'completed' \
             WHERE round_no = $1 AND status <> 'completed'",
        )
        .bind(round_no)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_shortlisted(&self, round_no: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE rounds SET shortlisted = TRUE WHERE round_no = $1")
            .bind(round_no)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_questions(
        &self,
        round_no: i32,
        questions: &[NewQuestion],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM questions WHERE round_no = $1")
            .bind(round_no)
            .execute(&mut *tx)
            .await?;

        if !questions.is_empty() {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO questions (round_no, id, text, options, correct_option) ",
            );
            builder.push_values(questions, |mut row, question| {
                row.push_bind(round_no)
                    .push_bind(&question.id)
                    .push_bind(&question.text)
                    .push_bind(Json(&question.options))
                    .push_bind(&question.correct_option);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn questions(&self, round_no: i32) -> Result<Vec<Question>, StoreError> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE round_no = $1 ORDER BY id"
        ))
        .bind(round_no)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }

    async fn question_count(&self, round_no: i32) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE round_no = $1")
            .bind(round_no)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn find_session(
        &self,
        candidate: &str,
        round_no: i32,
    ) -> Result<Option<ExamSession>, StoreError> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE candidate = $1 AND round_no = $2"
        ))
        .bind(candidate)
        .bind(round_no)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn create_session_if_absent(
        &self,
        candidate: &str,
        round_no: i32,
        started_at: PrimitiveDateTime,
    ) -> Result<ExamSession, StoreError> {
        sqlx::query(
            "INSERT INTO sessions (candidate, round_no, started_at) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(candidate)
        .bind(round_no)
        .bind(started_at)
        .execute(&self.pool)
        .await?;

        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE candidate = $1 AND round_no = $2"
        ))
        .bind(candidate)
        .bind(round_no)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    async fn save_progress(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET answers = $3 \
             WHERE candidate = $1 AND round_no = $2 AND status <> 'submitted'",
        )
        .bind(candidate)
        .bind(round_no)
        .bind(Json(answers))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
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
        let winner = sqlx::query_as::<_, ExamSession>(&format!(
            "UPDATE sessions \
             SET status = 'submitted', answers = $3, submission_kind = $4, \
                 submitted_at = $5, elapsed_seconds = $6 \
             WHERE candidate = $1 AND round_no = $2 AND status <> 'submitted' \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(candidate)
        .bind(round_no)
        .bind(Json(answers))
        .bind(kind)
        .bind(submitted_at)
        .bind(elapsed_seconds)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(session) = winner {
            return Ok(Some(SubmitOutcome { session, already_submitted: false }));
        }

        let existing = self.find_session(candidate, round_no).await?;
        Ok(existing.map(|session| SubmitOutcome { session, already_submitted: true }))
    }

    async fn register_violation(
        &self,
        candidate: &str,
        round_no: i32,
        answers: &AnswerSet,
        now: PrimitiveDateTime,
    ) -> Result<Option<ViolationRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE candidate = $1 AND round_no = $2 FOR UPDATE"
        ))
        .bind(candidate)
        .bind(round_no)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(session) = session else {
            return Ok(None);
        };

        if session.is_submitted() {
            return Ok(Some(ViolationRecord { session, applied: false }));
        }

        let violations = session.violations + 1;
        let updated = if violations >= 2 {
            // Second strike: answers-so-far, terminal submission and the
            // disqualified flag land in one statement inside the transaction.
            sqlx::query_as::<_, ExamSession>(&format!(
                "UPDATE sessions \
                 SET violations = $3, answers = $4, status = 'submitted', \
                     submission_kind = 'violation_triggered', submitted_at = $5, \
                     elapsed_seconds = GREATEST(EXTRACT(EPOCH FROM ($5 - started_at))::BIGINT, 0), \
                     disqualified = TRUE \
                 WHERE candidate = $1 AND round_no = $2 \
                 RETURNING {SESSION_COLUMNS}"
            ))
            .bind(candidate)
            .bind(round_no)
            .bind(violations)
            .bind(Json(answers))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, ExamSession>(&format!(
                "UPDATE sessions SET violations = $3 \
                 WHERE candidate = $1 AND round_no = $2 \
                 RETURNING {SESSION_COLUMNS}"
            ))
            .bind(candidate)
            .bind(round_no)
            .bind(violations)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(Some(ViolationRecord { session: updated, applied: true }))
    }

    async fn force_submit_open_sessions(
        &self,
        round_no: i32,
        now: PrimitiveDateTime,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions \
             SET status = 'submitted', submission_kind = 'round_forced', submitted_at = $2, \
                 elapsed_seconds = GREATEST(EXTRACT(EPOCH FROM ($2 - started_at))::BIGINT, 0) \
             WHERE round_no = $1 AND status = 'in_progress'",
        )
        .bind(round_no)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn submitted_sessions(&self, round_no: i32) -> Result<Vec<ExamSession>, StoreError> {
        let sessions = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE round_no = $1 AND status = 'submitted' ORDER BY candidate"
        ))
        .bind(round_no)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn replace_results(&self, round_no: i32, rows: &[ResultRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM results WHERE round_no = $1")
            .bind(round_no)
            .execute(&mut *tx)
            .await?;

        if !rows.is_empty() {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO results (candidate, round_no, score, elapsed_seconds, rank, qualified) ",
            );
            builder.push_values(rows, |mut row, result| {
                row.push_bind(&result.candidate)
                    .push_bind(result.round_no)
                    .push_bind(result.score)
                    .push_bind(result.elapsed_seconds)
                    .push_bind(result.rank)
                    .push_bind(result.qualified);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn results(&self, round_no: i32) -> Result<Vec<ResultRow>, StoreError> {
        let rows = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE round_no = $1 \
             ORDER BY rank ASC NULLS LAST, candidate ASC"
        ))
        .bind(round_no)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn replace_qualified(
        &self,
        round_no: i32,
        qualified: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE results SET qualified = (candidate = ANY($2)) WHERE round_no = $1",
        )
        .bind(round_no)
        .bind(qualified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn result_counts(&self, round_no: i32) -> Result<ResultCounts, StoreError> {
        let (scored, qualified): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE qualified) \
             FROM results WHERE round_no = $1",
        )
        .bind(round_no)
        .fetch_one(&self.pool)
        .await?;

        Ok(ResultCounts { scored, qualified })
    }

    async fn is_qualified(&self, candidate: &str, round_no: i32) -> Result<bool, StoreError> {
        let qualified: Option<bool> = sqlx::query_scalar(
            "SELECT qualified FROM results WHERE candidate = $1 AND round_no = $2",
        )
        .bind(candidate)
        .bind(round_no)
        .fetch_optional(&self.pool)
        .await?;

        Ok(qualified.unwrap_or(false))
    }
}
