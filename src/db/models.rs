use std::collections::HashMap;

use sqlx::types::Json;
use time::PrimitiveDateTime;

use crate::db::types::{RoundStatus, SessionStatus, SubmissionKind};

/// Selected options keyed by question id. At most one selection per
/// question; the sanitizer in the session service drops unknown ids and
/// malformed option letters before anything reaches the store.
pub(crate) type AnswerSet = HashMap<String, String>;

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct Round {
    pub(crate) round_no: i32,
    pub(crate) status: RoundStatus,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) deadline: Option<PrimitiveDateTime>,
    pub(crate) duration_seconds: i64,
    pub(crate) cutoff: i32,
    pub(crate) shortlisted: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct Question {
    pub(crate) round_no: i32,
    pub(crate) id: String,
    pub(crate) text: String,
    pub(crate) options: Json<Vec<String>>,
    pub(crate) correct_option: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ExamSession {
    pub(crate) candidate: String,
    pub(crate) round_no: i32,
    pub(crate) status: SessionStatus,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) elapsed_seconds: Option<i64>,
    pub(crate) violations: i32,
    pub(crate) disqualified: bool,
    pub(crate) submission_kind: Option<SubmissionKind>,
    pub(crate) answers: Json<AnswerSet>,
}

impl ExamSession {
    pub(crate) fn is_submitted(&self) -> bool {
        self.status == SessionStatus::Submitted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct ResultRow {
    pub(crate) candidate: String,
    pub(crate) round_no: i32,
    pub(crate) score: i32,
    pub(crate) elapsed_seconds: Option<i64>,
    pub(crate) rank: Option<i32>,
    pub(crate) qualified: bool,
}
