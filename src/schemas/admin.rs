use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::types::RoundStatus;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[validate(length(min = 1, max = 64, message = "question id must be 1..=64 characters"))]
    pub(crate) id: String,
    #[validate(length(min = 1, message = "question text must not be empty"))]
    pub(crate) text: String,
    #[validate(length(min = 2, max = 26, message = "a question needs 2..=26 options"))]
    pub(crate) options: Vec<String>,
    #[serde(alias = "correctOption")]
    #[validate(length(min = 1, max = 1, message = "correct_option must be a single letter"))]
    pub(crate) correct_option: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RoundCreate {
    #[serde(alias = "roundNo")]
    #[validate(range(min = 1, message = "round_no must be positive"))]
    pub(crate) round_no: i32,
    #[serde(alias = "durationSeconds")]
    #[validate(range(min = 1, message = "duration_seconds must be positive"))]
    pub(crate) duration_seconds: i64,
    #[validate(range(min = 1, message = "cutoff must be positive"))]
    pub(crate) cutoff: i32,
    #[validate(nested)]
    pub(crate) questions: Vec<QuestionCreate>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ShortlistRequest {
    #[serde(alias = "topN")]
    #[validate(range(min = 0, message = "top_n must be non-negative"))]
    pub(crate) top_n: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoundResponse {
    pub(crate) round_no: i32,
    pub(crate) status: RoundStatus,
    pub(crate) duration_seconds: i64,
    pub(crate) cutoff: i32,
    pub(crate) question_count: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoundStartedResponse {
    pub(crate) round_no: i32,
    pub(crate) started_at: String,
    pub(crate) deadline: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EndRoundResponse {
    pub(crate) round_no: i32,
    pub(crate) already_completed: bool,
    pub(crate) auto_submitted_count: u64,
    pub(crate) scored_count: i64,
    pub(crate) qualified_count: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct RescoreResponse {
    pub(crate) round_no: i32,
    pub(crate) scored_count: i64,
    pub(crate) qualified_count: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ShortlistResponse {
    pub(crate) round_no: i32,
    pub(crate) qualified_count: i64,
    pub(crate) total_eligible: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResultEntryResponse {
    pub(crate) candidate_token: String,
    pub(crate) score: i32,
    pub(crate) elapsed_seconds: Option<i64>,
    pub(crate) rank: Option<i32>,
    pub(crate) qualified: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResultsResponse {
    pub(crate) round_no: i32,
    pub(crate) results: Vec<ResultEntryResponse>,
}
