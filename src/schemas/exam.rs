use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct StartExamRequest {
    #[serde(alias = "candidateToken")]
    #[validate(length(min = 1, max = 128, message = "candidate_token must be 1..=128 characters"))]
    pub(crate) candidate_token: String,
    #[validate(range(min = 1, message = "round must be positive"))]
    pub(crate) round: i32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerEntry {
    #[serde(alias = "questionId")]
    pub(crate) question_id: String,
    #[serde(alias = "selectedOption")]
    pub(crate) selected_option: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitExamRequest {
    #[serde(alias = "candidateToken")]
    #[validate(length(min = 1, max = 128, message = "candidate_token must be 1..=128 characters"))]
    pub(crate) candidate_token: String,
    #[validate(range(min = 1, message = "round must be positive"))]
    pub(crate) round: i32,
    #[serde(default)]
    pub(crate) answers: Vec<AnswerEntry>,
    /// Client-declared reason; unknown values are treated as manual.
    #[serde(default)]
    #[serde(alias = "submissionType")]
    pub(crate) submission_type: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ViolationRequest {
    #[serde(alias = "candidateToken")]
    #[validate(length(min = 1, max = 128, message = "candidate_token must be 1..=128 characters"))]
    pub(crate) candidate_token: String,
    #[validate(range(min = 1, message = "round must be positive"))]
    pub(crate) round: i32,
    #[serde(default)]
    pub(crate) answers: Vec<AnswerEntry>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ProgressRequest {
    #[serde(alias = "candidateToken")]
    #[validate(length(min = 1, max = 128, message = "candidate_token must be 1..=128 characters"))]
    pub(crate) candidate_token: String,
    #[validate(range(min = 1, message = "round must be positive"))]
    pub(crate) round: i32,
    #[serde(default)]
    pub(crate) answers: Vec<AnswerEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuestionsQuery {
    pub(crate) round: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct StartExamResponse {
    pub(crate) round: i32,
    pub(crate) deadline: String,
    pub(crate) resumed: bool,
    pub(crate) resume_position: usize,
    pub(crate) violation_count: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitExamResponse {
    pub(crate) already_submitted: bool,
    pub(crate) elapsed_seconds: i64,
    pub(crate) recorded_answer_count: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct ViolationResponse {
    pub(crate) warning: bool,
    pub(crate) auto_submitted: bool,
    pub(crate) disqualified: bool,
    pub(crate) violation_count: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProgressResponse {
    pub(crate) saved: bool,
}

/// Candidate-facing question view; the correct option never leaves the
/// server.
#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: String,
    pub(crate) text: String,
    pub(crate) options: Vec<String>,
}

pub(crate) fn answer_pairs(entries: &[AnswerEntry]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|entry| (entry.question_id.clone(), entry.selected_option.clone()))
        .collect()
}
