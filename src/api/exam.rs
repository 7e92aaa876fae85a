use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::format_primitive;
use crate::db::types::{RoundStatus, SubmissionKind};
use crate::schemas::exam::{
    answer_pairs, ProgressRequest, ProgressResponse, QuestionResponse, QuestionsQuery,
    StartExamRequest, StartExamResponse, SubmitExamRequest, SubmitExamResponse, ViolationRequest,
    ViolationResponse,
};
use crate::services::sessions;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_exam))
        .route("/submit", post(submit_exam))
        .route("/violation", post(report_violation))
        .route("/progress", post(save_progress))
        .route("/questions", get(list_questions))
}

async fn start_exam(
    State(state): State<AppState>,
    Json(payload): Json<StartExamRequest>,
) -> Result<Json<StartExamResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = sessions::start_exam(&state, &payload.candidate_token, payload.round).await?;

    Ok(Json(StartExamResponse {
        round: payload.round,
        deadline: format_primitive(outcome.deadline),
        resumed: outcome.resumed,
        resume_position: outcome.session.answers.0.len(),
        violation_count: outcome.session.violations,
    }))
}

async fn submit_exam(
    State(state): State<AppState>,
    Json(payload): Json<SubmitExamRequest>,
) -> Result<Json<SubmitExamResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let kind = SubmissionKind::from_client(payload.submission_type.as_deref());
    let entries = answer_pairs(&payload.answers);
    let summary =
        sessions::submit_exam(&state, &payload.candidate_token, payload.round, &entries, kind)
            .await?;

    Ok(Json(SubmitExamResponse {
        already_submitted: summary.already_submitted,
        elapsed_seconds: summary.elapsed_seconds,
        recorded_answer_count: summary.recorded_answer_count,
    }))
}

async fn report_violation(
    State(state): State<AppState>,
    Json(payload): Json<ViolationRequest>,
) -> Result<Json<ViolationResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let entries = answer_pairs(&payload.answers);
    let summary =
        sessions::report_violation(&state, &payload.candidate_token, payload.round, &entries)
            .await?;

    Ok(Json(ViolationResponse {
        warning: summary.warning,
        auto_submitted: summary.auto_submitted,
        disqualified: summary.disqualified,
        violation_count: summary.violation_count,
    }))
}

async fn save_progress(
    State(state): State<AppState>,
    Json(payload): Json<ProgressRequest>,
) -> Result<Json<ProgressResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let entries = answer_pairs(&payload.answers);
    let saved =
        sessions::save_progress(&state, &payload.candidate_token, payload.round, &entries).await?;

    Ok(Json(ProgressResponse { saved }))
}

async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<QuestionsQuery>,
) -> Result<Json<Vec<QuestionResponse>>, ApiError> {
    let round = state
        .store()
        .get_round(query.round)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load round"))?
        .ok_or_else(|| ApiError::NotFound(format!("round {} not found", query.round)))?;

    if round.status != RoundStatus::Running {
        return Err(ApiError::Conflict(format!("round {} is not running", query.round)));
    }

    let questions = state
        .store()
        .questions(query.round)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load questions"))?;

    Ok(Json(
        questions
            .into_iter()
            .map(|q| QuestionResponse { id: q.id, text: q.text, options: q.options.0 })
            .collect(),
    ))
}
