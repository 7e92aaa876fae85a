use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::AdminKey;
use crate::core::state::AppState;
use crate::core::time::format_primitive;
use crate::schemas::admin::{
    EndRoundResponse, RescoreResponse, ResultEntryResponse, ResultsResponse, RoundCreate,
    RoundResponse, RoundStartedResponse, ShortlistRequest, ShortlistResponse,
};
use crate::services::rounds::{self, RoundSetup};
use crate::store::NewQuestion;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/rounds", post(create_round))
        .route("/rounds/end", post(end_round))
        .route("/rounds/:round_no/start", post(start_round))
        .route("/rounds/:round_no/rescore", post(rescore_round))
        .route("/rounds/:round_no/shortlist", post(apply_shortlist))
        .route("/rounds/:round_no/results", get(round_results))
}

async fn create_round(
    _: AdminKey,
    State(state): State<AppState>,
    Json(payload): Json<RoundCreate>,
) -> Result<(StatusCode, Json<RoundResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut questions = Vec::with_capacity(payload.questions.len());
    for question in &payload.questions {
        let letter = question.correct_option.trim().to_ascii_uppercase();
        let valid = letter.len() == 1
            && letter.bytes().next().is_some_and(|b| {
                b.is_ascii_uppercase() && ((b - b'A') as usize) < question.options.len()
            });
        if !valid {
            return Err(ApiError::BadRequest(format!(
                "question {}: correct_option must name one of its options",
                question.id
            )));
        }

        questions.push(NewQuestion {
            id: question.id.clone(),
            text: question.text.clone(),
            options: question.options.clone(),
            correct_option: letter,
        });
    }

    let question_count = questions.len();
    let round = rounds::configure_round(
        &state,
        RoundSetup {
            round_no: payload.round_no,
            duration_seconds: payload.duration_seconds,
            cutoff: payload.cutoff,
            questions,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(RoundResponse {
            round_no: round.round_no,
            status: round.status,
            duration_seconds: round.duration_seconds,
            cutoff: round.cutoff,
            question_count,
        }),
    ))
}

async fn start_round(
    _: AdminKey,
    State(state): State<AppState>,
    Path(round_no): Path<i32>,
) -> Result<Json<RoundStartedResponse>, ApiError> {
    let round = rounds::start_round(&state, round_no).await?;

    let started_at = round
        .started_at
        .ok_or_else(|| ApiError::Internal("started round has no start time".to_string()))?;
    let deadline = round
        .deadline
        .ok_or_else(|| ApiError::Internal("started round has no deadline".to_string()))?;

    Ok(Json(RoundStartedResponse {
        round_no,
        started_at: format_primitive(started_at),
        deadline: format_primitive(deadline),
    }))
}

async fn end_round(
    _: AdminKey,
    State(state): State<AppState>,
) -> Result<Json<EndRoundResponse>, ApiError> {
    let summary = rounds::end_round(&state).await?;

    Ok(Json(EndRoundResponse {
        round_no: summary.round_no,
        already_completed: summary.already_completed,
        auto_submitted_count: summary.auto_submitted_count,
        scored_count: summary.scored_count,
        qualified_count: summary.qualified_count,
    }))
}

async fn rescore_round(
    _: AdminKey,
    State(state): State<AppState>,
    Path(round_no): Path<i32>,
) -> Result<Json<RescoreResponse>, ApiError> {
    let summary = rounds::rescore(&state, round_no).await?;

    Ok(Json(RescoreResponse {
        round_no,
        scored_count: summary.scored_count,
        qualified_count: summary.qualified_count,
    }))
}

async fn apply_shortlist(
    _: AdminKey,
    State(state): State<AppState>,
    Path(round_no): Path<i32>,
    Json(payload): Json<ShortlistRequest>,
) -> Result<Json<ShortlistResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let summary = rounds::apply_shortlist(&state, round_no, payload.top_n).await?;

    Ok(Json(ShortlistResponse {
        round_no,
        qualified_count: summary.qualified_count,
        total_eligible: summary.total_eligible,
    }))
}

async fn round_results(
    _: AdminKey,
    State(state): State<AppState>,
    Path(round_no): Path<i32>,
) -> Result<Json<ResultsResponse>, ApiError> {
    state
        .store()
        .get_round(round_no)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load round"))?
        .ok_or_else(|| ApiError::NotFound(format!("round {round_no} not found")))?;

    let results = state
        .store()
        .results(round_no)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load results"))?;

    Ok(Json(ResultsResponse {
        round_no,
        results: results
            .into_iter()
            .map(|row| ResultEntryResponse {
                candidate_token: row.candidate,
                score: row.score,
                elapsed_seconds: row.elapsed_seconds,
                rank: row.rank,
                qualified: row.qualified,
            })
            .collect(),
    }))
}
