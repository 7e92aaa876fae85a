use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;

use crate::api::errors::ApiError;
use crate::core::state::AppState;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Shared-secret guard for the round administration surface. Extracting it
/// succeeds only when the request carries the configured admin key.
pub(crate) struct AdminKey;

#[async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let configured = app_state.settings().admin().api_key.clone();
        if configured.is_empty() {
            return Err(ApiError::ServiceUnavailable("Admin API key is not configured".to_string()));
        }

        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Admin key required"))?;

        if presented != configured {
            return Err(ApiError::Unauthorized("Invalid admin key"));
        }

        Ok(AdminKey)
    }
}
