//! Golf helper endpoints, usable without a session.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json, Path};
use ceddy_assistant::{check_wind_conditions, ClubSuggestion, WindConditions};
use std::sync::Arc;

/// Handler for `GET /suggest-club/{distance}`.
pub async fn suggest_club_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(distance): Path<String>,
) -> Result<Json<ClubSuggestion>, ApiError> {
    let yards: f64 = distance
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid distance: {}", distance)))?;
    if !yards.is_finite() || yards < 0.0 {
        return Err(ApiError::BadRequest(format!("invalid distance: {}", distance)));
    }
    Ok(Json(state.clubs.suggest(yards)))
}

/// Handler for `GET /wind-conditions`.
pub async fn wind_conditions_handler() -> Json<WindConditions> {
    Json(check_wind_conditions())
}
