//! Item hiding

use crate::error::ApiResult;
use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct HideRequest {
    pub uid: String,
}

#[derive(Debug, Serialize)]
pub struct HideResponse {
    pub uid: String,
    /// False when the item was already hidden
    pub hidden: bool,
}

/// POST /items/hide
///
/// Identities with line breaks or surrounding whitespace are rejected (400).
pub async fn hide_item(
    State(state): State<AppState>,
    Json(request): Json<HideRequest>,
) -> ApiResult<Json<HideResponse>> {
    let hidden = state.core.hide_item(&request.uid).await?;
    Ok(Json(HideResponse {
        uid: request.uid,
        hidden,
    }))
}
