//! Service listing and view creation

use super::peer_name;
use crate::error::ApiResult;
use crate::registry::ServiceInfo;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use feedmux_common::Params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /services/:service/views`
#[derive(Debug, Default, Deserialize)]
pub struct OpenViewRequest {
    /// Query name; defaults to "feed"
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Serialize)]
pub struct OpenViewResponse {
    pub id: Uuid,
    pub path: String,
}

/// GET /services
pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceInfo>> {
    Json(state.core.services())
}

/// POST /services/:service/views
///
/// The view is created idle; subscribe to its events before starting it.
pub async fn open_view(
    State(state): State<AppState>,
    Path(service): Path<String>,
    headers: HeaderMap,
    Json(request): Json<OpenViewRequest>,
) -> ApiResult<(StatusCode, Json<OpenViewResponse>)> {
    let peer = peer_name(&headers);
    let view = state
        .core
        .open_view(
            &service,
            request.query.as_deref(),
            request.params,
            peer.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OpenViewResponse {
            id: view.id(),
            path: view.path(),
        }),
    ))
}
