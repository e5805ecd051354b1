//! View lifecycle endpoints
//!
//! `POST /views/:id/{start,refresh,stop,close}` map one-to-one onto the view
//! state machine. Invalid transitions answer 409, closed views 410.

use crate::error::{ApiError, ApiResult};
use crate::view::{ViewHandle, ViewStatus};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use feedmux_common::{Params, Record};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ViewInfo {
    pub id: Uuid,
    pub path: String,
    pub service: String,
    pub query: String,
    pub params: Params,
    pub status: ViewStatus,
}

impl From<&ViewHandle> for ViewInfo {
    fn from(view: &ViewHandle) -> Self {
        Self {
            id: view.id(),
            path: view.path(),
            service: view.service().to_string(),
            query: view.query().to_string(),
            params: view.params().clone(),
            status: view.status(),
        }
    }
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("Unknown view: {}", raw)))
}

async fn lookup(state: &AppState, raw: &str) -> ApiResult<ViewHandle> {
    let id = parse_id(raw)?;
    Ok(state.core.view(id).await?)
}

/// GET /views/:id
pub async fn get_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ViewInfo>> {
    let view = lookup(&state, &id).await?;
    Ok(Json(ViewInfo::from(&view)))
}

/// GET /views/:id/items
///
/// Current published set, newest first.
pub async fn view_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Arc<Record>>>> {
    let view = lookup(&state, &id).await?;
    let mut items = view.snapshot().await?;
    items.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    Ok(Json(items))
}

/// POST /views/:id/start
pub async fn start_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let view = lookup(&state, &id).await?;
    view.start().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /views/:id/refresh
pub async fn refresh_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let view = lookup(&state, &id).await?;
    debug!(view = %view.id(), "Explicit refresh");
    view.refresh().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /views/:id/stop
pub async fn stop_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let view = lookup(&state, &id).await?;
    view.stop().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /views/:id/close
pub async fn close_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state.core.close_view(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
