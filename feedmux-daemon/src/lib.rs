//! feedmux daemon library
//!
//! Polls feed backends through per-view state machines, diffs each fetch
//! against the last published set and republishes the delta to local
//! subscribers over HTTP + Server-Sent Events.

use axum::Router;
use std::sync::Arc;

pub mod api;
pub mod backend;
pub mod backends;
pub mod banned;
pub mod cache;
pub mod call_tracker;
pub mod client_monitor;
pub mod error;
pub mod online;
pub mod registry;
pub mod view;

pub use backend::{Backend, BackendError, CallScope};
pub use error::{ApiError, CoreError, ViewError};
pub use registry::{Core, CoreSettings};
pub use view::{ViewHandle, ViewState, ViewStatus};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
    /// Server startup time
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            startup_time: chrono::Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/services", get(api::list_services))
        .route("/services/:service/views", post(api::open_view))
        .route("/views/:id", get(api::get_view))
        .route("/views/:id/items", get(api::view_items))
        .route("/views/:id/events", get(api::view_event_stream))
        .route("/views/:id/start", post(api::start_view))
        .route("/views/:id/refresh", post(api::refresh_view))
        .route("/views/:id/stop", post(api::stop_view))
        .route("/views/:id/close", post(api::close_view))
        .route("/items/hide", post(api::hide_item))
        .route("/online", get(api::get_online).post(api::set_online))
        .route("/events", get(api::core_event_stream))
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
