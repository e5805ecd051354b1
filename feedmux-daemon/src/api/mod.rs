//! HTTP API handlers for feedmuxd

pub mod health;
pub mod items;
pub mod online;
pub mod services;
pub mod sse;
pub mod views;

pub use health::health_routes;
pub use items::hide_item;
pub use online::{get_online, set_online};
pub use services::{list_services, open_view};
pub use sse::{core_event_stream, view_event_stream};
pub use views::{close_view, get_view, refresh_view, start_view, stop_view, view_items};

use crate::client_monitor::PEER_HEADER;
use axum::http::HeaderMap;

/// Peer name from the `x-feedmux-client` header, if any
pub(crate) fn peer_name(headers: &HeaderMap) -> Option<String> {
    headers
        .get(PEER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
