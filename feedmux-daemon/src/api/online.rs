//! Network reachability endpoints
//!
//! Whatever watches the network (a NetworkManager bridge, a test harness)
//! reports transitions here.

use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineBody {
    pub online: bool,
}

/// GET /online
pub async fn get_online(State(state): State<AppState>) -> Json<OnlineBody> {
    Json(OnlineBody {
        online: state.core.is_online(),
    })
}

/// POST /online
pub async fn set_online(
    State(state): State<AppState>,
    Json(body): Json<OnlineBody>,
) -> Json<OnlineBody> {
    state.core.set_online(body.online);
    Json(OnlineBody {
        online: state.core.is_online(),
    })
}
