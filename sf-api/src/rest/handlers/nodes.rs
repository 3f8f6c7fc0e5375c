//! `GET /nodes` (§6, admin-only).

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sf_core::config::keys;
use sf_core::model::Node;

use crate::repo;
use crate::state::AppState;

pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Response {
    match repo::scan::<Node>(&state.store, keys::NODES).await {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}
