//! `POST /images` (§6, admin-only, idempotent cache warm).

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WarmImageRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WarmImageResponse {
    pub path: String,
}

pub async fn warm(State(state): State<Arc<AppState>>, Json(req): Json<WarmImageRequest>) -> Response {
    match state.images.fetch(&req.url).await {
        Ok(path) => Json(WarmImageResponse {
            path: path.display().to_string(),
        })
        .into_response(),
        Err(e) => state.err(e).into_response(),
    }
}
