//! `POST /auth` (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use sf_core::error::Error;

use crate::auth;
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AuthRequest {
    pub namespace: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth",
    request_body = AuthRequest,
    responses(
        (status = 200, description = "Issued a bearer token"),
        (status = 401, description = "Namespace/password did not match")
    ),
    tag = "auth"
)]
pub async fn authenticate(State(state): State<Arc<AppState>>, Json(req): Json<AuthRequest>) -> Response {
    let valid = match auth::check_password(&state.store, &req.namespace, &req.password).await {
        Ok(v) => v,
        Err(e) => return state.err(e).into_response(),
    };
    if !valid {
        return state.err(Error::Unauthorized).into_response();
    }
    match auth::issue_token(&state.config.auth_secret_seed, &req.namespace) {
        Ok(access_token) => Json(AuthResponse { access_token }).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}
