//! The first stage of the request-scoped decorator chain (§9): authorize.
//! `fetch-by-uuid` and `redirect` are modeled per-handler (instances and
//! interfaces carry different redirection targets), since they need the
//! record the authorize stage has no reason to load.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::Claims;
use crate::state::AppState;

pub async fn authorize(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    let token = match token {
        Some(t) => t,
        None => return state.err(sf_core::Error::Unauthorized).into_response(),
    };

    match crate::auth::verify_token(&state.config.auth_secret_seed, token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => state.err(e).into_response(),
    }
}

pub async fn require_admin(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    match req.extensions().get::<Claims>() {
        Some(claims) if claims.is_admin() => next.run(req).await,
        Some(_) => state
            .err(sf_core::Error::Forbidden("admin namespace required".into()))
            .into_response(),
        None => state.err(sf_core::Error::Unauthorized).into_response(),
    }
}
