//! Generic cross-node redirection (§4.4 "Redirection policy"). Instance
//! creation has its own inline dispatch step (§4.5 step 5, in
//! [`crate::pipeline`]); every other handler that targets a record owned by
//! another node goes through these two helpers instead.

use axum::http::{HeaderMap, Method};
use axum::response::Response;
use sf_core::config::keys;
use sf_core::error::{Error, Result};
use sf_core::model::Node;

use crate::auth;
use crate::proxy;
use crate::repo;
use crate::state::AppState;

/// Forward the inbound request verbatim (method, path, body, Authorization)
/// to the node that owns the target record.
pub async fn proxy_to_node(
    state: &AppState,
    node_name: &str,
    headers: &HeaderMap,
    method: Method,
    path: &str,
    body: Vec<u8>,
) -> Result<Response> {
    let node: Node = repo::get(&state.store, keys::NODES, node_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("node {node_name}")))?;
    let target = state.node_url(&node.ip, path);
    proxy::forward(&state.http, &target, method, headers, body).await
}

/// Forward to the network node using a freshly-minted admin token, per §4.4:
/// "proxy to the network node using an admin token minted with the shared
/// AUTH_SECRET_SEED" - the caller's own token is not reused here.
pub async fn proxy_to_network_node(state: &AppState, method: Method, path: &str, body: Vec<u8>) -> Result<Response> {
    let token = auth::issue_token(&state.config.auth_secret_seed, auth::ADMIN_NAMESPACE)?;
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        format!("Bearer {token}")
            .parse()
            .map_err(|e| Error::Internal(format!("building proxied auth header: {e}")))?,
    );
    headers.insert(axum::http::header::CONTENT_TYPE, "application/json".parse().unwrap());

    let target = state.node_url(&state.config.network_node_ip, path);
    proxy::forward(&state.http, &target, method, &headers, body).await
}
