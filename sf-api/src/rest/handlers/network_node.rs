//! `PUT /deploy_network_node`, `/update_dhcp`, `/remove_dhcp` (§6,
//! admin-only, must run on the network node).

use std::sync::Arc;

use axum::extract::State;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use sf_core::config::keys;
use sf_core::error::Error;
use sf_core::model::Network;

use crate::dispatch;
use crate::repo;
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct NetworkNodeRequest {
    pub uuid: String,
}

pub async fn deploy_network_node(State(state): State<Arc<AppState>>, Json(req): Json<NetworkNodeRequest>) -> Response {
    update_dhcp(State(state), Json(req)).await
}

pub async fn update_dhcp(State(state): State<Arc<AppState>>, Json(req): Json<NetworkNodeRequest>) -> Response {
    if !state.config.is_network_node() {
        let body = match serde_json::to_vec(&req) {
            Ok(b) => b,
            Err(e) => return state.err(Error::Internal(e.to_string())).into_response(),
        };
        return match dispatch::proxy_to_network_node(&state, Method::PUT, "/api/v1/update_dhcp", body).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    let network: Network = match repo::get(&state.store, keys::NETWORKS, &req.uuid).await {
        Ok(Some(n)) => n,
        Ok(None) => return state.err(Error::NotFound(format!("network {}", req.uuid))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    match state.fabric.ensure_mesh_and_dhcp(&network).await {
        Ok(()) => Json(network).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

pub async fn remove_dhcp(State(state): State<Arc<AppState>>, Json(req): Json<NetworkNodeRequest>) -> Response {
    if !state.config.is_network_node() {
        let body = match serde_json::to_vec(&req) {
            Ok(b) => b,
            Err(e) => return state.err(Error::Internal(e.to_string())).into_response(),
        };
        return match dispatch::proxy_to_network_node(&state, Method::PUT, "/api/v1/remove_dhcp", body).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    let network: Network = match repo::get(&state.store, keys::NETWORKS, &req.uuid).await {
        Ok(Some(n)) => n,
        Ok(None) => return state.err(Error::NotFound(format!("network {}", req.uuid))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    match state.fabric.remove_dhcp(&network).await {
        Ok(()) => Json(network).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}
