//! `/networks` and `/networks/{uuid}` (§6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use sf_core::config::keys;
use sf_core::error::Error;
use sf_core::model::{new_uuid, Network, NetworkInterface, NetworkState, FLOATING_NETWORK_NAME};

use crate::dispatch;
use crate::netops;
use crate::repo;
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateNetworkRequest {
    pub netblock: String,
    #[serde(default)]
    pub provide_dhcp: bool,
    #[serde(default)]
    pub provide_nat: bool,
    pub name: String,
}

pub async fn list_networks(State(state): State<Arc<AppState>>) -> Response {
    match repo::scan::<Network>(&state.store, keys::NETWORKS).await {
        Ok(networks) => Json(networks).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

pub async fn create_network(State(state): State<Arc<AppState>>, Json(req): Json<CreateNetworkRequest>) -> Response {
    if !state.config.is_network_node() {
        let body = match serde_json::to_vec(&req) {
            Ok(b) => b,
            Err(e) => return state.err(Error::Internal(e.to_string())).into_response(),
        };
        return match dispatch::proxy_to_network_node(&state, Method::POST, "/api/v1/networks", body).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    if req.netblock.parse::<ipnet::Ipv4Net>().is_err() {
        return state
            .err(Error::BadRequest(format!("netblock {} does not parse as CIDR", req.netblock)))
            .into_response();
    }

    let network = Network {
        uuid: new_uuid(),
        vxlan_id: 0,
        netblock: req.netblock,
        provide_dhcp: req.provide_dhcp,
        provide_nat: req.provide_nat,
        owner: String::new(),
        name: req.name,
        state: NetworkState::Created,
        floating_gateway: None,
        deleted_at: None,
    };

    match netops::allocate_vxlan_id_and_persist(&state, network).await {
        Ok(network) => Json(network).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

pub async fn get_network(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    match repo::get::<Network>(&state.store, keys::NETWORKS, &uuid).await {
        Ok(Some(network)) => Json(network).into_response(),
        Ok(None) => state.err(Error::NotFound(format!("network {uuid}"))).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

pub async fn delete_network(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    if !state.config.is_network_node() {
        let path = format!("/api/v1/networks/{uuid}");
        return match dispatch::proxy_to_network_node(&state, Method::DELETE, &path, Vec::new()).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    let mut network: Network = match repo::get(&state.store, keys::NETWORKS, &uuid).await {
        Ok(Some(n)) => n,
        Ok(None) => return state.err(Error::NotFound(format!("network {uuid}"))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    if network.name == FLOATING_NETWORK_NAME {
        return state.err(Error::Forbidden("the floating network cannot be deleted".into())).into_response();
    }

    let interfaces: Vec<NetworkInterface> = match repo::scan(&state.store, keys::INTERFACES).await {
        Ok(i) => i,
        Err(e) => return state.err(e).into_response(),
    };
    let still_referenced = interfaces
        .iter()
        .any(|i| i.network_uuid == uuid && i.state != sf_core::model::InterfaceState::Deleted);
    if still_referenced {
        return state
            .err(Error::Forbidden(format!("network {uuid} still has active interfaces")))
            .into_response();
    }

    network.mark_deleted();
    match repo::put(&state.store, keys::NETWORKS, &uuid, &network).await {
        Ok(()) => Json(network).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}
