//! `/interfaces/{uuid}/{float,defloat}` (§6, §8 scenario 5).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sf_core::config::keys;
use sf_core::error::Error;
use sf_core::model::NetworkInterface;

use crate::dispatch;
use crate::events::append_event;
use crate::netops;
use crate::pipeline;
use crate::repo;
use crate::state::AppState;

pub async fn float(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    if !state.config.is_network_node() {
        let path = format!("/api/v1/interfaces/{uuid}/float");
        return match dispatch::proxy_to_network_node(&state, Method::POST, &path, Vec::new()).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    let mut iface: NetworkInterface = match repo::get(&state.store, keys::INTERFACES, &uuid).await {
        Ok(Some(i)) => i,
        Ok(None) => return state.err(Error::NotFound(format!("interface {uuid}"))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    if iface.floating.is_some() {
        return state.err(Error::Conflict(format!("interface {uuid} already floating"))).into_response();
    }

    let floating_network = match netops::find_floating_network(&state).await {
        Ok(n) => n,
        Err(e) => return state.err(e).into_response(),
    };

    let addr = match pipeline::allocate_network_address(&state, &floating_network.uuid, None).await {
        Ok(a) => a,
        Err(e) => return state.err(e).into_response(),
    };

    iface.floating = Some(addr.clone());
    if let Err(e) = repo::put(&state.store, keys::INTERFACES, &uuid, &iface).await {
        return state.err(e).into_response();
    }
    if let Err(e) = append_event(&state, "interface", &uuid, "api", "float", &format!("floated to {addr}")).await {
        return state.err(e).into_response();
    }

    Json(iface).into_response()
}

pub async fn defloat(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    if !state.config.is_network_node() {
        let path = format!("/api/v1/interfaces/{uuid}/defloat");
        return match dispatch::proxy_to_network_node(&state, Method::POST, &path, Vec::new()).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    let mut iface: NetworkInterface = match repo::get(&state.store, keys::INTERFACES, &uuid).await {
        Ok(Some(i)) => i,
        Ok(None) => return state.err(Error::NotFound(format!("interface {uuid}"))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    let Some(addr) = iface.floating.take() else {
        return state.err(Error::Conflict(format!("interface {uuid} is not floating"))).into_response();
    };

    let floating_network = match netops::find_floating_network(&state).await {
        Ok(n) => n,
        Err(e) => return state.err(e).into_response(),
    };

    if let Err(e) = pipeline::release_network_address(&state, &floating_network.uuid, &addr).await {
        return state.err(e).into_response();
    }

    if let Err(e) = repo::put(&state.store, keys::INTERFACES, &uuid, &iface).await {
        return state.err(e).into_response();
    }
    if let Err(e) = append_event(&state, "interface", &uuid, "api", "defloat", &format!("released {addr}")).await {
        return state.err(e).into_response();
    }

    Json(iface).into_response()
}
