//! `/instances` and `/instances/{uuid}/...` (§6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use sf_core::config::keys;
use sf_core::error::Error;
use sf_core::model::{Event, Instance, NetworkInterface, PowerState};
use sf_hypervisor::PowerAction;

use crate::dispatch;
use crate::events::append_event;
use crate::pipeline::{self, CreateInstanceRequest, Outcome};
use crate::repo;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/v1/instances",
    responses((status = 200, description = "All instances known to this cluster")),
    tag = "instances"
)]
pub async fn list_instances(State(state): State<Arc<AppState>>) -> Response {
    match repo::scan::<Instance>(&state.store, keys::INSTANCES).await {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/instances",
    request_body = CreateInstanceRequest,
    responses(
        (status = 200, description = "Instance created or re-issued to the owning node"),
        (status = 507, description = "No node had capacity")
    ),
    tag = "instances"
)]
pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateInstanceRequest>,
) -> Response {
    match pipeline::create_instance(&state, &headers, req).await {
        Ok(Outcome::Created(instance)) => Json(instance).into_response(),
        Ok(Outcome::Proxied(response)) => response,
        Err(e) => state.err(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/instances/{uuid}",
    params(("uuid" = String, Path, description = "Instance UUID")),
    responses(
        (status = 200, description = "The instance record"),
        (status = 404, description = "No such instance")
    ),
    tag = "instances"
)]
pub async fn get_instance(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    match repo::get::<Instance>(&state.store, keys::INSTANCES, &uuid).await {
        Ok(Some(instance)) => Json(instance).into_response(),
        Ok(None) => state.err(Error::NotFound(format!("instance {uuid}"))).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/instances/{uuid}",
    params(("uuid" = String, Path, description = "Instance UUID")),
    responses(
        (status = 200, description = "Instance marked deleted, or request proxied to the owning node"),
        (status = 404, description = "No such instance")
    ),
    tag = "instances"
)]
pub async fn delete_instance(State(state): State<Arc<AppState>>, Path(uuid): Path<String>, headers: HeaderMap) -> Response {
    let instance: Instance = match repo::get(&state.store, keys::INSTANCES, &uuid).await {
        Ok(Some(i)) => i,
        Ok(None) => return state.err(Error::NotFound(format!("instance {uuid}"))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    let Some(node_name) = instance.node.clone() else {
        return state
            .err(Error::Conflict("instance has not been placed yet".into()))
            .into_response();
    };

    if node_name != state.config.node_name {
        let path = format!("/api/v1/instances/{uuid}");
        return match dispatch::proxy_to_node(&state, &node_name, &headers, Method::DELETE, &path, Vec::new()).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    if let Err(e) = state.hypervisor.destroy(&uuid).await {
        return state.err(e).into_response();
    }
    if let Err(e) = pipeline::teardown_interfaces(&state, &uuid).await {
        return state.err(e).into_response();
    }

    let mut instance = instance;
    instance.mark_deleted();
    if let Err(e) = repo::put(&state.store, keys::INSTANCES, &uuid, &instance).await {
        return state.err(e).into_response();
    }
    if let Err(e) = append_event(&state, "instance", &uuid, "api", "deleted", "instance deleted").await {
        return state.err(e).into_response();
    }

    Json(instance).into_response()
}

fn parse_power_action(action: &str) -> Option<(PowerAction, PowerState)> {
    match action {
        "poweron" => Some((PowerAction::On, PowerState::TransitionToOn)),
        "poweroff" => Some((PowerAction::Off, PowerState::TransitionToOff)),
        "pause" => Some((PowerAction::Off, PowerState::Off)),
        "unpause" => Some((PowerAction::On, PowerState::TransitionToOn)),
        "rebootsoft" | "reboothard" => Some((PowerAction::Reboot, PowerState::TransitionToOn)),
        _ => None,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/instances/{uuid}/{action}",
    params(
        ("uuid" = String, Path, description = "Instance UUID"),
        ("action" = String, Path, description = "poweron|poweroff|pause|unpause|rebootsoft|reboothard|snapshot")
    ),
    responses(
        (status = 200, description = "Action applied, or request proxied to the owning node"),
        (status = 400, description = "Unknown action"),
        (status = 404, description = "No such instance")
    ),
    tag = "instances"
)]
pub async fn power_action(
    State(state): State<Arc<AppState>>,
    Path((uuid, action)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if action == "snapshot" {
        return do_snapshot(&state, &uuid, &headers).await;
    }

    let Some((driver_action, next_state)) = parse_power_action(&action) else {
        return state
            .err(Error::BadRequest(format!("unknown power action {action}")))
            .into_response();
    };

    let instance: Instance = match repo::get(&state.store, keys::INSTANCES, &uuid).await {
        Ok(Some(i)) => i,
        Ok(None) => return state.err(Error::NotFound(format!("instance {uuid}"))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    let Some(node_name) = instance.node.clone() else {
        return state
            .err(Error::Conflict("instance has not been placed yet".into()))
            .into_response();
    };

    if node_name != state.config.node_name {
        let path = format!("/api/v1/instances/{uuid}/{action}");
        return match dispatch::proxy_to_node(&state, &node_name, &headers, Method::POST, &path, Vec::new()).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    if let Err(e) = state.hypervisor.power_action(&uuid, driver_action).await {
        return state.err(e).into_response();
    }

    let mut instance = instance;
    instance.power_state = next_state;
    if let Err(e) = repo::put(&state.store, keys::INSTANCES, &uuid, &instance).await {
        return state.err(e).into_response();
    }
    if let Err(e) = append_event(&state, "instance", &uuid, "api", &action, &format!("power action {action}")).await {
        return state.err(e).into_response();
    }

    Json(instance).into_response()
}

async fn do_snapshot(state: &AppState, uuid: &str, headers: &HeaderMap) -> Response {
    let instance: Instance = match repo::get(&state.store, keys::INSTANCES, uuid).await {
        Ok(Some(i)) => i,
        Ok(None) => return state.err(Error::NotFound(format!("instance {uuid}"))).into_response(),
        Err(e) => return state.err(e).into_response(),
    };

    let Some(node_name) = instance.node.clone() else {
        return state
            .err(Error::Conflict("instance has not been placed yet".into()))
            .into_response();
    };

    if node_name != state.config.node_name {
        let path = format!("/api/v1/instances/{uuid}/snapshot");
        return match dispatch::proxy_to_node(state, &node_name, headers, Method::POST, &path, Vec::new()).await {
            Ok(response) => response,
            Err(e) => state.err(e).into_response(),
        };
    }

    match append_event(state, "instance", uuid, "api", "snapshot", "snapshot requested").await {
        Ok(()) => Json(instance).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/instances/{uuid}/events",
    params(("uuid" = String, Path, description = "Instance UUID")),
    responses((status = 200, description = "This instance's event trail")),
    tag = "instances"
)]
pub async fn list_instance_events(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    match repo::scan_nested::<Event>(&state.store, keys::EVENTS, &format!("instance/{uuid}")).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => state.err(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/instances/{uuid}/interfaces",
    params(("uuid" = String, Path, description = "Instance UUID")),
    responses((status = 200, description = "This instance's network interfaces")),
    tag = "instances"
)]
pub async fn list_instance_interfaces(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    match repo::scan::<NetworkInterface>(&state.store, keys::INTERFACES).await {
        Ok(interfaces) => {
            let mine: Vec<NetworkInterface> = interfaces.into_iter().filter(|i| i.instance_uuid == uuid).collect();
            Json(mine).into_response()
        }
        Err(e) => state.err(e).into_response(),
    }
}
