//! Route table for the API worker (§6 External Interfaces). Mirrors the
//! control plane's own `routes.rs`: an OpenAPI doc plus a single router
//! assembled under `/api/v1`, with JWT/admin checks applied as route layers
//! rather than threaded through each handler.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware as auth_middleware;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "shakenfist-rs control plane",
        version = "0.1.0",
        description = "REST API for the multi-node VM orchestrator control plane.",
        license(name = "Apache-2.0")
    ),
    tags(
        (name = "auth", description = "Namespace authentication"),
        (name = "instances", description = "Instance lifecycle and placement"),
        (name = "networks", description = "Network CRUD and lifecycle"),
    ),
    paths(
        handlers::auth::authenticate,
        handlers::instances::list_instances,
        handlers::instances::create_instance,
        handlers::instances::get_instance,
        handlers::instances::delete_instance,
        handlers::instances::power_action,
        handlers::instances::list_instance_events,
        handlers::instances::list_instance_interfaces,
    ),
    components(schemas(
        handlers::auth::AuthRequest,
        crate::pipeline::NetworkRequest,
        crate::pipeline::DiskRequest,
        crate::pipeline::CreateInstanceRequest,
    ))
)]
pub struct ApiDoc;

/// Build the full router for one node. Every route other than `/auth` runs
/// behind [`auth_middleware::authorize`]; the admin-only subset (nodes,
/// images, network-node endpoints) additionally runs behind
/// [`auth_middleware::require_admin`] (§6: "admin-only").
pub fn build_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/nodes", get(handlers::nodes::list_nodes))
        .route("/images", post(handlers::images::warm))
        .route(
            "/deploy_network_node",
            put(handlers::network_node::deploy_network_node),
        )
        .route("/update_dhcp", put(handlers::network_node::update_dhcp))
        .route("/remove_dhcp", put(handlers::network_node::remove_dhcp))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::require_admin,
        ));

    let tenant_routes = Router::new()
        .route(
            "/instances",
            get(handlers::instances::list_instances).post(handlers::instances::create_instance),
        )
        .route(
            "/instances/{uuid}",
            get(handlers::instances::get_instance).delete(handlers::instances::delete_instance),
        )
        .route(
            "/instances/{uuid}/{action}",
            post(handlers::instances::power_action),
        )
        .route(
            "/instances/{uuid}/events",
            get(handlers::instances::list_instance_events),
        )
        .route(
            "/instances/{uuid}/interfaces",
            get(handlers::instances::list_instance_interfaces),
        )
        .route("/interfaces/{uuid}/float", post(handlers::interfaces::float))
        .route(
            "/interfaces/{uuid}/defloat",
            post(handlers::interfaces::defloat),
        )
        .route(
            "/networks",
            get(handlers::networks::list_networks).post(handlers::networks::create_network),
        )
        .route(
            "/networks/{uuid}",
            get(handlers::networks::get_network).delete(handlers::networks::delete_network),
        );

    let authed = tenant_routes.merge(admin_routes).route_layer(
        middleware::from_fn_with_state(state.clone(), auth_middleware::authorize),
    );

    let api_v1 = Router::new()
        .route("/auth", post(handlers::auth::authenticate))
        .merge(authed);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
