//! The node supervisor's startup sequence and fork/monitor loop (§4.4).
//!
//! The original control plane forks one OS process per role and waits on
//! any child with `waitpid(-1, WNOHANG)`, re-forking whichever one exits.
//! `fork()` after a multi-threaded async runtime has started is unsound,
//! so every role here is a supervised tokio task sharing one `Arc<AppState>`
//! instead of a separate process - the idiomatic-Rust shape of the same
//! "no shared in-process memory between workers, respawn on death" model
//! (§5 "Scheduling model"). See DESIGN.md for the fuller rationale.

use std::collections::HashMap;
use std::sync::Arc;

use sf_api::AppState;
use sf_core::config::timing;
use tokio::signal;
use tokio::task::{Id, JoinSet};
use tracing::{info, warn};

use crate::{bootstrap, cleaner, heartbeat, net_worker, queues, resources, restore, triggers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Api,
    Cleaner,
    Net,
    Queues,
    Triggers,
    Resources,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::Api => "api",
            Role::Cleaner => "cleaner",
            Role::Net => "net",
            Role::Queues => "queues",
            Role::Triggers => "triggers",
            Role::Resources => "resources",
        }
    }
}

async fn run_role(role: Role, state: Arc<AppState>) {
    match role {
        Role::Api => run_api(state).await,
        Role::Cleaner => cleaner::run(state).await,
        Role::Net => net_worker::run(state).await,
        Role::Queues => queues::run(state).await,
        Role::Triggers => triggers::run(state).await,
        Role::Resources => resources::run(state).await,
    }
}

async fn run_api(state: Arc<AppState>) {
    let addr = format!("0.0.0.0:{}", state.config.api_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, addr, "api: failed to bind, worker exiting for respawn");
            return;
        }
    };
    info!(addr, "api worker listening");

    let router = sf_api::rest::build_router(state);
    if let Err(e) = axum::serve(listener, router).await {
        warn!(error = %e, "api: server exited");
    }
}

fn spawn(set: &mut JoinSet<Role>, ids: &mut HashMap<Id, Role>, role: Role, state: Arc<AppState>) {
    let handle = set.spawn(async move {
        run_role(role, state).await;
        role
    });
    ids.insert(handle.id(), role);
}

/// Run the startup sequence to completion, then the monitor loop, until
/// SIGINT or SIGTERM. Returns once shutdown is complete.
pub async fn run(state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    heartbeat::register(&state).await?;

    let mut set: JoinSet<Role> = JoinSet::new();
    let mut ids: HashMap<Id, Role> = HashMap::new();

    // Resources first - placement decisions the API worker makes the
    // instant it starts depend on this worker's output being fresh.
    spawn(&mut set, &mut ids, Role::Resources, state.clone());

    if state.config.is_network_node() {
        bootstrap::bootstrap_network_node(&state).await?;
    }

    for role in [Role::Api, Role::Cleaner, Role::Net, Role::Queues, Role::Triggers] {
        spawn(&mut set, &mut ids, role, state.clone());
    }

    restore::run(&state).await;

    let mut heartbeat_tick = tokio::time::interval(timing::NODE_HEARTBEAT_PERIOD);
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            Some(res) = set.join_next_with_id() => {
                match res {
                    Ok((id, role)) => {
                        ids.remove(&id);
                        warn!(role = role.name(), "worker exited, re-spawning");
                        spawn(&mut set, &mut ids, role, state.clone());
                    }
                    Err(e) => {
                        let role = ids.remove(&e.id());
                        warn!(
                            role = role.map(Role::name).unwrap_or("unknown"),
                            error = %e,
                            "worker task panicked, re-spawning"
                        );
                        if let Some(role) = role {
                            spawn(&mut set, &mut ids, role, state.clone());
                        }
                    }
                }
            }
            _ = heartbeat_tick.tick() => {
                heartbeat::refresh(&state).await;
            }
            _ = signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    set.shutdown().await;
    Ok(())
}
