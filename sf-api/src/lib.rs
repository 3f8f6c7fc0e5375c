//! The REST API worker (§6 External Interfaces). Everything here is a
//! library: the node supervisor owns the binary and the tokio runtime, and
//! mounts [`rest::router`] as one of its supervised tasks.

pub mod auth;
pub mod dispatch;
pub mod error_response;
pub mod events;
pub mod middleware;
pub mod netops;
pub mod pipeline;
pub mod proxy;
pub mod repo;
pub mod rest;
pub mod state;

pub use state::AppState;
