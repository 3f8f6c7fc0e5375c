pub mod config;
pub mod error;
pub mod model;
pub mod scheduler;

pub use config::Config;
pub use error::{Error, Result};
pub use scheduler::{NodeCandidate, PlacementRequest, Scheduler};
