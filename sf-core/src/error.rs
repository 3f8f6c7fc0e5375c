//! Error kinds shared by every worker.
//!
//! The HTTP boundary (sf-api) maps each variant to a status code; everything
//! that doesn't have an explicit mapping collapses to 500 per the error
//! handling design.

use thiserror::Error;

/// Errors that can occur anywhere in the control plane.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient capacity")]
    InsufficientCapacity,

    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("candidate node not found")]
    CandidateNodeNotFound,

    #[error("external tool failed: {0}")]
    ExternalToolFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status code this error kind collapses to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Unauthorized => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::InsufficientCapacity => 507,
            Error::CandidateNodeNotFound => 404,
            Error::StoreUnavailable(_)
            | Error::FetchFailed(_)
            | Error::ExternalToolFailed(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable kind, used in the `{error, status}` body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "BadRequest",
            Error::Unauthorized => "Unauthorized",
            Error::Forbidden(_) => "Forbidden",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::InsufficientCapacity => "InsufficientCapacity",
            Error::StoreUnavailable(_) => "StoreUnavailable",
            Error::FetchFailed(_) => "FetchFailed",
            Error::CandidateNodeNotFound => "CandidateNodeNotFound",
            Error::ExternalToolFailed(_) => "ExternalToolFailed",
            Error::Internal(_) => "Internal",
        }
    }
}
