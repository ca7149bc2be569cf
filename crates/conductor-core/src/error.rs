//! The error taxonomy the orchestrator surfaces to its callers (HTTP
//! status mapping happens in `conductor-server`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external service failed: {0}")]
    External(#[source] anyhow::Error),

    #[error("persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl ConductorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
