//! Caller-visible error taxonomy.
//!
//! # Invariants
//! - `Validation` is raised before any store mutation.
//! - `Conflict` and `BackendFailure` after an optimistic apply imply the
//!   apply was rolled back.
//! - No variant is fatal; the engine stays usable after any of them.

use crate::model::{EntityKey, ValidationError};
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(EntityKey),
    #[error("backend failure: {0}")]
    BackendFailure(String),
}

impl SyncError {
    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::BackendFailure(_) => "backend_failure",
        }
    }

    /// Whether repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendFailure(_))
    }
}
