//! Resolver errors

use crate::problem::CompilationFailure;
use thiserror::Error;

/// Resolver failure
#[derive(Debug, Error)]
pub enum ResolveError {
    /// User-facing problems collected over the whole module
    #[error("{0}")]
    Failed(CompilationFailure),

    /// The IR violates an invariant an upstream pass must guarantee
    #[error("Internal resolver error: {0}")]
    Internal(String),
}

impl ResolveError {
    /// The collected problems, if this is a user-facing failure
    pub fn failure(&self) -> Option<&CompilationFailure> {
        match self {
            ResolveError::Failed(failure) => Some(failure),
            ResolveError::Internal(_) => None,
        }
    }
}
