//! Compilation errors

use kiln_bytecode::VerifyError;
use kiln_checker::{CompilationFailure, ResolveError};
use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    /// The module did not pass resolution
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Too many local variables (max 65535)")]
    TooManyLocals,

    #[error("Jump offset too large")]
    JumpTooLarge,

    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature { feature: String },

    #[error("Internal compiler error: {message}")]
    InternalError { message: String },

    #[error("Bytecode verification of {unit} failed: {source}")]
    Verification {
        unit: String,
        #[source]
        source: VerifyError,
    },
}

impl CompileError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        CompileError::InternalError {
            message: message.into(),
        }
    }

    /// User-facing problems, when compilation stopped at resolution
    pub fn failure(&self) -> Option<&CompilationFailure> {
        match self {
            CompileError::Resolve(error) => error.failure(),
            _ => None,
        }
    }
}
