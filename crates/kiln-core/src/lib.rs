//! Kiln VM Core Runtime
//!
//! A reference interpreter for the code units produced by `kiln-compiler`:
//! - Operand stack and per-call frames
//! - Late linking of call sites, with per-site caches
//! - Extension and algebraic type dispatch
//! - The `kiln.Predefined` natives
//!
//! It exists to execute generated code in tests, not to be fast.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod stack;
pub mod value;
pub mod vm;

pub use stack::Stack;
pub use value::{Callable, FunctionValue, StructValue, Value, VariantValue};
pub use vm::{LinkError, NativeFn, Vm, VmOptions};

use kiln_bytecode::{DecodeError, UnitError};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Null pointer exception
    #[error("Null pointer exception")]
    NullPointer,

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// A call site could not be linked
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// A thrown value reached the outermost frame
    #[error("Uncaught exception: {0}")]
    Thrown(Value),

    /// Malformed instruction stream
    #[error("Bad bytecode: {0}")]
    Decode(#[from] DecodeError),

    /// A unit could not be loaded
    #[error("Load error: {0}")]
    Load(#[from] UnitError),
}

impl VmError {
    /// The value seen by a handler catching this error
    ///
    /// Returns `None` for errors that unwind every frame.
    pub fn to_exception(&self) -> Option<Value> {
        match self {
            VmError::Thrown(value) => Some(value.clone()),
            VmError::NullPointer
            | VmError::TypeError(_)
            | VmError::RuntimeError(_)
            | VmError::Link(_) => Some(Value::str(&self.to_string())),
            VmError::StackOverflow
            | VmError::StackUnderflow
            | VmError::InvalidOpcode(_)
            | VmError::Decode(_)
            | VmError::Load(_) => None,
        }
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
