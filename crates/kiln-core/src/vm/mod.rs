//! Virtual machine execution and call-site linking

mod interpreter;
mod linker;
mod natives;
mod operators;

pub use interpreter::{NativeFn, Vm, VmOptions};
pub use linker::LinkError;
pub use natives::PREDEFINED;
