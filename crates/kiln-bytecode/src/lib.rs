//! Kiln Bytecode Definitions
//!
//! This crate provides the instruction set, the code unit format produced by
//! `kiln-compiler`, its binary encoding and a stack-depth verifier.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod constants;
pub mod encoder;
pub mod opcode;
pub mod unit;
pub mod verify;

pub use constants::ConstantPool;
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use opcode::Opcode;
pub use unit::{
    string_hash, CallKind, CallSite, CodeUnit, ExceptionEntry, FunctionDef, FunctionFlags,
    LineEntry, LocalVariable, UnitError, UnitKind, MAGIC, VERSION,
};
pub use verify::{decode_instructions, verify_unit, Instruction, Operand, VerifyError};
