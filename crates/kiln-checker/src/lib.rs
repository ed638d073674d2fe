//! Kiln Checker
//!
//! Scope and slot resolution for Kiln IR.
//!
//! This crate provides:
//! - Slot assignment for parameters and block-owned locals
//! - Verification of declarations, constant writes, initialized reads
//!   and loop-control placement
//! - Classification of call targets (function, local reference, module state)
//! - Diagnostics rendering (terminal and JSON)
//!
//! # Usage
//!
//! ```ignore
//! use kiln_checker::resolve;
//!
//! match resolve(&module) {
//!     Ok(resolution) => { /* hand to kiln-compiler */ }
//!     Err(ResolveError::Failed(failure)) => {
//!         for diag in failure.diagnostics() { /* emit */ }
//!     }
//!     Err(other) => panic!("{other}"),
//! }
//! ```

#![warn(missing_docs)]

pub mod diagnostic;
pub mod error;
pub mod problem;
pub mod resolution;
pub mod resolver;

pub use diagnostic::{create_files, error_code, Diagnostic, ErrorCode, JsonDiagnostic, JsonLabel};
pub use error::ResolveError;
pub use problem::{CompilationFailure, Problem, ProblemBuilder, ProblemKind};
pub use resolution::{CallTarget, Resolution, SelfBinding};
pub use resolver::resolve;
