//! End-to-end tests for the Kiln code generator
//!
//! These tests assemble module IR, compile it to code units and execute the
//! units in the reference VM, verifying the results are correct.

mod harness;
mod closures;
mod collections;
mod exceptions;
mod extensions;
mod functions;
mod literals;
mod loops;
mod module_state;
mod resolution;
mod structs;
