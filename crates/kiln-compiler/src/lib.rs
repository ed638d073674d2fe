//! Kiln Compiler - IR to code unit generation
//!
//! This crate turns a resolved module into code units: the module unit, one
//! unit per extension group, one unit per struct and the units of its
//! algebraic types.
//!
//! ```text
//! Module ─ resolve ─▶ Resolution ─ codegen ─▶ [CodeUnit] ─ verify + encode ─▶ bytes
//! ```

mod codegen;
pub mod error;
pub mod extension;
pub mod metadata;
pub mod module_builder;
pub mod options;
pub mod structure;
pub mod union;

pub use error::{CompileError, CompileResult};
pub use module_builder::{FunctionBuilder, Label, UnitBuilder};
pub use options::{CompileOptions, LoopControlStyle};

// Re-export unit types for convenience
pub use kiln_bytecode::{CallKind, CallSite, CodeUnit, FunctionDef, Opcode, UnitKind};

use kiln_ir::Module;

/// An encoded unit ready to be written or loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Qualified unit name
    pub name: String,
    /// Encoded unit
    pub bytecode: Vec<u8>,
}

/// Main compiler entry point
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Resolve `module` and generate its units, module unit first
    #[tracing::instrument(level = "debug", skip_all, fields(module = %module.name))]
    pub fn generate(&self, module: &Module) -> CompileResult<Vec<CodeUnit>> {
        let resolution = kiln_checker::resolve(module)?;
        codegen::generate(module, &resolution, &self.options)
    }

    /// Generate, verify and encode the units of `module`
    pub fn compile(&self, module: &Module) -> CompileResult<Vec<CompiledUnit>> {
        let units = self.generate(module)?;
        units
            .into_iter()
            .map(|unit| {
                if self.options.verify {
                    kiln_bytecode::verify_unit(&unit).map_err(|source| {
                        CompileError::Verification {
                            unit: unit.name.clone(),
                            source,
                        }
                    })?;
                }
                tracing::trace!(summary = %unit.summary_json(), "unit compiled");
                Ok(CompiledUnit {
                    bytecode: unit.encode(),
                    name: unit.name,
                })
            })
            .collect()
    }
}
