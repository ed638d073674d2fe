//! Synthetic metadata functions of module and extension units
//!
//! The runtime calls these to discover imports, extended types and applied
//! extension groups without parsing unit headers:
//!
//! - `$imports()` returns the imported names
//! - `$extensions()` returns the types extended by the module
//! - `$extensionApplications()` returns the types with applied groups
//! - `$extensionApplications(hash)` returns the groups applied to the target
//!   whose `string_hash` is `hash`
//!
//! Module state is held in unit globals behind private accessors named after
//! the state, so that `"{module}.{name}"` call sites link like any function.

use crate::codegen::Context;
use crate::error::{CompileError, CompileResult};
use crate::module_builder::{FunctionBuilder, UnitBuilder};
use kiln_bytecode::{string_hash, FunctionDef, FunctionFlags, Opcode};
use std::collections::BTreeMap;

pub const IMPORTS: &str = "$imports";
pub const EXTENSIONS: &str = "$extensions";
pub const EXTENSION_APPLICATIONS: &str = "$extensionApplications";

fn metadata_flags() -> FunctionFlags {
    FunctionFlags {
        public: true,
        synthetic: true,
        ..FunctionFlags::default()
    }
}

fn accessor_flags() -> FunctionFlags {
    FunctionFlags {
        synthetic: true,
        ..FunctionFlags::default()
    }
}

/// Push a new `String[]` holding `items`
pub(crate) fn emit_string_array<'s>(
    unit: &mut UnitBuilder,
    code: &mut FunctionBuilder,
    items: impl ExactSizeIterator<Item = &'s String>,
) -> CompileResult<()> {
    let size = i32::try_from(items.len())
        .map_err(|_| CompileError::internal("metadata array too large"))?;
    code.code().emit_const_i32(size);
    code.emit(Opcode::NewArray);
    for (index, item) in items.enumerate() {
        let constant = unit.add_string(item);
        code.emit(Opcode::Dup);
        code.code().emit_const_i32(index as i32);
        code.code().emit_const_str(constant);
        code.emit(Opcode::StoreElem);
    }
    Ok(())
}

fn string_array_function<'s>(
    unit: &mut UnitBuilder,
    name: &str,
    items: impl ExactSizeIterator<Item = &'s String>,
) -> CompileResult<FunctionDef> {
    let mut code = FunctionBuilder::new(name, Vec::new(), false)?;
    code.def_mut().flags = metadata_flags();
    emit_string_array(unit, &mut code, items)?;
    code.emit(Opcode::Return);
    code.finish()
}

/// `$imports()`
pub(crate) fn emit_imports(unit: &mut UnitBuilder, imports: &[String]) -> CompileResult<()> {
    let function = string_array_function(unit, IMPORTS, imports.iter())?;
    unit.add_function(function);
    Ok(())
}

/// `$extensions()`
pub(crate) fn emit_extensions<'s>(
    unit: &mut UnitBuilder,
    targets: impl ExactSizeIterator<Item = &'s String>,
) -> CompileResult<()> {
    let function = string_array_function(unit, EXTENSIONS, targets)?;
    unit.add_function(function);
    Ok(())
}

/// `$extensionApplications()` and `$extensionApplications(hash)`
///
/// The unary form switches on the hash of its argument. Targets whose hashes
/// collide share one case listing the groups of all of them.
pub(crate) fn emit_extension_applications(
    unit: &mut UnitBuilder,
    applications: &BTreeMap<String, Vec<String>>,
) -> CompileResult<()> {
    let function = string_array_function(unit, EXTENSION_APPLICATIONS, applications.keys())?;
    unit.add_function(function);

    let mut by_hash: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for (target, groups) in applications {
        let merged = by_hash.entry(string_hash(target)).or_default();
        for group in groups {
            if !merged.contains(group) {
                merged.push(group.clone());
            }
        }
    }

    let mut code = FunctionBuilder::new(EXTENSION_APPLICATIONS, vec!["hash".to_string()], false)?;
    code.def_mut().flags = metadata_flags();
    let default = code.new_label();
    let cases: Vec<(i32, _)> = by_hash.keys().map(|&hash| (hash, code.new_label())).collect();

    // Slot 0 holds the `string_hash` of the target name
    code.code().emit_load_local(0);
    code.emit_lookup_switch(default, &cases);
    for ((_, label), groups) in cases.iter().zip(by_hash.values()) {
        code.bind(*label);
        emit_string_array(unit, &mut code, groups.iter())?;
        code.emit(Opcode::Return);
    }
    code.bind(default);
    emit_string_array(unit, &mut code, std::iter::empty::<&String>())?;
    code.emit(Opcode::Return);
    unit.add_function(code.finish()?);
    Ok(())
}

/// Globals and accessors of module-level state
pub(crate) fn emit_module_state(ctx: Context<'_>, unit: &mut UnitBuilder) -> CompileResult<()> {
    for &reference in &ctx.module.module_state {
        let name = &ctx.module.reference(reference).name;
        let global = unit.add_global(name)?;

        let mut getter = FunctionBuilder::new(name.as_str(), Vec::new(), false)?;
        getter.def_mut().flags = accessor_flags();
        getter.code().emit_load_global(global);
        getter.emit(Opcode::Return);
        unit.add_function(getter.finish()?);

        let mut setter = FunctionBuilder::new(name.as_str(), vec!["value".to_string()], false)?;
        setter.def_mut().flags = accessor_flags();
        setter.code().emit_load_local(0);
        setter.code().emit_store_global(global);
        setter.emit(Opcode::ReturnVoid);
        unit.add_function(setter.finish()?);
    }
    Ok(())
}
