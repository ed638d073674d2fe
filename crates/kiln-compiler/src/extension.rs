//! Extension units
//!
//! Functions added to an existing type live in a unit nested in the module:
//! one unit per extended type (`acme.Tools$kiln$lang$String`) and one per
//! named extension group (`acme.Tools$Text`). Named groups have no target of
//! their own; the module's `$extensionApplications` tables bind them to types.

use crate::codegen::{emit_function, Context};
use crate::error::CompileResult;
use crate::metadata;
use crate::module_builder::UnitBuilder;
use kiln_bytecode::{CodeUnit, UnitKind};
use kiln_ir::FunctionId;

/// Qualified name of the unit holding the extensions of `target`
pub fn extension_unit_name(module: &str, target: &str) -> String {
    format!("{}${}", module, target.replace('.', "$"))
}

pub(crate) fn generate(ctx: Context<'_>) -> CompileResult<Vec<CodeUnit>> {
    let module = ctx.module;
    let mut units = Vec::with_capacity(module.extensions.len() + module.named_extensions.len());
    for (target, functions) in &module.extensions {
        units.push(generate_unit(ctx, target, Some(target), functions)?);
    }
    for (group, functions) in &module.named_extensions {
        units.push(generate_unit(ctx, group, None, functions)?);
    }
    Ok(units)
}

fn generate_unit(
    ctx: Context<'_>,
    key: &str,
    target: Option<&str>,
    functions: &[FunctionId],
) -> CompileResult<CodeUnit> {
    let name = extension_unit_name(&ctx.module.name, key);
    let mut unit = UnitBuilder::new(&name, UnitKind::Extension, ctx.source_file());
    unit.set_outer(&ctx.module.name);
    if let Some(target) = target {
        unit.set_extension_target(target);
    }

    let mut imports = ctx.module.imports.clone();
    imports.push(ctx.module.name.clone());
    metadata::emit_imports(&mut unit, &imports)?;
    unit.set_imports(imports);

    for &id in functions {
        let function = emit_function(ctx, &mut unit, id)?;
        unit.add_function(function);
    }

    let unit = unit.build();
    tracing::debug!(unit = %unit.name, functions = unit.functions.len(), "unit emitted");
    Ok(unit)
}
