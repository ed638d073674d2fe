//! Struct units
//!
//! A struct `Point` of module `acme.Geo` becomes a unit `acme.Geo.types.Point`
//! with two constructors (`Point()` and `Point(x, y)`), one getter and one
//! setter per member and a `$members` listing of the public members.
//! Members whose name starts with `_` get module-private accessors.

use crate::codegen::Context;
use crate::error::{CompileError, CompileResult};
use crate::metadata;
use crate::module_builder::{FunctionBuilder, UnitBuilder};
use crate::union::MEMBERS;
use kiln_bytecode::{CodeUnit, FunctionFlags, Opcode, UnitKind};
use kiln_ir::Struct;

fn accessor_flags(public: bool, synthetic: bool) -> FunctionFlags {
    FunctionFlags {
        public,
        synthetic,
        ..FunctionFlags::default()
    }
}

pub fn struct_unit_name(module: &str, name: &str) -> String {
    format!("{}.types.{}", module, name)
}

pub(crate) fn generate(ctx: Context<'_>) -> CompileResult<Vec<CodeUnit>> {
    ctx.module
        .structs
        .iter()
        .map(|structure| generate_struct(ctx, structure))
        .collect()
}

fn generate_struct(ctx: Context<'_>, structure: &Struct) -> CompileResult<CodeUnit> {
    let name = struct_unit_name(&ctx.module.name, &structure.name);
    let mut unit = UnitBuilder::new(&name, UnitKind::Struct, ctx.source_file());
    unit.set_outer(&ctx.module.name);
    unit.set_members(structure.members.clone());

    let count = u16::try_from(structure.members.len()).map_err(|_| CompileError::TooManyLocals)?;

    let mut full = FunctionBuilder::new(&structure.name, structure.members.clone(), false)?;
    full.def_mut().flags = accessor_flags(true, false);
    for slot in 0..count {
        full.code().emit_load_local(slot);
    }
    full.code().emit_new_struct(count);
    full.emit(Opcode::Return);
    unit.add_function(full.finish()?);

    if count > 0 {
        let mut empty = FunctionBuilder::new(&structure.name, Vec::new(), false)?;
        empty.def_mut().flags = accessor_flags(true, false);
        for _ in 0..count {
            empty.emit(Opcode::ConstNull);
        }
        empty.code().emit_new_struct(count);
        empty.emit(Opcode::Return);
        unit.add_function(empty.finish()?);
    }

    for (index, member) in structure.members.iter().enumerate() {
        let field = u16::try_from(index).map_err(|_| CompileError::TooManyLocals)?;
        let public = !Struct::is_private_member(member);

        let mut getter = FunctionBuilder::new(member, vec!["this".to_string()], false)?;
        getter.def_mut().flags = accessor_flags(public, false);
        getter.code().emit_load_local(0);
        getter.code().emit_get_field(field);
        getter.emit(Opcode::Return);
        unit.add_function(getter.finish()?);

        let params = vec!["this".to_string(), member.clone()];
        let mut setter = FunctionBuilder::new(member, params, false)?;
        setter.def_mut().flags = accessor_flags(public, false);
        setter.code().emit_load_local(0);
        setter.code().emit_load_local(1);
        setter.code().emit_set_field(field);
        setter.code().emit_load_local(0);
        setter.emit(Opcode::Return);
        unit.add_function(setter.finish()?);
    }

    let mut members = FunctionBuilder::new(MEMBERS, Vec::new(), false)?;
    members.def_mut().flags = accessor_flags(true, true);
    let public: Vec<String> = structure.public_members().cloned().collect();
    metadata::emit_string_array(&mut unit, &mut members, public.iter())?;
    members.emit(Opcode::Return);
    unit.add_function(members.finish()?);

    let unit = unit.build();
    tracing::debug!(unit = %unit.name, members = structure.members.len(), "unit emitted");
    Ok(unit)
}
