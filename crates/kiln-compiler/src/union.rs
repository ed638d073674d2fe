//! Algebraic type units
//!
//! A union `Shape` of module `acme.Geo` becomes a unit `acme.Geo.types.Shape`
//! holding one factory per variant, plus one unit per variant
//! (`acme.Geo.types.Shape.Circle`) with member getters and `isX` predicates.

use crate::codegen::Context;
use crate::error::{CompileError, CompileResult};
use crate::metadata;
use crate::module_builder::{FunctionBuilder, UnitBuilder};
use kiln_bytecode::{CodeUnit, FunctionDef, FunctionFlags, Opcode, UnitKind};
use kiln_ir::{Union, Variant};

pub const VARIANTS: &str = "$variants";
pub const MEMBERS: &str = "$members";

fn public_flags(synthetic: bool) -> FunctionFlags {
    FunctionFlags {
        public: true,
        synthetic,
        ..FunctionFlags::default()
    }
}

pub fn union_unit_name(module: &str, union: &str) -> String {
    format!("{}.types.{}", module, union)
}

pub(crate) fn generate(ctx: Context<'_>) -> CompileResult<Vec<CodeUnit>> {
    let mut units = Vec::new();
    for union in &ctx.module.unions {
        let union_name = union_unit_name(&ctx.module.name, &union.name);
        units.push(generate_union(ctx, &union_name, union)?);
        for variant in &union.variants {
            units.push(generate_variant(ctx, &union_name, union, variant)?);
        }
    }
    Ok(units)
}

fn generate_union(ctx: Context<'_>, name: &str, union: &Union) -> CompileResult<CodeUnit> {
    let mut unit = UnitBuilder::new(name, UnitKind::Union, ctx.source_file());
    unit.set_outer(&ctx.module.name);

    for variant in &union.variants {
        let variant_name = format!("{}.{}", name, variant.name);
        unit.add_inner(&variant_name);

        let count = u16::try_from(variant.members.len())
            .map_err(|_| CompileError::TooManyLocals)?;
        let mut factory = FunctionBuilder::new(&variant.name, variant.members.clone(), false)?;
        factory.def_mut().flags = public_flags(false);
        for slot in 0..count {
            factory.code().emit_load_local(slot);
        }
        let constant = unit.add_string(&variant_name);
        factory.code().emit_new_variant(constant, count);
        factory.emit(Opcode::Return);
        unit.add_function(factory.finish()?);
    }

    let names: Vec<String> = union.variants.iter().map(|v| v.name.clone()).collect();
    let variants = string_array(&mut unit, VARIANTS, &names)?;
    unit.add_function(variants);

    let unit = unit.build();
    tracing::debug!(unit = %unit.name, variants = union.variants.len(), "unit emitted");
    Ok(unit)
}

fn generate_variant(
    ctx: Context<'_>,
    union_name: &str,
    union: &Union,
    variant: &Variant,
) -> CompileResult<CodeUnit> {
    let name = format!("{}.{}", union_name, variant.name);
    let mut unit = UnitBuilder::new(&name, UnitKind::Variant, ctx.source_file());
    unit.set_outer(union_name);

    for (index, member) in variant.members.iter().enumerate() {
        let field = u16::try_from(index).map_err(|_| CompileError::TooManyLocals)?;
        let mut getter = FunctionBuilder::new(member, vec!["this".to_string()], false)?;
        getter.def_mut().flags = public_flags(false);
        getter.code().emit_load_local(0);
        getter.code().emit_get_field(field);
        getter.emit(Opcode::Return);
        unit.add_function(getter.finish()?);
    }

    for other in &union.variants {
        let mut predicate =
            FunctionBuilder::new(format!("is{}", other.name), vec!["this".to_string()], false)?;
        predicate.def_mut().flags = public_flags(true);
        predicate.emit(if other.name == variant.name {
            Opcode::ConstTrue
        } else {
            Opcode::ConstFalse
        });
        predicate.emit(Opcode::Return);
        unit.add_function(predicate.finish()?);
    }

    let members = string_array(&mut unit, MEMBERS, &variant.members)?;
    unit.add_function(members);
    Ok(unit.build())
}

fn string_array(unit: &mut UnitBuilder, name: &str, items: &[String]) -> CompileResult<FunctionDef> {
    let mut code = FunctionBuilder::new(name, Vec::new(), false)?;
    code.def_mut().flags = public_flags(true);
    metadata::emit_string_array(unit, &mut code, items.iter())?;
    code.emit(Opcode::Return);
    code.finish()
}
