//! Code Generation from resolved IR to code units
//!
//! # Pipeline
//!
//! ```text
//! Module + Resolution → generate → [module unit, extension units, struct units, union units]
//! ```
//!
//! Each function body is emitted by a [`FunctionEmitter`] in one pre-order
//! pass. The emitter keeps the stack of active scopes (to map names to the
//! slots chosen by the resolver) and the labels of the loops in scope.

mod control;
mod expr;

use crate::error::{CompileError, CompileResult};
use crate::module_builder::{FunctionBuilder, UnitBuilder};
use crate::options::CompileOptions;
use crate::{extension, metadata, structure, union};
use kiln_bytecode::{CallKind, CallSite, CodeUnit, FunctionDef, FunctionFlags, Opcode, UnitKind};
use kiln_checker::Resolution;
use kiln_ir::{Block, Function, FunctionId, Module, NodeId, RefId, ScopeId, Statement, Visibility};
use rustc_hash::FxHashMap;

use control::LoopLabels;

/// Read-only inputs shared by every emitter of one module
#[derive(Clone, Copy)]
pub(crate) struct Context<'a> {
    pub module: &'a Module,
    pub resolution: &'a Resolution,
    pub options: &'a CompileOptions,
}

impl<'a> Context<'a> {
    /// Source file recorded in unit headers
    pub fn source_file(&self) -> Option<String> {
        self.options
            .source_file
            .clone()
            .or_else(|| self.module.source_file.clone())
    }

    /// Late-bound name of a module-state variable
    pub fn state_site_name(&self, reference: RefId) -> String {
        format!(
            "{}.{}",
            self.module.name,
            self.module.reference(reference).name
        )
    }
}

/// Generate every unit of a resolved module, the module unit first
pub(crate) fn generate(
    module: &Module,
    resolution: &Resolution,
    options: &CompileOptions,
) -> CompileResult<Vec<CodeUnit>> {
    let ctx = Context {
        module,
        resolution,
        options,
    };

    let mut main = UnitBuilder::new(&module.name, UnitKind::Module, ctx.source_file());
    main.set_imports(module.imports.clone());
    metadata::emit_imports(&mut main, &module.imports)?;
    for &id in &module.top_level {
        let function = emit_function(ctx, &mut main, id)?;
        main.add_function(function);
    }

    let mut units = Vec::new();
    for unit in extension::generate(ctx)? {
        main.add_inner(&unit.name);
        units.push(unit);
    }
    for unit in structure::generate(ctx)? {
        main.add_inner(&unit.name);
        units.push(unit);
    }
    for unit in union::generate(ctx)? {
        if unit.kind == UnitKind::Union {
            main.add_inner(&unit.name);
        }
        units.push(unit);
    }

    metadata::emit_module_state(ctx, &mut main)?;
    metadata::emit_extensions(&mut main, module.extensions.keys())?;
    metadata::emit_extension_applications(&mut main, &module.extension_applications)?;

    let main = main.build();
    tracing::debug!(unit = %main.name, functions = main.functions.len(), "unit emitted");
    units.insert(0, main);
    Ok(units)
}

/// Emit one function of the module into `unit`
pub(crate) fn emit_function(
    ctx: Context<'_>,
    unit: &mut UnitBuilder,
    id: FunctionId,
) -> CompileResult<FunctionDef> {
    let function = ctx.module.function(id);
    let mut code = FunctionBuilder::new(
        &function.name,
        function.parameters.clone(),
        ctx.options.debug_info,
    )?;
    {
        let def = code.def_mut();
        def.varargs = function.varargs;
        def.flags = function_flags(function);
        def.decorated_by = function
            .decorator_ref
            .clone()
            .filter(|_| function.flags.decorated);
        def.max_locals = ctx
            .resolution
            .frame_size(id)
            .max(function.parameters.len() as u16);
    }

    let mut emitter = FunctionEmitter {
        ctx,
        unit,
        code,
        scopes: Vec::new(),
        loops: FxHashMap::default(),
        base_depth: 0,
    };
    emitter.code.mark_line(function.span.line);
    emitter.emit_self_binding(id)?;
    emitter.emit_block(&function.body)?;
    if function.body.falls_through() {
        if function.flags.main || function.flags.module_init {
            emitter.code.emit(Opcode::ReturnVoid);
        } else {
            emitter.code.emit(Opcode::ConstNull);
            emitter.code.emit(Opcode::Return);
        }
    }

    let def = emitter.code.finish()?;
    tracing::trace!(
        function = %def.name,
        arity = def.arity(),
        size = def.code.len(),
        "function emitted"
    );
    Ok(def)
}

fn function_flags(function: &Function) -> FunctionFlags {
    FunctionFlags {
        public: function.visibility == Visibility::Public,
        main: function.flags.main,
        module_init: function.flags.module_init,
        synthetic: function.flags.synthetic,
        decorator: function.flags.decorator,
    }
}

/// Emission state of one function body
pub(crate) struct FunctionEmitter<'a, 'u> {
    ctx: Context<'a>,
    unit: &'u mut UnitBuilder,
    code: FunctionBuilder,
    /// Active scopes, innermost last
    scopes: Vec<ScopeId>,
    /// Labels of the loops in scope
    loops: FxHashMap<NodeId, LoopLabels>,
    /// Operand stack depth under statement-level code; non-zero inside a
    /// handler's copy of a finally block, where the thrown value is pending
    base_depth: u16,
}

impl<'a, 'u> FunctionEmitter<'a, 'u> {
    fn slot(&self, reference: RefId) -> CompileResult<u16> {
        self.ctx.resolution.slot(reference).ok_or_else(|| {
            CompileError::internal(format!(
                "reference `{}` has no slot",
                self.ctx.module.reference(reference).name
            ))
        })
    }

    fn lookup(&self, name: &str) -> CompileResult<RefId> {
        let scope = self
            .scopes
            .last()
            .ok_or_else(|| CompileError::internal("lookup outside of a block"))?;
        self.ctx
            .module
            .lookup(*scope, name)
            .ok_or_else(|| CompileError::internal(format!("unresolved reference `{}`", name)))
    }

    fn invoke(&mut self, site: CallSite) {
        let index = self.unit.add_call_site(site);
        self.code.code().emit_invoke(index);
    }

    /// Push the value of a reference
    fn emit_load(&mut self, reference: RefId) -> CompileResult<()> {
        if self.ctx.module.reference(reference).is_module_state() {
            let name = self.ctx.state_site_name(reference);
            self.invoke(CallSite::new(CallKind::Function, name, 0));
        } else {
            let slot = self.slot(reference)?;
            self.code.code().emit_load_local(slot);
        }
        Ok(())
    }

    /// Pop the top of stack into a reference
    fn emit_store(&mut self, reference: RefId) -> CompileResult<()> {
        if self.ctx.module.reference(reference).is_module_state() {
            let mut site = CallSite::new(CallKind::Function, self.ctx.state_site_name(reference), 1);
            site.void = true;
            self.invoke(site);
        } else {
            let slot = self.slot(reference)?;
            self.code.code().emit_store_local(slot);
        }
        Ok(())
    }

    /// Bind a closure's self name to a handle on the closure itself
    fn emit_self_binding(&mut self, id: FunctionId) -> CompileResult<()> {
        let Some(binding) = self.ctx.resolution.self_binding(id) else {
            return Ok(());
        };
        let binding = binding.clone();
        self.emit_closure(id, &binding.captured)?;
        let slot = self.slot(binding.reference)?;
        self.code.code().emit_store_local(slot);
        Ok(())
    }

    pub(crate) fn emit_block(&mut self, block: &Block) -> CompileResult<()> {
        self.scopes.push(block.scope);
        let start = self.code.position();
        for statement in &block.statements {
            self.code.mark_line(statement.span().line);
            self.emit_statement(statement)?;
        }
        let end = self.code.position();

        let module = self.ctx.module;
        for &reference in module.scope(block.scope).owned() {
            if let Some(slot) = self.ctx.resolution.slot(reference) {
                self.code
                    .add_local(&module.reference(reference).name, slot, start, end);
            }
        }
        self.scopes.pop();
        Ok(())
    }

    fn emit_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::Expr(expr) => {
                self.emit_expr(expr)?;
                self.code.emit(Opcode::Pop);
            }
            Statement::Assign(assignment) => {
                self.emit_expr(&assignment.value)?;
                self.emit_store(assignment.target)?;
            }
            Statement::Return(ret) => match &ret.value {
                Some(value) => {
                    self.emit_expr(value)?;
                    self.code.emit(Opcode::Return);
                }
                None => self.code.emit(Opcode::ReturnVoid),
            },
            Statement::Throw(throw) => {
                self.emit_expr(&throw.value)?;
                self.code.emit(Opcode::Throw);
            }
            Statement::If(conditional) => self.emit_conditional(conditional)?,
            Statement::Loop(looping) => self.emit_loop(looping)?,
            Statement::LoopControl(control) => self.emit_loop_control(control)?,
            Statement::Try(statement) => self.emit_try(statement)?,
        }
        Ok(())
    }
}
