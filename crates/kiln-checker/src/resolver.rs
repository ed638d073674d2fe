//! Scope and slot resolver
//!
//! One traversal per module, functions in declaration order and blocks in
//! pre-order. Assigns frame slots, verifies declarations and initialization,
//! classifies invocation targets and binds loop-control statements.
//!
//! Problems are collected; the traversal always completes so that a single
//! run reports everything it finds.

use crate::error::ResolveError;
use crate::problem::{ProblemBuilder, ProblemKind};
use crate::resolution::{CallTarget, Resolution, SelfBinding};
use kiln_ir::{
    Block, Conditional, ElseBranch, Expr, Function, FunctionId, FunctionInvocation, Module, NodeId,
    RefId, ScopeId, Span, Statement,
};
use rustc_hash::FxHashSet;

/// Resolve a module
///
/// Returns the slot/call-target tables on success, every collected problem
/// as [`ResolveError::Failed`] otherwise.
#[tracing::instrument(level = "debug", skip_all, fields(module = %module.name))]
pub fn resolve(module: &Module) -> Result<Resolution, ResolveError> {
    let mut resolver = Resolver::new(module);
    for id in module.all_functions() {
        resolver.visit_function(id)?;
    }

    let Resolver {
        resolution,
        problems,
        ..
    } = resolver;
    match problems.into_failure(module.name.clone(), module.source_file.clone()) {
        Some(failure) => {
            tracing::debug!(problems = failure.problems().len(), "resolution failed");
            Err(ResolveError::Failed(failure))
        }
        None => {
            tracing::debug!(slots = resolution.slots.len(), "resolution complete");
            Ok(resolution)
        }
    }
}

fn position(span: Span) -> String {
    format!("(line {}, column {})", span.line, span.column)
}

struct Resolver<'m> {
    module: &'m Module,
    resolution: Resolution,
    problems: ProblemBuilder,
    /// Locals that have a slot but no declaring assignment yet, module-wide
    uninitialized: FxHashSet<RefId>,
    /// Assigned-in-scope sets, one per active block
    assigned: Vec<FxHashSet<RefId>>,
    scopes: Vec<ScopeId>,
    loops: Vec<NodeId>,
    function: Option<&'m Function>,
    next_slot: u32,
}

impl<'m> Resolver<'m> {
    fn new(module: &'m Module) -> Self {
        Self {
            module,
            resolution: Resolution::default(),
            problems: ProblemBuilder::new(),
            uninitialized: FxHashSet::default(),
            assigned: Vec::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            function: None,
            next_slot: 0,
        }
    }

    fn allocate_slot(&mut self) -> Result<u16, ResolveError> {
        let slot = u16::try_from(self.next_slot).map_err(|_| {
            ResolveError::Internal(format!(
                "function `{}` needs more than {} local slots",
                self.function.map(|f| f.name.as_str()).unwrap_or("?"),
                u16::MAX
            ))
        })?;
        self.next_slot += 1;
        Ok(slot)
    }

    /// Reference owned by `scope` under `name`
    fn owned_named(&self, scope: ScopeId, name: &str) -> Option<RefId> {
        self.module.scope(scope).get_owned(name)
    }

    fn visit_function(&mut self, id: FunctionId) -> Result<(), ResolveError> {
        let function = self.module.function(id);
        tracing::trace!(function = %function.name, "resolving function");
        self.function = Some(function);
        self.next_slot = 0;

        let body_scope = function.body.scope;
        let mut parameters = FxHashSet::default();
        for name in &function.parameters {
            match self.owned_named(body_scope, name) {
                Some(reference) => {
                    self.uninitialized.remove(&reference);
                    let slot = self.allocate_slot()?;
                    self.resolution.slots.insert(reference, slot);
                    parameters.insert(reference);
                }
                None if function.is_synthetic() => {
                    // the argument still occupies its position in the frame
                    self.allocate_slot()?;
                }
                None => {
                    return Err(ResolveError::Internal(format!(
                        "cannot find the reference of parameter `{}` in `{}`",
                        name, function.name
                    )))
                }
            }
        }

        self.visit_block(&function.body, parameters, None)?;

        if let (true, Some(self_name)) = (function.is_synthetic(), &function.self_name) {
            let reference = self.owned_named(body_scope, self_name).ok_or_else(|| {
                ResolveError::Internal(format!(
                    "cannot find the self reference `{}` of `{}`",
                    self_name, function.name
                ))
            })?;
            let captured = function
                .synthetic_parameters
                .iter()
                .map(|name| {
                    self.owned_named(body_scope, name).ok_or_else(|| {
                        ResolveError::Internal(format!(
                            "captured parameter `{}` of `{}` has no reference",
                            name, function.name
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.resolution
                .self_bindings
                .insert(id, SelfBinding { reference, captured });
        }

        let frame_size = u16::try_from(self.next_slot).unwrap_or(u16::MAX);
        self.resolution.frame_sizes.insert(id, frame_size);
        self.function = None;
        Ok(())
    }

    fn visit_block(
        &mut self,
        block: &Block,
        seed: FxHashSet<RefId>,
        initialized: Option<RefId>,
    ) -> Result<(), ResolveError> {
        let owned = self.module.scope(block.scope).owned();
        for &reference in owned {
            if !self.resolution.slots.contains_key(&reference)
                && !self.module.reference(reference).is_module_state()
            {
                let slot = self.allocate_slot()?;
                self.resolution.slots.insert(reference, slot);
                self.uninitialized.insert(reference);
            }
        }

        let mut assigned = seed;
        if let Some(parent) = self.assigned.last() {
            assigned.extend(parent.iter().copied());
        }
        if let Some(reference) = initialized {
            self.uninitialized.remove(&reference);
            assigned.insert(reference);
        }

        self.assigned.push(assigned);
        self.scopes.push(block.scope);
        for statement in &block.statements {
            self.visit_statement(statement)?;
        }
        self.scopes.pop();
        self.assigned.pop();
        Ok(())
    }

    fn visit_statement(&mut self, statement: &Statement) -> Result<(), ResolveError> {
        match statement {
            Statement::Expr(expr) => self.visit_expr(expr),
            Statement::Assign(assignment) => {
                let target = assignment.target;
                let reference = self.module.reference(target);
                let assigned = self.assigned.last().ok_or_else(|| {
                    ResolveError::Internal("assignment outside of a block".to_string())
                })?;

                let module_init = self.function.map(|f| f.flags.module_init).unwrap_or(false);
                let assigning_constant = reference.is_constant()
                    && (assigned.contains(&target) || (reference.is_module_state() && !module_init));
                let redeclaring = !reference.is_synthetic()
                    && assignment.declaring
                    && assigned
                        .iter()
                        .any(|id| self.module.reference(*id).name == reference.name);

                if assigning_constant {
                    self.problems.report(
                        ProblemKind::AssignConstant,
                        assignment.span,
                        format!(
                            "Assigning `{}` at {} but it is a constant reference",
                            reference.name,
                            position(assignment.span)
                        ),
                    );
                } else if redeclaring {
                    self.problems.report(
                        ProblemKind::DuplicateDeclarationInBlock,
                        assignment.span,
                        format!(
                            "Declaring a duplicate reference `{}` at {}",
                            reference.name,
                            position(assignment.span)
                        ),
                    );
                }

                if let Some(assigned) = self.assigned.last_mut() {
                    assigned.insert(target);
                }
                self.visit_expr(&assignment.value)?;
                if assignment.declaring && !reference.is_synthetic() {
                    self.uninitialized.remove(&target);
                }
                Ok(())
            }
            Statement::Return(ret) => match &ret.value {
                Some(value) => self.visit_expr(value),
                None => Ok(()),
            },
            Statement::Throw(throw) => self.visit_expr(&throw.value),
            Statement::If(conditional) => self.visit_conditional(conditional),
            Statement::Loop(looping) => {
                self.loops.push(looping.id);
                if let Some(init) = &looping.init {
                    self.visit_statement(init)?;
                }
                if let Some(condition) = &looping.condition {
                    self.visit_expr(condition)?;
                }
                self.visit_block(&looping.body, FxHashSet::default(), None)?;
                if let Some(post) = &looping.post {
                    self.visit_statement(post)?;
                }
                self.loops.pop();
                Ok(())
            }
            Statement::LoopControl(control) => {
                match self.loops.last() {
                    Some(&enclosing) => {
                        self.resolution.loops.insert(control.id, enclosing);
                    }
                    None => self.problems.report(
                        ProblemKind::BreakOrContinueOutsideLoop,
                        control.span,
                        format!(
                            "continue or break statement outside a loop at {}",
                            position(control.span)
                        ),
                    ),
                }
                Ok(())
            }
            Statement::Try(statement) => {
                self.visit_block(&statement.try_block, FxHashSet::default(), None)?;
                if let Some(catch) = &statement.catch {
                    let exception = self.owned_named(catch.block.scope, &catch.exception);
                    self.visit_block(&catch.block, FxHashSet::default(), exception)?;
                }
                if let Some(finally) = &statement.finally {
                    self.visit_block(finally, FxHashSet::default(), None)?;
                }
                Ok(())
            }
        }
    }

    fn visit_conditional(&mut self, conditional: &Conditional) -> Result<(), ResolveError> {
        self.visit_expr(&conditional.condition)?;
        self.visit_block(&conditional.then_block, FxHashSet::default(), None)?;
        match &conditional.otherwise {
            Some(ElseBranch::Block(block)) => self.visit_block(block, FxHashSet::default(), None),
            Some(ElseBranch::If(nested)) => self.visit_conditional(nested),
            None => Ok(()),
        }
    }

    fn lookup(&self, name: &str) -> Option<RefId> {
        let scope = self.scopes.last()?;
        self.module.lookup(*scope, name)
    }

    fn check_read(&mut self, name: &str, span: Span) {
        match self.lookup(name) {
            None => self.problems.report(
                ProblemKind::UndeclaredReference,
                span,
                format!("Undeclared reference `{}` at {}", name, position(span)),
            ),
            Some(id) => {
                let reference = self.module.reference(id);
                if !reference.is_synthetic()
                    && !reference.is_module_state()
                    && self.uninitialized.contains(&id)
                {
                    self.problems.report(
                        ProblemKind::UninitializedReferenceAccess,
                        span,
                        format!(
                            "Uninitialized reference access `{}` at {}",
                            name,
                            position(span)
                        ),
                    );
                }
            }
        }
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<(), ResolveError> {
        match expr {
            Expr::Constant { .. } => Ok(()),
            Expr::Lookup { name, span } => {
                self.check_read(name, *span);
                Ok(())
            }
            Expr::Call(invocation) => self.visit_invocation(invocation),
            Expr::Method(invocation) => {
                for argument in &invocation.arguments {
                    self.visit_expr(&argument.value)?;
                }
                for call in &invocation.anonymous_calls {
                    self.visit_invocation(call)?;
                }
                Ok(())
            }
            Expr::Binary { left, right, .. } => {
                self.visit_expr(left)?;
                self.visit_expr(right)
            }
            Expr::Unary { operand, .. } => self.visit_expr(operand),
            Expr::Collection(literal) => {
                for item in &literal.items {
                    self.visit_expr(item)?;
                }
                Ok(())
            }
            Expr::Closure { target, span } => {
                let captured = &self.module.function(*target).synthetic_parameters;
                for name in captured {
                    self.check_read(name, *span);
                }
                Ok(())
            }
        }
    }

    fn visit_invocation(&mut self, invocation: &FunctionInvocation) -> Result<(), ResolveError> {
        if !invocation.anonymous {
            if let Some(id) = self.lookup(&invocation.name) {
                let target = if self.module.reference(id).is_module_state() {
                    CallTarget::ModuleState(id)
                } else {
                    CallTarget::Reference(id)
                };
                self.resolution.call_targets.insert(invocation.id, target);
            }
        }
        for argument in &invocation.arguments {
            self.visit_expr(&argument.value)?;
        }
        for call in &invocation.anonymous_calls {
            self.visit_invocation(call)?;
        }
        Ok(())
    }
}
