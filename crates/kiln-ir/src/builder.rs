//! Builders for assembling module IR
//!
//! The upstream IR builder and the test suites construct modules through
//! these helpers so scope ownership and node ids stay consistent.
//!
//! ```
//! use kiln_ir::{BinaryOp, Expr, ModuleBuilder};
//!
//! let mut module = ModuleBuilder::new("acme.Math");
//! let mut f = module.function("inc", &["x"]);
//! f.let_("y", Expr::int(1));
//! f.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("x"), Expr::lookup("y")));
//! f.finish();
//! let module = module.build().unwrap();
//! assert_eq!(module.top_level.len(), 1);
//! ```

use crate::module::{
    Function, FunctionFlags, FunctionId, Module, RefId, Reference, ReferenceKind, Scope, ScopeId,
    Struct, Union, Variant, Visibility,
};
use crate::node::*;
use crate::span::Span;
use std::cell::Cell;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors detected while assembling IR
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("Reference `{name}` is not visible in function `{function}`")]
    UnknownReference { name: String, function: String },

    #[error("Captured reference `{name}` is not visible where closure `{closure}` is created")]
    UnknownCapture { name: String, closure: String },

    #[error("Named and positional arguments are mixed in call to `{0}`")]
    MixedArguments(String),
}

/// Where a finished function is registered
#[derive(Debug, Clone)]
enum Placement {
    TopLevel,
    Extension(String),
    NamedExtension(String),
}

/// Options of a synthetic closure function
#[derive(Debug, Clone, Default)]
pub struct ClosureOptions {
    pub varargs: bool,
    /// Local name through which the closure can call itself
    pub self_name: Option<String>,
}

pub struct ModuleBuilder {
    name: String,
    source_file: Option<String>,
    imports: Vec<String>,
    functions: Vec<Function>,
    top_level: Vec<FunctionId>,
    extensions: BTreeMap<String, Vec<FunctionId>>,
    named_extensions: BTreeMap<String, Vec<FunctionId>>,
    extension_applications: BTreeMap<String, Vec<String>>,
    structs: Vec<Struct>,
    unions: Vec<Union>,
    module_state: Vec<RefId>,
    scopes: Vec<Scope>,
    references: Vec<Reference>,
    global_scope: ScopeId,
    next_node: Cell<u32>,
    closure_count: u32,
    errors: Vec<BuildError>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: None,
            imports: Vec::new(),
            functions: Vec::new(),
            top_level: Vec::new(),
            extensions: BTreeMap::new(),
            named_extensions: BTreeMap::new(),
            extension_applications: BTreeMap::new(),
            structs: Vec::new(),
            unions: Vec::new(),
            module_state: Vec::new(),
            scopes: vec![Scope::new(None)],
            references: Vec::new(),
            global_scope: ScopeId(0),
            next_node: Cell::new(0),
            closure_count: 0,
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_source_file(&mut self, file: impl Into<String>) {
        self.source_file = Some(file.into());
    }

    pub fn import(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.imports.contains(&name) {
            self.imports.push(name);
        }
    }

    /// Declare a module-level `var`
    pub fn module_variable(&mut self, name: &str) -> RefId {
        let id = self.declare(self.global_scope, name, ReferenceKind::ModuleVariable);
        self.module_state.push(id);
        id
    }

    /// Declare a module-level `let`
    pub fn module_constant(&mut self, name: &str) -> RefId {
        let id = self.declare(self.global_scope, name, ReferenceKind::ModuleConstant);
        self.module_state.push(id);
        id
    }

    /// Declare `struct name = { members }`
    pub fn structure(&mut self, name: &str, members: &[&str]) {
        self.structs.push(Struct {
            name: name.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        });
    }

    pub fn union(&mut self, name: &str, variants: &[(&str, &[&str])]) {
        self.unions.push(Union {
            name: name.to_string(),
            variants: variants
                .iter()
                .map(|(variant, members)| Variant {
                    name: variant.to_string(),
                    members: members.iter().map(|m| m.to_string()).collect(),
                })
                .collect(),
        });
    }

    /// Start a module-level function
    pub fn function(&mut self, name: &str, parameters: &[&str]) -> FunctionBuilder<'_> {
        FunctionBuilder::new(self, name, parameters, &[], Placement::TopLevel)
    }

    /// Start the module initializer, where module constants receive their values
    pub fn module_initializer(&mut self) -> FunctionBuilder<'_> {
        let mut builder = FunctionBuilder::new(self, "$init", &[], &[], Placement::TopLevel);
        builder.function.flags.module_init = true;
        builder.function.flags.synthetic = true;
        builder.function.visibility = Visibility::Private;
        builder
    }

    /// Start a function of the extension group for `target`
    pub fn extension(
        &mut self,
        target: &str,
        name: &str,
        parameters: &[&str],
    ) -> FunctionBuilder<'_> {
        let placement = Placement::Extension(target.to_string());
        FunctionBuilder::new(self, name, parameters, &[], placement)
    }

    /// Start a function of the extension group declared as `group`
    pub fn named_extension(
        &mut self,
        group: &str,
        name: &str,
        parameters: &[&str],
    ) -> FunctionBuilder<'_> {
        let placement = Placement::NamedExtension(group.to_string());
        FunctionBuilder::new(self, name, parameters, &[], placement)
    }

    /// Record that the named extension group `group` applies to `target`
    pub fn apply_extension(&mut self, target: &str, group: &str) {
        let names = self
            .extension_applications
            .entry(target.to_string())
            .or_default();
        if !names.iter().any(|n| n == group) {
            names.push(group.to_string());
        }
    }

    pub fn build(self) -> Result<Module, BuildError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        Ok(Module {
            name: self.name,
            source_file: self.source_file,
            imports: self.imports,
            functions: self.functions,
            top_level: self.top_level,
            extensions: self.extensions,
            named_extensions: self.named_extensions,
            extension_applications: self.extension_applications,
            structs: self.structs,
            unions: self.unions,
            module_state: self.module_state,
            scopes: self.scopes,
            references: self.references,
            global_scope: self.global_scope,
        })
    }

    fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(Some(parent)));
        id
    }

    fn declare(&mut self, scope: ScopeId, name: &str, kind: ReferenceKind) -> RefId {
        let id = RefId(self.references.len() as u32);
        self.references.push(Reference {
            name: name.to_string(),
            kind,
            scope,
        });
        self.scopes[scope.0 as usize].insert(name.to_string(), id);
        id
    }

    fn lookup(&self, scope: ScopeId, name: &str) -> Option<RefId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let table = &self.scopes[id.0 as usize];
            if let Some(found) = table.get_owned(name) {
                return Some(found);
            }
            current = table.parent;
        }
        None
    }

    fn next_node(&self) -> NodeId {
        let id = self.next_node.get();
        self.next_node.set(id + 1);
        NodeId(id)
    }
}

/// Builds one function body, tracking the open block stack
pub struct FunctionBuilder<'m> {
    module: &'m mut ModuleBuilder,
    function: Function,
    placement: Placement,
    scopes: Vec<ScopeId>,
    statements: Vec<Vec<Statement>>,
    span: Span,
}

impl<'m> FunctionBuilder<'m> {
    fn new(
        module: &'m mut ModuleBuilder,
        name: &str,
        parameters: &[&str],
        captured: &[&str],
        placement: Placement,
    ) -> Self {
        let scope = module.new_scope(module.global_scope);
        for name in captured {
            module.declare(scope, name, ReferenceKind::Synthetic);
        }
        for name in parameters {
            module.declare(scope, name, ReferenceKind::Constant);
        }
        let function = Function {
            name: name.to_string(),
            parameters: captured
                .iter()
                .chain(parameters.iter())
                .map(|p| p.to_string())
                .collect(),
            varargs: false,
            visibility: Visibility::Public,
            flags: FunctionFlags {
                synthetic: !captured.is_empty(),
                ..FunctionFlags::default()
            },
            decorator_ref: None,
            self_name: None,
            synthetic_parameters: captured.iter().map(|c| c.to_string()).collect(),
            body: Block::new(scope),
            span: Span::default(),
        };
        Self {
            module,
            function,
            placement,
            scopes: vec![scope],
            statements: vec![Vec::new()],
            span: Span::default(),
        }
    }

    pub fn varargs(mut self) -> Self {
        self.function.varargs = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.function.visibility = Visibility::Private;
        self
    }

    pub fn main(mut self) -> Self {
        self.function.flags.main = true;
        self
    }

    pub fn decorator(mut self) -> Self {
        self.function.flags.decorator = true;
        self
    }

    /// Mark the function as wrapped by the decorator produced by `decorator_ref`
    pub fn decorated_by(mut self, decorator_ref: &str) -> Self {
        self.function.flags.decorated = true;
        self.function.decorator_ref = Some(decorator_ref.to_string());
        self
    }

    /// Position attached to the statements added from now on
    pub fn at(&mut self, span: Span) {
        self.span = span;
    }

    pub fn at_line(&mut self, line: u32) {
        self.span = Span::at_line(line);
    }

    /// Scope of the innermost open block
    pub fn scope(&self) -> ScopeId {
        self.scopes.last().copied().unwrap_or(self.function.body.scope)
    }

    /// Declare a reference in the innermost open block without assigning it
    pub fn declare(&mut self, name: &str, kind: ReferenceKind) -> RefId {
        let scope = self.scope();
        self.module.declare(scope, name, kind)
    }

    /// `let name = value`
    pub fn let_(&mut self, name: &str, value: Expr) -> RefId {
        let id = self.declare(name, ReferenceKind::Constant);
        self.assign_ref(id, value, true);
        id
    }

    /// `var name = value`
    pub fn var(&mut self, name: &str, value: Expr) -> RefId {
        let id = self.declare(name, ReferenceKind::Variable);
        self.assign_ref(id, value, true);
        id
    }

    /// `name = value` on a visible reference
    pub fn assign(&mut self, name: &str, value: Expr) {
        match self.resolve(name) {
            Some(id) => self.assign_ref(id, value, false),
            None => self.unknown(name),
        }
    }

    pub fn assign_ref(&mut self, target: RefId, value: Expr, declaring: bool) {
        let statement = self.assignment(target, value, declaring);
        self.push(statement);
    }

    /// An assignment statement, for loop headers
    pub fn assignment(&self, target: RefId, value: Expr, declaring: bool) -> Statement {
        Statement::Assign(Assignment {
            target,
            value,
            declaring,
            span: self.span,
        })
    }

    /// Expression evaluated as a statement
    pub fn expr(&mut self, expr: Expr) {
        self.push(Statement::Expr(expr));
    }

    pub fn ret(&mut self, value: Expr) {
        let span = self.span;
        self.push(Statement::Return(Return {
            value: Some(value),
            span,
        }));
    }

    pub fn ret_void(&mut self) {
        let span = self.span;
        self.push(Statement::Return(Return { value: None, span }));
    }

    pub fn throw(&mut self, value: Expr) {
        let span = self.span;
        self.push(Statement::Throw(Throw { value, span }));
    }

    /// Build a nested block with its own scope
    pub fn block(&mut self, build: impl FnOnce(&mut Self)) -> Block {
        let scope = self.module.new_scope(self.scope());
        self.scopes.push(scope);
        self.statements.push(Vec::new());
        build(self);
        self.scopes.pop();
        let statements = self.statements.pop().unwrap_or_default();
        Block { scope, statements }
    }

    pub fn conditional(
        &self,
        condition: Expr,
        then_block: Block,
        otherwise: Option<ElseBranch>,
    ) -> Conditional {
        Conditional {
            condition,
            then_block,
            otherwise,
            span: self.span,
        }
    }

    pub fn if_(&mut self, condition: Expr, then_block: Block, otherwise: Option<ElseBranch>) {
        let statement = self.conditional(condition, then_block, otherwise);
        self.push(Statement::If(statement));
    }

    pub fn while_(&mut self, condition: Expr, body: Block) {
        self.loop_(None, Some(condition), None, body);
    }

    pub fn loop_(
        &mut self,
        init: Option<Statement>,
        condition: Option<Expr>,
        post: Option<Statement>,
        body: Block,
    ) {
        let statement = Statement::Loop(Loop {
            id: self.module.next_node(),
            init: init.map(Box::new),
            condition,
            body,
            post: post.map(Box::new),
            span: self.span,
        });
        self.push(statement);
    }

    pub fn brk(&mut self) {
        self.loop_control(LoopControlKind::Break);
    }

    pub fn cont(&mut self) {
        self.loop_control(LoopControlKind::Continue);
    }

    fn loop_control(&mut self, kind: LoopControlKind) {
        let statement = Statement::LoopControl(LoopControl {
            id: self.module.next_node(),
            kind,
            span: self.span,
        });
        self.push(statement);
    }

    /// Catch block declaring `exception` as its first reference
    pub fn catch_block(&mut self, exception: &str, build: impl FnOnce(&mut Self)) -> CatchClause {
        let block = self.block(|f| {
            f.declare(exception, ReferenceKind::Constant);
            build(f);
        });
        CatchClause {
            exception: exception.to_string(),
            block,
        }
    }

    pub fn try_(&mut self, try_block: Block, catch: Option<CatchClause>, finally: Option<Block>) {
        let span = self.span;
        self.push(Statement::Try(TryCatchFinally {
            try_block,
            catch,
            finally,
            span,
        }));
    }

    /// Plain call with positional arguments
    pub fn call(&self, name: &str, arguments: Vec<Expr>) -> Expr {
        Expr::Call(self.invocation(name, arguments))
    }

    pub fn invocation(&self, name: &str, arguments: Vec<Expr>) -> FunctionInvocation {
        FunctionInvocation {
            id: self.module.next_node(),
            name: name.to_string(),
            arguments: arguments.into_iter().map(Argument::positional).collect(),
            constant: false,
            anonymous: false,
            anonymous_calls: Vec::new(),
            span: self.span,
        }
    }

    /// Call with labelled arguments
    pub fn named_call(&self, name: &str, arguments: Vec<(&str, Expr)>) -> Expr {
        let mut invocation = self.invocation(name, Vec::new());
        invocation.arguments = arguments
            .into_iter()
            .map(|(label, value)| Argument::named(label, value))
            .collect();
        Expr::Call(invocation)
    }

    /// Call with an explicit argument list, labelled or not
    pub fn call_with(&mut self, name: &str, arguments: Vec<Argument>) -> Expr {
        let labelled = arguments.iter().filter(|a| a.name.is_some()).count();
        if labelled != 0 && labelled != arguments.len() {
            self.module
                .errors
                .push(BuildError::MixedArguments(name.to_string()));
        }
        let mut invocation = self.invocation(name, Vec::new());
        invocation.arguments = arguments;
        Expr::Call(invocation)
    }

    /// Invocation of the callable left on the stack by the previous call
    pub fn anonymous(&self, arguments: Vec<Expr>) -> FunctionInvocation {
        let mut invocation = self.invocation("", arguments);
        invocation.anonymous = true;
        invocation
    }

    /// Closure over `captured` (values snapshotted at creation) taking `parameters`
    pub fn closure(
        &mut self,
        captured: &[&str],
        parameters: &[&str],
        build: impl FnOnce(&mut FunctionBuilder<'_>),
    ) -> Expr {
        self.closure_with(ClosureOptions::default(), captured, parameters, build)
    }

    pub fn closure_with(
        &mut self,
        options: ClosureOptions,
        captured: &[&str],
        parameters: &[&str],
        build: impl FnOnce(&mut FunctionBuilder<'_>),
    ) -> Expr {
        let name = format!(
            "__$$_{}_closure_{}",
            self.function.name.trim_start_matches('$'),
            self.module.closure_count
        );
        self.module.closure_count += 1;
        for capture in captured {
            if self.resolve(capture).is_none() {
                self.module.errors.push(BuildError::UnknownCapture {
                    name: capture.to_string(),
                    closure: name.clone(),
                });
            }
        }
        let span = self.span;
        let mut closure =
            FunctionBuilder::new(self.module, &name, parameters, captured, Placement::TopLevel);
        closure.function.flags.synthetic = true;
        closure.function.visibility = Visibility::Private;
        closure.function.varargs = options.varargs;
        if let Some(self_name) = &options.self_name {
            closure.declare(self_name, ReferenceKind::Synthetic);
            closure.function.self_name = Some(self_name.clone());
        }
        build(&mut closure);
        let target = closure.finish();
        Expr::Closure { target, span }
    }

    pub fn resolve(&self, name: &str) -> Option<RefId> {
        self.module.lookup(self.scope(), name)
    }

    /// Register the function with the module
    pub fn finish(mut self) -> FunctionId {
        self.function.body.statements = self.statements.swap_remove(0);
        let id = FunctionId(self.module.functions.len() as u32);
        self.module.functions.push(self.function);
        match self.placement {
            Placement::TopLevel => self.module.top_level.push(id),
            Placement::Extension(target) => {
                self.module.extensions.entry(target).or_default().push(id)
            }
            Placement::NamedExtension(group) => self
                .module
                .named_extensions
                .entry(group)
                .or_default()
                .push(id),
        }
        id
    }

    fn push(&mut self, statement: Statement) {
        if let Some(current) = self.statements.last_mut() {
            current.push(statement);
        }
    }

    fn unknown(&mut self, name: &str) {
        self.module.errors.push(BuildError::UnknownReference {
            name: name.to_string(),
            function: self.function.name.clone(),
        });
    }
}
