//! Expression lowering
//!
//! Every expression leaves exactly one value on the operand stack. Calls are
//! emitted as `INVOKE` of a call-site descriptor; the runtime links them.

use super::FunctionEmitter;
use crate::error::{CompileError, CompileResult};
use kiln_bytecode::{CallKind, CallSite, Opcode};
use kiln_checker::CallTarget;
use kiln_ir::{
    Argument, BinaryOp, CollectionKind, CollectionLiteral, Constant, Expr, FunctionId,
    FunctionInvocation, MethodInvocation, RefId,
};

/// Runtime function building a function handle from a name and a module type
const FUNCTION_REFERENCE_FACTORY: &str = "kiln.Predefined.fun";

fn site_arity(count: usize) -> CompileResult<u16> {
    u16::try_from(count).map_err(|_| CompileError::UnsupportedFeature {
        feature: format!("call with {} operands", count),
    })
}

fn literal_size(count: usize) -> CompileResult<i32> {
    i32::try_from(count).map_err(|_| CompileError::UnsupportedFeature {
        feature: format!("collection literal with {} items", count),
    })
}

impl<'a, 'u> FunctionEmitter<'a, 'u> {
    pub(super) fn emit_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Constant { value, .. } => self.emit_constant(value),
            Expr::Lookup { name, .. } => {
                let reference = self.lookup(name)?;
                self.emit_load(reference)
            }
            Expr::Call(invocation) => self.emit_invocation(invocation),
            Expr::Method(invocation) => self.emit_method(invocation),
            Expr::Binary {
                op, left, right, ..
            } => self.emit_binary(*op, left, right),
            Expr::Unary { op, operand, .. } => {
                self.emit_expr(operand)?;
                self.invoke(CallSite::new(CallKind::Operator, op.name(), 1));
                Ok(())
            }
            Expr::Collection(literal) => self.emit_collection(literal),
            Expr::Closure { target, .. } => {
                let captured = self
                    .ctx
                    .module
                    .function(*target)
                    .synthetic_parameters
                    .iter()
                    .map(|name| self.lookup(name))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.emit_closure(*target, &captured)
            }
        }
    }

    fn emit_constant(&mut self, value: &Constant) -> CompileResult<()> {
        let code = self.code.code();
        match value {
            Constant::Null => code.emit_opcode(Opcode::ConstNull),
            Constant::Bool(true) => code.emit_opcode(Opcode::ConstTrue),
            Constant::Bool(false) => code.emit_opcode(Opcode::ConstFalse),
            Constant::Int(v) => code.emit_const_i32(*v),
            Constant::Long(v) => code.emit_const_i64(*v),
            Constant::Float(v) => code.emit_const_f32(*v),
            Constant::Double(v) => code.emit_const_f64(*v),
            Constant::Char(c) => code.emit_const_char(*c),
            Constant::Str(s) => {
                let index = self.unit.add_string(s);
                self.code.code().emit_const_str(index);
            }
            Constant::ClassRef(name) => self.emit_class_ref(name),
            Constant::FunctionRef { module, name } => {
                let index = self.unit.add_string(name);
                self.code.code().emit_const_str(index);
                let owner = module.as_deref().unwrap_or(&self.ctx.module.name).to_string();
                self.emit_class_ref(&owner);
                let mut site = CallSite::new(CallKind::Function, FUNCTION_REFERENCE_FACTORY, 2);
                site.constant = true;
                self.invoke(site);
            }
        }
        Ok(())
    }

    fn emit_class_ref(&mut self, name: &str) {
        let mut site = CallSite::new(CallKind::ClassRef, name, 0);
        site.constant = true;
        self.invoke(site);
    }

    /// Push the arguments of a call, returning the labels of named ones
    fn emit_arguments(&mut self, callee: &str, arguments: &[Argument]) -> CompileResult<Vec<String>> {
        let labelled = arguments.iter().filter(|a| a.name.is_some()).count();
        if labelled != 0 && labelled != arguments.len() {
            return Err(CompileError::UnsupportedFeature {
                feature: format!("mixed named and positional arguments in call to `{}`", callee),
            });
        }
        for argument in arguments {
            self.emit_expr(&argument.value)?;
        }
        Ok(arguments.iter().filter_map(|a| a.name.clone()).collect())
    }

    /// Call the function value on top of the stack
    fn emit_closure_call(&mut self, invocation: &FunctionInvocation) -> CompileResult<()> {
        self.code.emit(Opcode::CastFunction);
        let names = self.emit_arguments(&invocation.name, &invocation.arguments)?;
        let mut site = CallSite::new(
            CallKind::Closure,
            invocation.name.clone(),
            site_arity(invocation.arity() + 1)?,
        );
        site.constant = invocation.constant;
        site.argument_names = names;
        self.invoke(site);
        Ok(())
    }

    fn emit_invocation(&mut self, invocation: &FunctionInvocation) -> CompileResult<()> {
        if invocation.anonymous {
            self.emit_closure_call(invocation)?;
        } else {
            match self.ctx.resolution.call_target(invocation.id) {
                CallTarget::Reference(reference) | CallTarget::ModuleState(reference) => {
                    self.emit_load(reference)?;
                    self.emit_closure_call(invocation)?;
                }
                CallTarget::Function => {
                    let names = self.emit_arguments(&invocation.name, &invocation.arguments)?;
                    let mut site = CallSite::new(
                        CallKind::Function,
                        invocation.name.clone(),
                        site_arity(invocation.arity())?,
                    );
                    site.constant = invocation.constant;
                    site.argument_names = names;
                    self.invoke(site);
                }
            }
        }
        self.emit_anonymous_calls(&invocation.anonymous_calls)
    }

    fn emit_anonymous_calls(&mut self, calls: &[FunctionInvocation]) -> CompileResult<()> {
        for call in calls {
            self.emit_closure_call(call)?;
        }
        Ok(())
    }

    /// Method call on the receiver already pushed
    fn emit_method(&mut self, invocation: &MethodInvocation) -> CompileResult<()> {
        let names = self.emit_arguments(&invocation.name, &invocation.arguments)?;
        let mut site = CallSite::new(
            CallKind::Method,
            invocation.name.clone(),
            site_arity(invocation.arity() + 1)?,
        );
        site.null_safe = invocation.null_safe;
        site.argument_names = names;
        self.invoke(site);
        self.emit_anonymous_calls(&invocation.anonymous_calls)
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> CompileResult<()> {
        match op {
            BinaryOp::And => self.emit_short_circuit(left, right, Opcode::JmpIfFalse),
            BinaryOp::Or => self.emit_short_circuit(left, right, Opcode::JmpIfTrue),
            op if op.is_method_call() => {
                self.emit_expr(left)?;
                self.emit_expr(right)
            }
            op => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.invoke(CallSite::new(CallKind::Operator, op.name(), 2));
                Ok(())
            }
        }
    }

    /// `and`/`or`: `shortcut` jumps to the early result as soon as it is known
    fn emit_short_circuit(&mut self, left: &Expr, right: &Expr, shortcut: Opcode) -> CompileResult<()> {
        let early = self.code.new_label();
        let exit = self.code.new_label();
        let (early_value, late_value) = if shortcut == Opcode::JmpIfFalse {
            (Opcode::ConstFalse, Opcode::ConstTrue)
        } else {
            (Opcode::ConstTrue, Opcode::ConstFalse)
        };

        self.emit_expr(left)?;
        self.code.emit_jump(shortcut, early);
        self.emit_expr(right)?;
        self.code.emit_jump(shortcut, early);
        self.code.emit(late_value);
        self.code.emit_jump(Opcode::Jmp, exit);
        self.code.bind(early);
        self.code.emit(early_value);
        self.code.bind(exit);
        Ok(())
    }

    fn emit_collection(&mut self, literal: &CollectionLiteral) -> CompileResult<()> {
        let size = literal_size(literal.items.len())?;
        match literal.kind {
            CollectionKind::Array => self.emit_array(&literal.items, size)?,
            CollectionKind::Tuple => {
                self.emit_array(&literal.items, size)?;
                self.code.emit(Opcode::NewTuple);
            }
            CollectionKind::List | CollectionKind::Set | CollectionKind::Vector => {
                match literal.kind {
                    CollectionKind::List => self.code.emit(Opcode::NewList),
                    CollectionKind::Set => self.code.emit(Opcode::NewSet),
                    _ => {
                        self.code.code().emit_const_i32(size);
                        self.code.emit(Opcode::NewVector);
                    }
                }
                for item in &literal.items {
                    self.code.emit(Opcode::Dup);
                    self.emit_expr(item)?;
                    self.code.emit(Opcode::CollectionAdd);
                }
            }
            CollectionKind::Map => {
                self.code.emit(Opcode::NewMap);
                for entry in &literal.items {
                    self.code.emit(Opcode::Dup);
                    self.emit_expr(entry)?;
                    self.code.emit(Opcode::Dup);
                    self.code.code().emit_const_i32(0);
                    self.code.emit(Opcode::TupleGet);
                    self.code.emit(Opcode::Swap);
                    self.code.code().emit_const_i32(1);
                    self.code.emit(Opcode::TupleGet);
                    self.code.emit(Opcode::MapPut);
                }
            }
        }
        Ok(())
    }

    fn emit_array(&mut self, items: &[Expr], size: i32) -> CompileResult<()> {
        self.code.code().emit_const_i32(size);
        self.code.emit(Opcode::NewArray);
        for (index, item) in items.iter().enumerate() {
            self.code.emit(Opcode::Dup);
            self.code.code().emit_const_i32(index as i32);
            self.emit_expr(item)?;
            self.code.emit(Opcode::StoreElem);
        }
        Ok(())
    }

    /// Push a handle on `target`, with `captured` bound to its leading parameters
    pub(super) fn emit_closure(&mut self, target: FunctionId, captured: &[RefId]) -> CompileResult<()> {
        let module = self.ctx.module;
        let function = module.function(target);
        let arity = site_arity(function.arity())?;
        let mut site = CallSite::new(CallKind::ClosureRef, function.name.clone(), 0);
        site.owner = Some(module.name.clone());
        site.target_arity = if function.varargs {
            arity.saturating_sub(1)
        } else {
            arity
        };
        site.varargs = function.varargs;
        self.invoke(site);

        if captured.is_empty() {
            return Ok(());
        }
        self.code.code().emit_const_i32(literal_size(captured.len())?);
        self.code.emit(Opcode::NewArray);
        for (index, &reference) in captured.iter().enumerate() {
            self.code.emit(Opcode::Dup);
            self.code.code().emit_const_i32(index as i32);
            self.emit_load(reference)?;
            self.code.emit(Opcode::StoreElem);
        }
        self.code.code().emit_bind_args(0);
        if function.varargs {
            self.code.emit(Opcode::AsVarargs);
        }
        Ok(())
    }
}
