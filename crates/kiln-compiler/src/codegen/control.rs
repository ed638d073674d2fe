//! Control flow lowering: conditionals, loops, loop control and try blocks
//!
//! Every construct is laid out with forward labels bound in
//! [`FunctionBuilder`](crate::module_builder::FunctionBuilder); handlers are
//! registered after the region they protect so that nested regions come
//! first in the exception table.

use super::FunctionEmitter;
use crate::error::{CompileError, CompileResult};
use crate::module_builder::Label;
use crate::options::LoopControlStyle;
use kiln_bytecode::Opcode;
use kiln_ir::{
    Conditional, ElseBranch, Loop, LoopControl, LoopControlKind, TryCatchFinally, TryKind,
};

/// Jump targets of a loop being emitted
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopLabels {
    /// Start of the post-statement, target of `continue`
    pub continue_point: Label,
    /// First instruction after the loop, target of `break`
    pub end: Label,
    /// Base stack depth of the loop body
    pub depth: u16,
}

impl<'a, 'u> FunctionEmitter<'a, 'u> {
    pub(super) fn emit_conditional(&mut self, conditional: &Conditional) -> CompileResult<()> {
        let otherwise = self.code.new_label();
        self.emit_expr(&conditional.condition)?;
        self.code.emit_jump(Opcode::JmpIfFalse, otherwise);
        self.emit_block(&conditional.then_block)?;

        match &conditional.otherwise {
            Some(branch) => {
                let exit = self.code.new_label();
                if !conditional.then_block.has_return() {
                    self.code.emit_jump(Opcode::Jmp, exit);
                }
                self.code.bind(otherwise);
                match branch {
                    ElseBranch::Block(block) => self.emit_block(block)?,
                    ElseBranch::If(nested) => self.emit_conditional(nested)?,
                }
                self.code.bind(exit);
            }
            None => self.code.bind(otherwise),
        }
        Ok(())
    }

    pub(super) fn emit_loop(&mut self, looping: &Loop) -> CompileResult<()> {
        let start = self.code.new_label();
        let continue_point = self.code.new_label();
        let end = self.code.new_label();

        if let Some(init) = &looping.init {
            self.emit_statement(init)?;
        }
        self.code.bind(start);
        if let Some(condition) = &looping.condition {
            self.emit_expr(condition)?;
            self.code.emit_jump(Opcode::JmpIfFalse, end);
        }

        self.loops.insert(
            looping.id,
            LoopLabels {
                continue_point,
                end,
                depth: self.base_depth,
            },
        );
        self.emit_block(&looping.body)?;
        self.loops.remove(&looping.id);

        self.code.bind(continue_point);
        if let Some(post) = &looping.post {
            self.emit_statement(post)?;
        }
        self.code.emit_jump(Opcode::Jmp, start);
        self.code.bind(end);
        Ok(())
    }

    pub(super) fn emit_loop_control(&mut self, control: &LoopControl) -> CompileResult<()> {
        let labels = self
            .ctx
            .resolution
            .enclosing_loop(control.id)
            .and_then(|id| self.loops.get(&id))
            .copied()
            .ok_or_else(|| CompileError::internal("loop control outside of an emitted loop"))?;

        // Values left by enclosing handlers since the loop was entered
        for _ in labels.depth..self.base_depth {
            self.code.emit(Opcode::Pop);
        }

        let target = match control.kind {
            LoopControlKind::Break => labels.end,
            LoopControlKind::Continue => labels.continue_point,
        };
        match self.ctx.options.loop_control {
            LoopControlStyle::Direct => self.code.emit_jump(Opcode::Jmp, target),
            LoopControlStyle::GuardedConstant => {
                self.code.emit(Opcode::ConstFalse);
                self.code.emit_jump(Opcode::JmpIfFalse, target);
            }
        }
        Ok(())
    }

    pub(super) fn emit_try(&mut self, statement: &TryCatchFinally) -> CompileResult<()> {
        let kind = statement.kind();
        if kind == TryKind::TryOnly {
            return self.emit_block(&statement.try_block);
        }

        let try_start = self.code.new_label();
        let try_end = self.code.new_label();
        let catch_start = self.code.new_label();
        let catch_end = self.code.new_label();

        self.code.bind(try_start);
        self.emit_block(&statement.try_block)?;
        if matches!(kind, TryKind::TryCatch | TryKind::TryCatchFinally) {
            self.code.emit_jump(Opcode::Jmp, catch_end);
        }
        self.code
            .add_handler(try_start, try_end, catch_start, self.base_depth);
        self.code.bind(try_end);

        if kind == TryKind::TryFinally {
            self.emit_finally(statement)?;
            self.code.emit_jump(Opcode::Jmp, catch_end);
        }

        self.code.bind(catch_start);
        match &statement.catch {
            Some(catch) => {
                let exception = self
                    .ctx
                    .module
                    .scope(catch.block.scope)
                    .get_owned(&catch.exception)
                    .ok_or_else(|| {
                        CompileError::internal(format!(
                            "catch block of `{}` declares no exception",
                            catch.exception
                        ))
                    })?;
                let slot = self.slot(exception)?;
                self.code.code().emit_store_local(slot);
                self.emit_block(&catch.block)?;
            }
            None => self.emit_rethrowing_finally(statement)?,
        }
        self.code.bind(catch_end);

        if kind == TryKind::TryCatchFinally {
            let rethrow_start = self.code.new_label();
            let rethrow_end = self.code.new_label();
            self.code
                .add_handler(catch_start, catch_end, rethrow_start, self.base_depth);
            self.emit_finally(statement)?;
            self.code.emit_jump(Opcode::Jmp, rethrow_end);
            self.code.bind(rethrow_start);
            self.emit_rethrowing_finally(statement)?;
            self.code.bind(rethrow_end);
        }
        Ok(())
    }

    fn emit_finally(&mut self, statement: &TryCatchFinally) -> CompileResult<()> {
        match &statement.finally {
            Some(block) => self.emit_block(block),
            None => Ok(()),
        }
    }

    /// Handler body: run the finally block over the pending exception, then rethrow it
    fn emit_rethrowing_finally(&mut self, statement: &TryCatchFinally) -> CompileResult<()> {
        self.base_depth += 1;
        let result = self.emit_finally(statement);
        self.base_depth -= 1;
        result?;
        self.code.emit(Opcode::Throw);
        Ok(())
    }
}
