//! Builders for code units and function bodies

use crate::error::{CompileError, CompileResult};
use kiln_bytecode::{
    BytecodeWriter, CallSite, CodeUnit, ExceptionEntry, FunctionDef, LineEntry, LocalVariable,
    Opcode, UnitKind,
};

/// Helper for building a code unit
pub struct UnitBuilder {
    unit: CodeUnit,
}

impl UnitBuilder {
    pub fn new(name: impl Into<String>, kind: UnitKind, source_file: Option<String>) -> Self {
        let mut unit = CodeUnit::new(name, kind);
        unit.source_file = source_file;
        Self { unit }
    }

    pub fn name(&self) -> &str {
        &self.unit.name
    }

    /// Intern a string constant, returning its pool index
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.unit.constants.add_string(s)
    }

    /// Register a call site, returning its index
    pub fn add_call_site(&mut self, site: CallSite) -> u32 {
        self.unit.add_call_site(site)
    }

    /// Declare a module-state global, returning its index
    pub fn add_global(&mut self, name: &str) -> CompileResult<u16> {
        let index = u16::try_from(self.unit.globals.len())
            .map_err(|_| CompileError::internal("too many module-state globals"))?;
        self.unit.globals.push(name.to_string());
        Ok(index)
    }

    pub fn add_function(&mut self, function: FunctionDef) {
        self.unit.functions.push(function);
    }

    pub fn set_outer(&mut self, outer: impl Into<String>) {
        self.unit.outer = Some(outer.into());
    }

    pub fn add_inner(&mut self, inner: impl Into<String>) {
        self.unit.inner.push(inner.into());
    }

    pub fn set_members(&mut self, members: Vec<String>) {
        self.unit.members = members;
    }

    pub fn set_imports(&mut self, imports: Vec<String>) {
        self.unit.imports = imports;
    }

    pub fn set_extension_target(&mut self, target: impl Into<String>) {
        self.unit.extension_target = Some(target.into());
    }

    pub fn build(self) -> CodeUnit {
        self.unit
    }
}

/// A jump target, bound to an offset at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// A 32-bit relative offset waiting for its label
struct Fixup {
    /// Where the offset is written
    operand: usize,
    /// Offset of the instruction the jump is relative to
    base: usize,
    label: Label,
}

struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    stack_depth: u16,
}

/// Helper for building function bytecode
///
/// Jumps, switch cases and exception ranges refer to labels; offsets are
/// patched in [`FunctionBuilder::finish`].
pub struct FunctionBuilder {
    def: FunctionDef,
    code: BytecodeWriter,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    handlers: Vec<PendingHandler>,
    debug_info: bool,
}

impl FunctionBuilder {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<String>,
        debug_info: bool,
    ) -> CompileResult<Self> {
        if parameters.len() > u16::MAX as usize {
            return Err(CompileError::TooManyLocals);
        }
        Ok(Self {
            def: FunctionDef::new(name, parameters),
            code: BytecodeWriter::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            debug_info,
        })
    }

    /// Function header (flags, varargs, frame size)
    pub fn def_mut(&mut self) -> &mut FunctionDef {
        &mut self.def
    }

    /// Get the instruction writer
    pub fn code(&mut self) -> &mut BytecodeWriter {
        &mut self.code
    }

    /// Get current code position
    pub fn position(&self) -> usize {
        self.code.offset()
    }

    /// Emit an operand-less opcode
    pub fn emit(&mut self, opcode: Opcode) {
        self.code.emit_opcode(opcode);
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current position
    pub fn bind(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.code.offset());
        }
    }

    /// Emit `JMP`, `JMP_IF_FALSE` or `JMP_IF_TRUE` to a label
    pub fn emit_jump(&mut self, opcode: Opcode, label: Label) {
        let base = self.code.offset();
        self.code.emit_opcode(opcode);
        let operand = self.code.reserve_i32();
        self.fixups.push(Fixup {
            operand,
            base,
            label,
        });
    }

    /// Emit a `LOOKUP_SWITCH`; `cases` must be sorted by key
    pub fn emit_lookup_switch(&mut self, default: Label, cases: &[(i32, Label)]) {
        let base = self.code.offset();
        self.code.emit_opcode(Opcode::LookupSwitch);
        let operand = self.code.reserve_i32();
        self.fixups.push(Fixup {
            operand,
            base,
            label: default,
        });
        self.code.emit_u32(cases.len() as u32);
        for &(key, label) in cases {
            self.code.emit_i32(key);
            let operand = self.code.reserve_i32();
            self.fixups.push(Fixup {
                operand,
                base,
                label,
            });
        }
    }

    /// Protect `[start, end)` with a catch-all handler
    ///
    /// Entries keep registration order, so inner regions must be added first.
    /// An empty range is dropped when the function is finished.
    pub fn add_handler(&mut self, start: Label, end: Label, handler: Label, stack_depth: u16) {
        self.handlers.push(PendingHandler {
            start,
            end,
            handler,
            stack_depth,
        });
    }

    /// Attribute the code emitted from here on to a source line
    pub fn mark_line(&mut self, line: u32) {
        if !self.debug_info || line == 0 {
            return;
        }
        let offset = self.code.offset() as u32;
        match self.def.lines.last_mut() {
            Some(last) if last.line == line => {}
            Some(last) if last.offset == offset => last.line = line,
            _ => self.def.lines.push(LineEntry { offset, line }),
        }
    }

    /// Record the live range of a named slot
    pub fn add_local(&mut self, name: &str, slot: u16, start: usize, end: usize) {
        if !self.debug_info {
            return;
        }
        self.def.locals.push(LocalVariable {
            name: name.to_string(),
            slot,
            start: start as u32,
            end: end as u32,
        });
    }

    fn resolve(&self, label: Label) -> CompileResult<usize> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| {
                CompileError::internal(format!(
                    "unbound label {} in `{}`",
                    label.0, self.def.name
                ))
            })
    }

    /// Patch jumps and handlers, returning the finished function
    pub fn finish(mut self) -> CompileResult<FunctionDef> {
        if self.code.offset() > i32::MAX as usize {
            return Err(CompileError::JumpTooLarge);
        }

        let mut patches = Vec::with_capacity(self.fixups.len());
        for fixup in &self.fixups {
            let target = self.resolve(fixup.label)?;
            let relative = i32::try_from(target as i64 - fixup.base as i64)
                .map_err(|_| CompileError::JumpTooLarge)?;
            patches.push((fixup.operand, relative));
        }
        for (operand, relative) in patches {
            self.code.patch_i32(operand, relative);
        }

        let mut table = Vec::with_capacity(self.handlers.len());
        for pending in &self.handlers {
            let start = self.resolve(pending.start)?;
            let end = self.resolve(pending.end)?;
            if start >= end {
                continue;
            }
            table.push(ExceptionEntry {
                start: start as u32,
                end: end as u32,
                handler: self.resolve(pending.handler)? as u32,
                stack_depth: pending.stack_depth,
            });
        }

        let mut def = self.def;
        def.exception_table = table;
        def.code = self.code.into_bytes();
        Ok(def)
    }
}
