//! Bytecode interpreter
//!
//! Every call runs in its own [`Frame`]; nested calls recurse through
//! [`Vm::run_function`], bounded by [`VmOptions::max_call_depth`]. Errors
//! unwind frame by frame. A frame whose exception table covers the failing
//! instruction catches it: the operand stack is truncated to the entry's
//! depth, the exception value pushed and execution resumes at the handler.

use super::linker::{prepare_arguments, Link, LinkError};
use super::{natives, operators};
use crate::stack::Stack;
use crate::value::{Callable, FunctionValue, StructValue, Value, VariantValue};
use crate::{VmError, VmResult};
use kiln_bytecode::{BytecodeReader, CallKind, CodeUnit, FunctionDef, Opcode};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Host function callable from code units
pub type NativeFn = Rc<dyn Fn(&mut Vm, &[Value]) -> VmResult<Value>>;

/// Interpreter limits
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum nesting of calls
    pub max_call_depth: usize,
    /// Maximum operand stack size of one frame
    pub max_stack_size: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 128,
            max_stack_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InitState {
    Pending,
    Running,
    Done,
}

pub(super) struct LoadedUnit {
    pub(super) code: Rc<CodeUnit>,
    pub(super) globals: Vec<Value>,
    pub(super) links: Vec<Option<Link>>,
    pub(super) method_links: FxHashMap<(u32, String), Link>,
    pub(super) init: InitState,
}

struct Frame {
    ip: usize,
    locals: Vec<Value>,
    stack: Stack,
}

enum Flow {
    Next,
    Return(Value),
}

/// Kiln virtual machine
pub struct Vm {
    options: VmOptions,
    pub(super) units: Vec<LoadedUnit>,
    pub(super) unit_index: FxHashMap<String, usize>,
    pub(super) natives: FxHashMap<String, NativeFn>,
    output: String,
    depth: usize,
}

impl Vm {
    /// Create a VM with the predefined natives registered
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a VM with custom limits
    pub fn with_options(options: VmOptions) -> Self {
        let mut vm = Self {
            options,
            units: Vec::new(),
            unit_index: FxHashMap::default(),
            natives: FxHashMap::default(),
            output: String::new(),
            depth: 0,
        };
        natives::register_predefined(&mut vm);
        vm
    }

    /// Register a native under its qualified name (`unit.function`)
    pub fn register_native<F>(&mut self, name: &str, native: F)
    where
        F: Fn(&mut Vm, &[Value]) -> VmResult<Value> + 'static,
    {
        self.natives.insert(name.to_string(), Rc::new(native));
    }

    /// Decode and load an encoded unit
    pub fn load(&mut self, bytes: &[u8]) -> VmResult<()> {
        let unit = CodeUnit::decode(bytes)?;
        self.load_unit(unit)
    }

    /// Load several encoded units
    pub fn load_all<'b>(&mut self, units: impl IntoIterator<Item = &'b [u8]>) -> VmResult<()> {
        units.into_iter().try_for_each(|bytes| self.load(bytes))
    }

    /// Load a decoded unit
    pub fn load_unit(&mut self, unit: CodeUnit) -> VmResult<()> {
        if self.unit_index.contains_key(&unit.name) {
            return Err(LinkError::DuplicateUnit(unit.name).into());
        }
        tracing::debug!(unit = %unit.name, functions = unit.functions.len(), "unit loaded");
        let index = self.units.len();
        self.unit_index.insert(unit.name.clone(), index);
        self.units.push(LoadedUnit {
            globals: vec![Value::Null; unit.globals.len()],
            links: vec![None; unit.call_sites.len()],
            method_links: FxHashMap::default(),
            init: InitState::Pending,
            code: Rc::new(unit),
        });
        Ok(())
    }

    /// Whether a unit named `name` is loaded
    pub fn has_unit(&self, name: &str) -> bool {
        self.unit_index.contains_key(name)
    }

    /// Text printed so far by `println` and `print`
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Take the printed text, leaving the buffer empty
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Current value of module state `name` of `unit`
    pub fn global(&self, unit: &str, name: &str) -> Option<Value> {
        let loaded = &self.units[*self.unit_index.get(unit)?];
        let index = loaded.code.globals.iter().position(|g| g == name)?;
        loaded.globals.get(index).cloned()
    }

    fn unit(&self, name: &str) -> VmResult<usize> {
        self.unit_index
            .get(name)
            .copied()
            .ok_or_else(|| LinkError::UnknownUnit(name.to_string()).into())
    }

    /// Call function `function` of `unit` with `args`
    #[tracing::instrument(level = "debug", skip(self, args))]
    pub fn call(&mut self, unit: &str, function: &str, args: Vec<Value>) -> VmResult<Value> {
        let index = self.unit(unit)?;
        let target = self.find_function(index, function, args.len()).ok_or_else(|| {
            LinkError::NoSuchFunction {
                name: function.to_string(),
                arity: args.len(),
                from: unit.to_string(),
            }
        })?;
        self.invoke_code(index, target, args, &[])
    }

    /// Run the entry point of `unit`, passing `args` when it takes them
    pub fn run_main(&mut self, unit: &str, args: &[&str]) -> VmResult<Value> {
        let index = self.unit(unit)?;
        let code = Rc::clone(&self.units[index].code);
        let main = code
            .functions
            .iter()
            .position(|f| f.flags.main)
            .ok_or_else(|| VmError::RuntimeError(format!("{} has no main function", unit)))?;
        let args = if code.functions[main].arity() == 1 {
            vec![Value::array(args.iter().map(|a| Value::str(a)).collect())]
        } else {
            Vec::new()
        };
        tracing::debug!(unit, "running main");
        self.run_function(index, main, args)
    }

    /// A handle on function `name` of `unit`, or on the native of that name
    pub fn function_handle(&self, unit: &str, name: &str) -> VmResult<Value> {
        if let Some(&index) = self.unit_index.get(unit) {
            if let Some(function) = self.units[index].code.functions.iter().position(|f| f.name == name) {
                return Ok(self.handle_on(index, function));
            }
        }
        let qualified = format!("{}.{}", unit, name);
        if self.natives.contains_key(&qualified) {
            return Ok(Value::Function(Rc::new(FunctionValue {
                target: Callable::Native(Rc::from(qualified.as_str())),
                name: Rc::from(name),
                bound: Vec::new(),
                varargs: true,
            })));
        }
        Err(LinkError::NoSuchFunction {
            name: name.to_string(),
            arity: 0,
            from: unit.to_string(),
        }
        .into())
    }

    /// Call with named-argument reordering and varargs collection
    pub(super) fn invoke_code(
        &mut self,
        unit: usize,
        function: usize,
        args: Vec<Value>,
        names: &[String],
    ) -> VmResult<Value> {
        let code = Rc::clone(&self.units[unit].code);
        let def = code
            .functions
            .get(function)
            .ok_or_else(|| VmError::RuntimeError(format!("bad function index {}", function)))?;
        let args = prepare_arguments(&def.name, &def.parameters, def.varargs, args, names)?;
        self.run_function(unit, function, args)
    }

    /// Run a function whose arguments are already in slot order
    pub(super) fn run_function(&mut self, unit: usize, function: usize, args: Vec<Value>) -> VmResult<Value> {
        self.ensure_initialized(unit)?;
        if self.depth >= self.options.max_call_depth {
            return Err(VmError::StackOverflow);
        }
        self.depth += 1;
        let result = self.execute(unit, function, args);
        self.depth -= 1;
        result
    }

    /// Run the module initializer of `unit`'s module on first use
    fn ensure_initialized(&mut self, unit: usize) -> VmResult<()> {
        let root = self.module_root(unit);
        if self.units[root].init != InitState::Pending {
            return Ok(());
        }
        self.units[root].init = InitState::Running;
        let initializer = self.units[root].code.functions.iter().position(|f| f.flags.module_init);
        let result = match initializer {
            Some(function) => {
                tracing::trace!(unit = %self.units[root].code.name, "running module initializer");
                self.run_function(root, function, Vec::new()).map(drop)
            }
            None => Ok(()),
        };
        self.units[root].init = InitState::Done;
        result
    }

    fn execute(&mut self, unit: usize, function: usize, args: Vec<Value>) -> VmResult<Value> {
        let code = Rc::clone(&self.units[unit].code);
        let def = code
            .functions
            .get(function)
            .ok_or_else(|| VmError::RuntimeError(format!("bad function index {}", function)))?;

        let mut locals = args;
        let frame_size = (def.max_locals as usize).max(locals.len());
        locals.resize(frame_size, Value::Null);
        let mut frame = Frame {
            ip: 0,
            locals,
            stack: Stack::with_capacity(self.options.max_stack_size),
        };

        loop {
            let start = frame.ip;
            match self.step(unit, &code, def, &mut frame) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(error) => {
                    let handler = error.to_exception().and_then(|exception| {
                        def.exception_table
                            .iter()
                            .find(|e| e.start as usize <= start && start < e.end as usize)
                            .map(|entry| (entry, exception))
                    });
                    let Some((entry, exception)) = handler else {
                        tracing::trace!(
                            function = %def.name,
                            line = ?def.line_at(start as u32),
                            %error,
                            "unwinding"
                        );
                        return Err(error);
                    };
                    frame.stack.truncate(entry.stack_depth as usize);
                    frame.stack.push(exception)?;
                    frame.ip = entry.handler as usize;
                }
            }
        }
    }

    fn step(&mut self, unit: usize, code: &CodeUnit, def: &FunctionDef, frame: &mut Frame) -> VmResult<Flow> {
        let start = frame.ip;
        let mut reader = BytecodeReader::new(&def.code);
        reader.seek(start);
        if !reader.has_more() {
            return Err(VmError::RuntimeError(format!(
                "fell off the end of {}",
                def.name
            )));
        }
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(VmError::InvalidOpcode(byte))?;

        let mut jump = None;
        match opcode {
            // Stack manipulation
            Opcode::Nop => {}
            Opcode::Pop => {
                frame.stack.pop()?;
            }
            Opcode::Dup => {
                let top = frame.stack.peek()?.clone();
                frame.stack.push(top)?;
            }
            Opcode::Swap => {
                let b = frame.stack.pop()?;
                let a = frame.stack.pop()?;
                frame.stack.push(b)?;
                frame.stack.push(a)?;
            }

            // Constants
            Opcode::ConstNull => frame.stack.push(Value::Null)?,
            Opcode::ConstTrue => frame.stack.push(Value::Bool(true))?,
            Opcode::ConstFalse => frame.stack.push(Value::Bool(false))?,
            Opcode::ConstI32 => frame.stack.push(Value::I32(reader.read_i32()?))?,
            Opcode::ConstI64 => frame.stack.push(Value::I64(reader.read_i64()?))?,
            Opcode::ConstF32 => frame.stack.push(Value::F32(reader.read_f32()?))?,
            Opcode::ConstF64 => frame.stack.push(Value::F64(reader.read_f64()?))?,
            Opcode::ConstChar => frame.stack.push(Value::Char(reader.read_char()?))?,
            Opcode::ConstStr => {
                let index = reader.read_u32()?;
                frame.stack.push(Value::str(constant(code, index)?))?;
            }

            // Locals and module state
            Opcode::LoadLocal => {
                let slot = reader.read_u16()? as usize;
                let value = frame.locals.get(slot).cloned().ok_or_else(|| bad_slot(slot))?;
                frame.stack.push(value)?;
            }
            Opcode::StoreLocal => {
                let slot = reader.read_u16()? as usize;
                let value = frame.stack.pop()?;
                *frame.locals.get_mut(slot).ok_or_else(|| bad_slot(slot))? = value;
            }
            Opcode::LoadGlobal => {
                let index = reader.read_u16()? as usize;
                let value = self.units[unit]
                    .globals
                    .get(index)
                    .cloned()
                    .ok_or_else(|| bad_global(index))?;
                frame.stack.push(value)?;
            }
            Opcode::StoreGlobal => {
                let index = reader.read_u16()? as usize;
                let value = frame.stack.pop()?;
                *self.units[unit]
                    .globals
                    .get_mut(index)
                    .ok_or_else(|| bad_global(index))? = value;
            }

            // Control flow
            Opcode::Jmp => jump = Some(reader.read_i32()?),
            Opcode::JmpIfFalse | Opcode::JmpIfTrue => {
                let offset = reader.read_i32()?;
                let condition = expect_bool(frame.stack.pop()?)?;
                if condition == (opcode == Opcode::JmpIfTrue) {
                    jump = Some(offset);
                }
            }
            Opcode::LookupSwitch => {
                let default = reader.read_i32()?;
                let count = reader.read_u32()?;
                let key = match frame.stack.pop()? {
                    Value::I32(key) => key,
                    other => {
                        return Err(VmError::TypeError(format!(
                            "switch on {}",
                            other.type_name()
                        )))
                    }
                };
                let mut target = default;
                for _ in 0..count {
                    let case = reader.read_i32()?;
                    let offset = reader.read_i32()?;
                    if case == key {
                        target = offset;
                    }
                }
                jump = Some(target);
            }

            // Calls, returns and exceptions
            Opcode::Invoke => {
                let index = reader.read_u32()?;
                self.op_invoke(unit, code, index, frame)?;
            }
            Opcode::Return => return Ok(Flow::Return(frame.stack.pop()?)),
            Opcode::ReturnVoid => return Ok(Flow::Return(Value::Null)),
            Opcode::Throw => return Err(VmError::Thrown(frame.stack.pop()?)),

            // Collections
            Opcode::NewArray => {
                let size = expect_size(frame.stack.pop()?)?;
                frame.stack.push(Value::array(vec![Value::Null; size]))?;
            }
            Opcode::StoreElem => {
                let value = frame.stack.pop()?;
                let index = frame.stack.pop()?;
                let array = frame.stack.pop()?;
                let items = match array {
                    Value::Array(items) => items,
                    other => {
                        return Err(VmError::TypeError(format!("store into {}", other.type_name())))
                    }
                };
                let mut items = items.borrow_mut();
                let len = items.len();
                let slot = index
                    .as_i32()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| out_of_bounds(&index, len))?;
                *slot = value;
            }
            Opcode::NewTuple => {
                let array = frame.stack.pop()?;
                let items = match array {
                    Value::Array(items) => items.borrow().clone(),
                    other => {
                        return Err(VmError::TypeError(format!("tuple from {}", other.type_name())))
                    }
                };
                frame.stack.push(Value::tuple(items))?;
            }
            Opcode::TupleGet => {
                let index = frame.stack.pop()?;
                let tuple = frame.stack.pop()?;
                let items = match &tuple {
                    Value::Tuple(_) | Value::Array(_) => tuple.elements().unwrap_or_default(),
                    other => {
                        return Err(VmError::TypeError(format!("index into {}", other.type_name())))
                    }
                };
                let value = index
                    .as_i32()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| out_of_bounds(&index, items.len()))?;
                frame.stack.push(value)?;
            }
            Opcode::NewList => frame.stack.push(Value::list(Vec::new()))?,
            Opcode::NewVector => {
                let capacity = expect_size(frame.stack.pop()?)?;
                frame
                    .stack
                    .push(Value::Vector(Rc::new(RefCell::new(Vec::with_capacity(capacity)))))?;
            }
            Opcode::NewSet => frame.stack.push(Value::Set(Rc::default()))?,
            Opcode::NewMap => frame.stack.push(Value::Map(Rc::default()))?,
            Opcode::CollectionAdd => {
                let value = frame.stack.pop()?;
                let collection = frame.stack.pop()?;
                match collection {
                    Value::List(items) | Value::Vector(items) => items.borrow_mut().push(value),
                    Value::Set(items) => {
                        let mut items = items.borrow_mut();
                        if !items.contains(&value) {
                            items.push(value);
                        }
                    }
                    other => {
                        return Err(VmError::TypeError(format!("add to {}", other.type_name())))
                    }
                }
            }
            Opcode::MapPut => {
                let value = frame.stack.pop()?;
                let key = frame.stack.pop()?;
                let map = frame.stack.pop()?;
                let entries = match map {
                    Value::Map(entries) => entries,
                    other => {
                        return Err(VmError::TypeError(format!("put into {}", other.type_name())))
                    }
                };
                natives::map_insert(&mut entries.borrow_mut(), key, value);
            }

            // Function handles
            Opcode::CastFunction => {
                let top = frame.stack.peek()?;
                if !matches!(top, Value::Function(_)) {
                    return Err(VmError::TypeError(format!(
                        "{} is not a function",
                        top.type_name()
                    )));
                }
            }
            Opcode::BindArgs => {
                let position = reader.read_u16()? as usize;
                let array = frame.stack.pop()?;
                let handle = expect_function(frame.stack.pop()?)?;
                let items = match array {
                    Value::Array(items) => items,
                    other => return Err(VmError::TypeError(format!("bind {}", other.type_name()))),
                };
                let mut bound = handle.bound.clone();
                let tail = bound.split_off(position.min(bound.len()));
                bound.extend(items.borrow().iter().cloned());
                bound.extend(tail);
                frame.stack.push(Value::Function(Rc::new(FunctionValue {
                    bound,
                    varargs: false,
                    ..(*handle).clone()
                })))?;
            }
            Opcode::AsVarargs => {
                let handle = expect_function(frame.stack.pop()?)?;
                frame.stack.push(Value::Function(Rc::new(FunctionValue {
                    varargs: true,
                    ..(*handle).clone()
                })))?;
            }

            // Algebraic values
            Opcode::NewVariant => {
                let name = reader.read_u32()?;
                let count = reader.read_u16()? as usize;
                let fields = frame.stack.pop_n(count)?;
                frame.stack.push(Value::Variant(Rc::new(VariantValue {
                    name: Rc::from(constant(code, name)?),
                    fields,
                })))?;
            }
            Opcode::GetField => {
                let index = reader.read_u16()? as usize;
                let value = match frame.stack.pop()? {
                    Value::Variant(variant) => variant.fields.get(index).cloned().ok_or_else(|| {
                        VmError::RuntimeError(format!("{} has no member {}", variant.name, index))
                    })?,
                    Value::Struct(instance) => {
                        instance.fields.borrow().get(index).cloned().ok_or_else(|| {
                            VmError::RuntimeError(format!("{} has no member {}", instance.name, index))
                        })?
                    }
                    other => {
                        return Err(VmError::TypeError(format!(
                            "member of {}",
                            other.type_name()
                        )))
                    }
                };
                frame.stack.push(value)?;
            }
            Opcode::NewStruct => {
                let count = reader.read_u16()? as usize;
                if count != code.members.len() {
                    return Err(VmError::RuntimeError(format!(
                        "{} has {} members, got {}",
                        code.name,
                        code.members.len(),
                        count
                    )));
                }
                let fields = frame.stack.pop_n(count)?;
                let members: Rc<[String]> = Rc::from(code.members.as_slice());
                frame.stack.push(Value::Struct(Rc::new(StructValue::new(
                    Rc::from(code.name.as_str()),
                    members,
                    fields,
                    false,
                ))))?;
            }
            Opcode::SetField => {
                let index = reader.read_u16()? as usize;
                let value = frame.stack.pop()?;
                let instance = match frame.stack.pop()? {
                    Value::Struct(instance) => instance,
                    other => {
                        return Err(VmError::TypeError(format!(
                            "member update on {}",
                            other.type_name()
                        )))
                    }
                };
                natives::store_member(&instance, index, value)?;
            }
        }

        frame.ip = match jump {
            Some(offset) => usize::try_from(start as i64 + offset as i64)
                .map_err(|_| VmError::RuntimeError(format!("jump before start of {}", def.name)))?,
            None => reader.position(),
        };
        Ok(Flow::Next)
    }

    /// INVOKE - Link (on first use) and call a site
    fn op_invoke(&mut self, unit: usize, code: &CodeUnit, index: u32, frame: &mut Frame) -> VmResult<()> {
        let site = code
            .call_sites
            .get(index as usize)
            .ok_or_else(|| VmError::RuntimeError(format!("bad call site {}", index)))?;
        let args = frame.stack.pop_n(site.arity as usize)?;
        let result = match site.kind {
            CallKind::Function => self.invoke_function_site(unit, index, site, args)?,
            CallKind::Method => self.invoke_method_site(unit, index, site, args)?,
            CallKind::Closure => self.invoke_closure_site(unit, index, site, args)?,
            CallKind::Operator => operators::apply(&site.name, &args)?,
            CallKind::ClassRef | CallKind::ClosureRef => self.invoke_reference_site(unit, index, site)?,
        };
        if !site.void {
            frame.stack.push(result)?;
        }
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn constant(code: &CodeUnit, index: u32) -> VmResult<&str> {
    code.constants
        .get_string(index)
        .ok_or_else(|| VmError::RuntimeError(format!("bad constant index {}", index)))
}

fn bad_slot(slot: usize) -> VmError {
    VmError::RuntimeError(format!("bad local slot {}", slot))
}

fn bad_global(index: usize) -> VmError {
    VmError::RuntimeError(format!("bad global index {}", index))
}

fn out_of_bounds(index: &Value, len: usize) -> VmError {
    VmError::RuntimeError(format!("Index {} out of bounds for length {}", index, len))
}

fn expect_bool(value: Value) -> VmResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| VmError::TypeError(format!("expected a boolean, got {}", value.type_name())))
}

fn expect_size(value: Value) -> VmResult<usize> {
    value
        .as_i32()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| VmError::RuntimeError(format!("invalid size {}", value)))
}

fn expect_function(value: Value) -> VmResult<Rc<FunctionValue>> {
    match value {
        Value::Function(handle) => Ok(handle),
        other => Err(VmError::TypeError(format!("{} is not a function", other.type_name()))),
    }
}
