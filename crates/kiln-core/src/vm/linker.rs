//! Call-site linking
//!
//! A site is linked the first time it executes and the link is cached on the
//! site. Method sites keep one link per receiver type. Sites flagged constant
//! cache their first result instead.
//!
//! Unqualified function names are searched in the calling unit, its module,
//! the module's `types` namespace, the unit's imports and finally
//! `kiln.Predefined`. Qualified names are tried as given, then relative to
//! each of those.

use super::interpreter::Vm;
use super::natives::{self, BuiltinFn, PREDEFINED};
use super::NativeFn;
use crate::value::{Callable, FunctionValue, Value};
use crate::{VmError, VmResult};
use kiln_bytecode::{string_hash, CallKind, CallSite, UnitKind};
use std::rc::Rc;
use thiserror::Error;

const EXTENSIONS: &str = "$extensions";
const EXTENSION_APPLICATIONS: &str = "$extensionApplications";

/// Linking errors
#[derive(Debug, Error)]
pub enum LinkError {
    /// No loaded unit has this name
    #[error("Unknown unit {0}")]
    UnknownUnit(String),

    /// A unit with this name is already loaded
    #[error("Unit {0} is already loaded")]
    DuplicateUnit(String),

    /// No function matched a function site
    #[error("No function {name}/{arity} visible from {from}")]
    NoSuchFunction {
        /// Name as written at the site
        name: String,
        /// Argument count
        arity: usize,
        /// Calling unit
        from: String,
    },

    /// No method matched a method site
    #[error("No method {name}/{arity} on {receiver}")]
    NoSuchMethod {
        /// Method name
        name: String,
        /// Argument count, receiver included
        arity: usize,
        /// Receiver type
        receiver: String,
    },

    /// The matched function is private to another module
    #[error("Function {name} of {unit} is not visible from {from}")]
    NotVisible {
        /// Function name
        name: String,
        /// Unit defining it
        unit: String,
        /// Calling unit
        from: String,
    },
}

/// Resolved target of a call site
#[derive(Clone)]
pub(crate) enum Link {
    Code { unit: usize, function: usize },
    Native(NativeFn),
    Builtin(BuiltinFn),
    /// Call through a function value, such as a decorated function
    Value(Value),
    Constant(Value),
}

fn extension_unit(module: &str, target: &str) -> String {
    format!("{}${}", module, target.replace('.', "$"))
}

fn string_items(value: &Value) -> Vec<String> {
    value
        .elements()
        .unwrap_or_default()
        .iter()
        .filter_map(|item| item.as_str().map(str::to_string))
        .collect()
}

/// Reorder named arguments and collect trailing ones for a varargs target
///
/// Named arguments follow any leading positional ones (a receiver or bound
/// captures) and are matched against the remaining parameter names.
pub(crate) fn prepare_arguments(
    name: &str,
    parameters: &[String],
    varargs: bool,
    mut args: Vec<Value>,
    names: &[String],
) -> VmResult<Vec<Value>> {
    if !names.is_empty() {
        let leading = args.len().saturating_sub(names.len());
        let named = args.split_off(leading);
        for parameter in parameters.iter().skip(leading) {
            let position = names.iter().position(|n| n == parameter).ok_or_else(|| {
                VmError::TypeError(format!("missing argument {} in call to {}", parameter, name))
            })?;
            args.push(named[position].clone());
        }
    }

    let arity = parameters.len();
    if varargs && arity > 0 {
        let fixed = arity - 1;
        let already_packed = args.len() == arity && matches!(args.last(), Some(Value::Array(_)));
        if !already_packed && args.len() >= fixed {
            let rest = args.split_off(fixed);
            args.push(Value::array(rest));
        }
    }

    if args.len() != arity {
        return Err(VmError::TypeError(format!(
            "{} expects {} arguments, got {}",
            name,
            arity,
            args.len()
        )));
    }
    Ok(args)
}

impl Vm {
    /// Module unit `unit` belongs to
    pub(super) fn module_root(&self, unit: usize) -> usize {
        let mut current = unit;
        for _ in 0..self.units.len() {
            let code = &self.units[current].code;
            if code.kind == UnitKind::Module {
                break;
            }
            match code.outer.as_ref().and_then(|outer| self.unit_index.get(outer)) {
                Some(&outer) => current = outer,
                None => break,
            }
        }
        current
    }

    /// Function `name` of `unit` taking `arity` arguments
    ///
    /// An exact match wins over a varargs function able to collect them.
    pub(super) fn find_function(&self, unit: usize, name: &str, arity: usize) -> Option<usize> {
        let code = &self.units[unit].code;
        code.find_function(name, arity).or_else(|| {
            code.functions
                .iter()
                .position(|f| f.name == name && f.varargs && f.arity() <= arity + 1)
        })
    }

    fn search_path(&self, unit: usize) -> Vec<String> {
        let code = &self.units[unit].code;
        let root = self.module_root(unit);
        let module = &self.units[root].code.name;

        let mut path = vec![code.name.clone()];
        if root != unit {
            path.push(module.clone());
        }
        path.push(format!("{}.types", module));
        path.extend(code.imports.iter().cloned());
        path.push(PREDEFINED.to_string());
        path
    }

    fn check_visible(&self, from: usize, target: usize, function: usize) -> VmResult<()> {
        let def = &self.units[target].code.functions[function];
        if def.flags.public || self.module_root(from) == self.module_root(target) {
            return Ok(());
        }
        Err(LinkError::NotVisible {
            name: def.name.clone(),
            unit: self.units[target].code.name.clone(),
            from: self.units[from].code.name.clone(),
        }
        .into())
    }

    /// A handle calling `function` of `unit` with no bound arguments
    pub(super) fn handle_on(&self, unit: usize, function: usize) -> Value {
        let def = &self.units[unit].code.functions[function];
        Value::Function(Rc::new(FunctionValue {
            target: Callable::Code { unit, function },
            name: Rc::from(def.name.as_str()),
            bound: Vec::new(),
            varargs: def.varargs,
        }))
    }

    /// Link to a function, going through its decorator when it has one
    fn code_link(&mut self, unit: usize, function: usize) -> VmResult<Link> {
        let code = Rc::clone(&self.units[unit].code);
        let def = &code.functions[function];
        let Some(decorator) = &def.decorated_by else {
            return Ok(Link::Code { unit, function });
        };
        let factory = self.find_function(unit, decorator, 0).ok_or_else(|| {
            LinkError::NoSuchFunction {
                name: decorator.clone(),
                arity: 0,
                from: code.name.clone(),
            }
        })?;
        let decorator = self.invoke_code(unit, factory, Vec::new(), &[])?;
        let wrapped = self.call_value(&decorator, vec![self.handle_on(unit, function)], &[])?;
        tracing::trace!(function = %def.name, unit = %code.name, "decorated function linked");
        Ok(Link::Value(wrapped))
    }

    fn link_function(&mut self, unit: usize, site: &CallSite) -> VmResult<Link> {
        let (qualifier, simple) = match site.name.rsplit_once('.') {
            Some((qualifier, simple)) => (Some(qualifier), simple),
            None => (None, site.name.as_str()),
        };
        let path = self.search_path(unit);
        let candidates: Vec<String> = match qualifier {
            Some(qualifier) => std::iter::once(qualifier.to_string())
                .chain(path.iter().map(|prefix| format!("{}.{}", prefix, qualifier)))
                .collect(),
            None => path,
        };

        let arity = site.arity as usize;
        for candidate in &candidates {
            if let Some(&target) = self.unit_index.get(candidate) {
                if let Some(function) = self.find_function(target, simple, arity) {
                    self.check_visible(unit, target, function)?;
                    return self.code_link(target, function);
                }
            }
            if let Some(native) = self.natives.get(&format!("{}.{}", candidate, simple)) {
                return Ok(Link::Native(Rc::clone(native)));
            }
            let nested = [
                format!("{}.{}", candidate, simple),
                format!("{}.types.{}", candidate, simple),
            ];
            let constructor = nested
                .iter()
                .find_map(|name| self.struct_unit(name))
                .and_then(|target| Some((target, self.find_function(target, simple, arity)?)));
            if let Some((target, function)) = constructor {
                return self.code_link(target, function);
            }
        }

        let from = self.units[unit].code.name.clone();
        tracing::warn!(site = %site.name, arity, unit = %from, "unresolved function call");
        Err(LinkError::NoSuchFunction {
            name: site.name.clone(),
            arity,
            from,
        }
        .into())
    }

    fn metadata_strings(&mut self, unit: usize, name: &str, args: Vec<Value>) -> VmResult<Vec<String>> {
        match self.units[unit].code.find_function(name, args.len()) {
            Some(function) => Ok(string_items(&self.invoke_code(unit, function, args, &[])?)),
            None => Ok(Vec::new()),
        }
    }

    /// Index of the struct unit named `name`
    fn struct_unit(&self, name: &str) -> Option<usize> {
        self.unit_index
            .get(name)
            .copied()
            .filter(|&index| self.units[index].code.kind == UnitKind::Struct)
    }

    fn unit_function(&self, unit: &str, name: &str, arity: usize) -> Option<Link> {
        let &target = self.unit_index.get(unit)?;
        let function = self.find_function(target, name, arity)?;
        Some(Link::Code {
            unit: target,
            function,
        })
    }

    /// Extension methods visible from `unit` for the receiver types
    fn find_extension(
        &mut self,
        unit: usize,
        types: &[String],
        name: &str,
        arity: usize,
    ) -> VmResult<Option<Link>> {
        let root = self.module_root(unit);
        let mut modules = vec![self.units[root].code.name.clone()];
        for import in self.units[unit].code.imports.iter().chain(&self.units[root].code.imports) {
            if !modules.contains(import) {
                modules.push(import.clone());
            }
        }

        for module in &modules {
            let Some(&index) = self.unit_index.get(module) else {
                continue;
            };
            if self.units[index].code.kind != UnitKind::Module {
                continue;
            }
            let extended = self.metadata_strings(index, EXTENSIONS, Vec::new())?;
            for type_name in types {
                if extended.contains(type_name) {
                    if let Some(link) = self.unit_function(&extension_unit(module, type_name), name, arity) {
                        return Ok(Some(link));
                    }
                }
                let hash = Value::I32(string_hash(type_name));
                for group in self.metadata_strings(index, EXTENSION_APPLICATIONS, vec![hash])? {
                    if let Some(link) = self.unit_function(&extension_unit(module, &group), name, arity) {
                        return Ok(Some(link));
                    }
                }
            }
        }
        Ok(None)
    }

    fn link_method(&mut self, unit: usize, site: &CallSite, receiver: &Value) -> VmResult<Link> {
        let arity = site.arity as usize;
        let mut types = vec![receiver.type_name().to_string()];
        if let Value::Variant(variant) = receiver {
            if let Some(link) = self.unit_function(&variant.name, &site.name, arity) {
                return Ok(link);
            }
            let outer = self
                .unit_index
                .get(&*variant.name)
                .and_then(|&index| self.units[index].code.outer.clone());
            types.extend(outer);
        }
        if let Value::Struct(instance) = receiver {
            if let Some(target) = self.struct_unit(&instance.name) {
                if let Some(function) = self.find_function(target, &site.name, arity) {
                    self.check_visible(unit, target, function)?;
                    return Ok(Link::Code { unit: target, function });
                }
            }
        }

        if let Some(link) = self.find_extension(unit, &types, &site.name, arity)? {
            return Ok(link);
        }
        if let Some(method) = natives::builtin_method(receiver, &site.name, arity) {
            return Ok(Link::Builtin(method));
        }

        tracing::warn!(method = %site.name, arity, receiver = %types[0], "unresolved method call");
        Err(LinkError::NoSuchMethod {
            name: site.name.clone(),
            arity,
            receiver: types.swap_remove(0),
        }
        .into())
    }

    fn link_closure_ref(&mut self, unit: usize, site: &CallSite) -> VmResult<Link> {
        let owner = site.owner.as_deref().unwrap_or(&self.units[unit].code.name);
        let target = *self
            .unit_index
            .get(owner)
            .ok_or_else(|| LinkError::UnknownUnit(owner.to_string()))?;
        let code = &self.units[target].code;
        let expected = site.target_arity as usize + usize::from(site.varargs);
        let function = code
            .functions
            .iter()
            .position(|f| f.name == site.name && f.arity() == expected && f.varargs == site.varargs)
            .ok_or_else(|| LinkError::NoSuchFunction {
                name: site.name.clone(),
                arity: expected,
                from: code.name.clone(),
            })?;
        Ok(Link::Constant(self.handle_on(target, function)))
    }

    /// Run a linked target
    pub(super) fn call_link(&mut self, link: &Link, args: Vec<Value>, names: &[String]) -> VmResult<Value> {
        match link {
            Link::Code { unit, function } => self.invoke_code(*unit, *function, args, names),
            Link::Native(native) => native(self, &args),
            Link::Builtin(method) => method(&args),
            Link::Value(callee) => self.call_value(callee, args, names),
            Link::Constant(value) => Ok(value.clone()),
        }
    }

    /// Call a function value with `args` after its bound arguments
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>, names: &[String]) -> VmResult<Value> {
        let Value::Function(handle) = callee else {
            return Err(VmError::TypeError(format!("{} is not a function", callee.type_name())));
        };
        let mut all = handle.bound.clone();
        all.extend(args);
        match &handle.target {
            Callable::Code { unit, function } => {
                let code = Rc::clone(&self.units[*unit].code);
                let def = code.functions.get(*function).ok_or_else(|| {
                    VmError::RuntimeError(format!("bad function index {}", function))
                })?;
                let all = prepare_arguments(&def.name, &def.parameters, handle.varargs, all, names)?;
                self.run_function(*unit, *function, all)
            }
            Callable::Native(name) => {
                let native = self.natives.get(&**name).cloned().ok_or_else(|| {
                    LinkError::NoSuchFunction {
                        name: name.to_string(),
                        arity: all.len(),
                        from: PREDEFINED.to_string(),
                    }
                })?;
                native(self, &all)
            }
        }
    }

    pub(super) fn invoke_function_site(
        &mut self,
        unit: usize,
        index: u32,
        site: &CallSite,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        let link = match &self.units[unit].links[index as usize] {
            Some(link) => link.clone(),
            None => {
                let link = self.link_function(unit, site)?;
                self.units[unit].links[index as usize] = Some(link.clone());
                link
            }
        };
        let result = self.call_link(&link, args, &site.argument_names)?;
        if site.constant {
            self.units[unit].links[index as usize] = Some(Link::Constant(result.clone()));
        }
        Ok(result)
    }

    pub(super) fn invoke_method_site(
        &mut self,
        unit: usize,
        index: u32,
        site: &CallSite,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        let receiver = args.first().cloned().ok_or(VmError::StackUnderflow)?;
        if receiver.is_null() {
            return if site.null_safe {
                Ok(Value::Null)
            } else {
                Err(VmError::NullPointer)
            };
        }

        let key = (index, receiver.type_name().to_string());
        let link = match self.units[unit].method_links.get(&key) {
            Some(link) => link.clone(),
            None => {
                let link = self.link_method(unit, site, &receiver)?;
                self.units[unit].method_links.insert(key, link.clone());
                link
            }
        };
        self.call_link(&link, args, &site.argument_names)
    }

    pub(super) fn invoke_closure_site(
        &mut self,
        unit: usize,
        index: u32,
        site: &CallSite,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        if let Some(Link::Constant(value)) = &self.units[unit].links[index as usize] {
            return Ok(value.clone());
        }
        let mut args = args.into_iter();
        let callee = args.next().ok_or(VmError::StackUnderflow)?;
        let result = self.call_value(&callee, args.collect(), &site.argument_names)?;
        if site.constant {
            self.units[unit].links[index as usize] = Some(Link::Constant(result.clone()));
        }
        Ok(result)
    }

    /// `ClassRef` and `ClosureRef` sites
    pub(super) fn invoke_reference_site(&mut self, unit: usize, index: u32, site: &CallSite) -> VmResult<Value> {
        if let Some(Link::Constant(value)) = &self.units[unit].links[index as usize] {
            return Ok(value.clone());
        }
        let link = match site.kind {
            CallKind::ClosureRef => self.link_closure_ref(unit, site)?,
            _ => Link::Constant(Value::Type(Rc::from(site.name.as_str()))),
        };
        let value = self.call_link(&link, Vec::new(), &[])?;
        self.units[unit].links[index as usize] = Some(link);
        Ok(value)
    }
}
