//! `kiln.Predefined` natives and builtin methods of core values

use super::interpreter::Vm;
use crate::value::{StructValue, Value};
use std::rc::Rc;
use crate::{VmError, VmResult};

/// Unit name the predefined natives are registered under
pub const PREDEFINED: &str = "kiln.Predefined";

/// A method implemented by the runtime; `args[0]` is the receiver
pub(crate) type BuiltinFn = fn(&[Value]) -> VmResult<Value>;

pub(crate) fn register_predefined(vm: &mut Vm) {
    vm.register_native(&format!("{}.println", PREDEFINED), |vm, args| {
        let line = args.iter().map(Value::to_string).collect::<String>();
        vm.write_output(&line);
        vm.write_output("\n");
        Ok(Value::Null)
    });
    vm.register_native(&format!("{}.print", PREDEFINED), |vm, args| {
        let text = args.iter().map(Value::to_string).collect::<String>();
        vm.write_output(&text);
        Ok(Value::Null)
    });
    vm.register_native(&format!("{}.raise", PREDEFINED), |_, args| {
        let message = args.iter().map(Value::to_string).collect::<String>();
        Err(VmError::Thrown(Value::str(&message)))
    });
    vm.register_native(&format!("{}.fun", PREDEFINED), |vm, args| match args {
        [Value::Str(name), Value::Type(unit) | Value::Str(unit)] => {
            vm.function_handle(unit, name)
        }
        _ => Err(VmError::TypeError(
            "fun expects a function name and a module".to_string(),
        )),
    });
}

fn receiver_items(value: &Value) -> VmResult<Vec<Value>> {
    value
        .elements()
        .ok_or_else(|| VmError::TypeError(format!("{} is not a collection", value.type_name())))
}

fn string_arg<'v>(args: &'v [Value], index: usize) -> VmResult<&'v str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| VmError::TypeError("expected a string argument".to_string()))
}

fn index_arg(args: &[Value], index: usize, len: usize) -> VmResult<usize> {
    let raw = args
        .get(index)
        .and_then(Value::as_i32)
        .ok_or_else(|| VmError::TypeError("expected an integer index".to_string()))?;
    usize::try_from(raw)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| VmError::RuntimeError(format!("Index {} out of bounds for length {}", raw, len)))
}

fn size(args: &[Value]) -> VmResult<Value> {
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Map(entries) => entries.borrow().len(),
        other => receiver_items(other)?.len(),
    };
    Ok(Value::I32(len as i32))
}

fn is_empty(args: &[Value]) -> VmResult<Value> {
    Ok(Value::Bool(size(args)? == Value::I32(0)))
}

fn to_string(args: &[Value]) -> VmResult<Value> {
    Ok(Value::str(&args[0].to_string()))
}

fn get(args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::Map(entries) => Ok(entries
            .borrow()
            .iter()
            .find(|(key, _)| *key == args[1])
            .map(|(_, value)| value.clone())
            .unwrap_or_default()),
        other => {
            let items = receiver_items(other)?;
            let index = index_arg(args, 1, items.len())?;
            Ok(items[index].clone())
        }
    }
}

fn contains(args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Bool(s.contains(string_arg(args, 1)?))),
        Value::Map(entries) => Ok(Value::Bool(
            entries.borrow().iter().any(|(key, _)| *key == args[1]),
        )),
        other => Ok(Value::Bool(receiver_items(other)?.contains(&args[1]))),
    }
}

fn add(args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::List(items) | Value::Vector(items) => {
            items.borrow_mut().push(args[1].clone());
            Ok(Value::Bool(true))
        }
        Value::Set(items) => {
            let mut items = items.borrow_mut();
            if items.contains(&args[1]) {
                return Ok(Value::Bool(false));
            }
            items.push(args[1].clone());
            Ok(Value::Bool(true))
        }
        other => Err(VmError::TypeError(format!("cannot add to {}", other.type_name()))),
    }
}

fn append(args: &[Value]) -> VmResult<Value> {
    add(args)?;
    Ok(args[0].clone())
}

fn set(args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::Array(items) | Value::List(items) | Value::Vector(items) => {
            let mut items = items.borrow_mut();
            let index = index_arg(args, 1, items.len())?;
            Ok(std::mem::replace(&mut items[index], args[2].clone()))
        }
        other => Err(VmError::TypeError(format!("cannot set on {}", other.type_name()))),
    }
}

fn put(args: &[Value]) -> VmResult<Value> {
    let Value::Map(entries) = &args[0] else {
        return Err(VmError::TypeError(format!("cannot put on {}", args[0].type_name())));
    };
    Ok(map_insert(&mut entries.borrow_mut(), args[1].clone(), args[2].clone()))
}

/// Insert or replace `key`, returning the previous value or null
pub(crate) fn map_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) -> Value {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, slot)) => std::mem::replace(slot, value),
        None => {
            entries.push((key, value));
            Value::Null
        }
    }
}

/// Store `value` as member `index` of `instance`
pub(crate) fn store_member(instance: &StructValue, index: usize, value: Value) -> VmResult<()> {
    if instance.frozen {
        return Err(VmError::RuntimeError(format!("Frozen struct {} cannot be updated", instance.name)));
    }
    let mut fields = instance.fields.borrow_mut();
    let slot = fields
        .get_mut(index)
        .ok_or_else(|| VmError::RuntimeError(format!("{} has no member {}", instance.name, index)))?;
    *slot = value;
    Ok(())
}

fn struct_receiver(args: &[Value]) -> VmResult<&Rc<StructValue>> {
    match &args[0] {
        Value::Struct(instance) => Ok(instance),
        other => Err(VmError::TypeError(format!("{} is not a struct", other.type_name()))),
    }
}

fn public_member(instance: &StructValue, args: &[Value]) -> VmResult<usize> {
    let name = string_arg(args, 1)?;
    instance
        .member_index(name)
        .filter(|_| !name.starts_with('_'))
        .ok_or_else(|| VmError::RuntimeError(format!("{} has no public member {}", instance.name, name)))
}

fn struct_method(name: &str, arity: usize) -> Option<BuiltinFn> {
    let method: BuiltinFn = match (name, arity) {
        ("copy", 1) => |args| Ok(Value::Struct(Rc::new(struct_receiver(args)?.copy(false)))),
        ("frozenCopy", 1) => |args| Ok(Value::Struct(Rc::new(struct_receiver(args)?.copy(true)))),
        ("isFrozen", 1) => |args| Ok(Value::Bool(struct_receiver(args)?.frozen)),
        ("members", 1) => |args| {
            let names = struct_receiver(args)?
                .public_entries()
                .into_iter()
                .map(|(name, _)| Value::str(&name))
                .collect();
            Ok(Value::array(names))
        },
        ("values", 1) => |args| {
            let values = struct_receiver(args)?
                .public_entries()
                .into_iter()
                .map(|(_, value)| value)
                .collect();
            Ok(Value::array(values))
        },
        ("get", 2) => |args| {
            let instance = struct_receiver(args)?;
            let index = public_member(instance, args)?;
            let value = instance.fields.borrow()[index].clone();
            Ok(value)
        },
        ("set", 3) => |args| {
            let instance = struct_receiver(args)?;
            let index = public_member(instance, args)?;
            store_member(instance, index, args[2].clone())?;
            Ok(args[0].clone())
        },
        _ => return None,
    };
    Some(method)
}

fn string_method(name: &str, arity: usize) -> Option<BuiltinFn> {
    let method: BuiltinFn = match (name, arity) {
        ("length", 1) => size,
        ("toUpperCase", 1) => |args| Ok(Value::str(&string_arg(args, 0)?.to_uppercase())),
        ("toLowerCase", 1) => |args| Ok(Value::str(&string_arg(args, 0)?.to_lowercase())),
        ("trim", 1) => |args| Ok(Value::str(string_arg(args, 0)?.trim())),
        ("startsWith", 2) => {
            |args| Ok(Value::Bool(string_arg(args, 0)?.starts_with(string_arg(args, 1)?)))
        }
        ("endsWith", 2) => {
            |args| Ok(Value::Bool(string_arg(args, 0)?.ends_with(string_arg(args, 1)?)))
        }
        ("charAt", 2) => |args| {
            let chars: Vec<char> = string_arg(args, 0)?.chars().collect();
            let index = index_arg(args, 1, chars.len())?;
            Ok(Value::Char(chars[index]))
        },
        ("split", 2) => |args| {
            let parts = string_arg(args, 0)?
                .split(string_arg(args, 1)?)
                .map(Value::str)
                .collect();
            Ok(Value::array(parts))
        },
        ("contains", 2) => contains,
        ("isEmpty", 1) => is_empty,
        _ => return None,
    };
    Some(method)
}

fn collection_method(receiver: &Value, name: &str, arity: usize) -> Option<BuiltinFn> {
    let growable = matches!(receiver, Value::List(_) | Value::Vector(_) | Value::Set(_));
    let indexed = matches!(
        receiver,
        Value::Array(_) | Value::List(_) | Value::Vector(_) | Value::Tuple(_)
    );
    let method: BuiltinFn = match (name, arity) {
        ("size" | "length", 1) => size,
        ("isEmpty", 1) => is_empty,
        ("contains", 2) => contains,
        ("get", 2) if indexed => get,
        ("set", 3) if indexed && !matches!(receiver, Value::Tuple(_)) => set,
        ("add", 2) if growable => add,
        ("append", 2) if growable => append,
        _ => return None,
    };
    Some(method)
}

fn map_method(name: &str, arity: usize) -> Option<BuiltinFn> {
    let method: BuiltinFn = match (name, arity) {
        ("size", 1) => size,
        ("isEmpty", 1) => is_empty,
        ("get", 2) => get,
        ("put", 3) => put,
        ("containsKey", 2) => contains,
        _ => return None,
    };
    Some(method)
}

/// Runtime-provided method `name` of `receiver`, if any
pub(crate) fn builtin_method(receiver: &Value, name: &str, arity: usize) -> Option<BuiltinFn> {
    let specific = match receiver {
        Value::Str(_) => string_method(name, arity),
        Value::Map(_) => map_method(name, arity),
        Value::Struct(_) => struct_method(name, arity),
        Value::Array(_) | Value::Tuple(_) | Value::List(_) | Value::Vector(_) | Value::Set(_) => {
            collection_method(receiver, name, arity)
        }
        _ => None,
    };
    specific.or(match (name, arity) {
        ("toString", 1) => Some(to_string as BuiltinFn),
        _ => None,
    })
}
