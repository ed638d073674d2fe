//! Operator call sites
//!
//! Numeric operands are promoted along `Integer < Long < Float < Double`
//! before the operation. Integer arithmetic wraps.

use crate::value::Value;
use crate::{VmError, VmResult};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
enum Num {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::I32(i) => Some(Num::I32(*i)),
            Value::I64(i) => Some(Num::I64(*i)),
            Value::F32(x) => Some(Num::F32(*x)),
            Value::F64(x) => Some(Num::F64(*x)),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Num::I32(_) => 0,
            Num::I64(_) => 1,
            Num::F32(_) => 2,
            Num::F64(_) => 3,
        }
    }

    fn widen(self, rank: u8) -> Num {
        match (self, rank) {
            (Num::I32(i), 1) => Num::I64(i as i64),
            (Num::I32(i), 2) => Num::F32(i as f32),
            (Num::I32(i), 3) => Num::F64(i as f64),
            (Num::I64(i), 2) => Num::F32(i as f32),
            (Num::I64(i), 3) => Num::F64(i as f64),
            (Num::F32(x), 3) => Num::F64(x as f64),
            (n, _) => n,
        }
    }
}

fn promote(left: &Value, right: &Value) -> Option<(Num, Num)> {
    let (a, b) = (Num::of(left)?, Num::of(right)?);
    let rank = a.rank().max(b.rank());
    Some((a.widen(rank), b.widen(rank)))
}

fn unsupported(name: &str, args: &[Value]) -> VmError {
    let types: Vec<&str> = args.iter().map(Value::type_name).collect();
    VmError::TypeError(format!("no operator {} for ({})", name, types.join(", ")))
}

fn nonzero(ok: bool) -> VmResult<()> {
    if ok {
        Ok(())
    } else {
        Err(VmError::RuntimeError("Division by zero".to_string()))
    }
}

fn arithmetic(name: &str, left: &Value, right: &Value) -> VmResult<Value> {
    let Some(pair) = promote(left, right) else {
        return Err(unsupported(name, &[left.clone(), right.clone()]));
    };
    let value = match (name, pair) {
        ("plus", (Num::I32(a), Num::I32(b))) => Value::I32(a.wrapping_add(b)),
        ("minus", (Num::I32(a), Num::I32(b))) => Value::I32(a.wrapping_sub(b)),
        ("times", (Num::I32(a), Num::I32(b))) => Value::I32(a.wrapping_mul(b)),
        ("divide", (Num::I32(a), Num::I32(b))) => {
            nonzero(b != 0)?;
            Value::I32(a.wrapping_div(b))
        }
        ("modulo", (Num::I32(a), Num::I32(b))) => {
            nonzero(b != 0)?;
            Value::I32(a.wrapping_rem(b))
        }
        ("plus", (Num::I64(a), Num::I64(b))) => Value::I64(a.wrapping_add(b)),
        ("minus", (Num::I64(a), Num::I64(b))) => Value::I64(a.wrapping_sub(b)),
        ("times", (Num::I64(a), Num::I64(b))) => Value::I64(a.wrapping_mul(b)),
        ("divide", (Num::I64(a), Num::I64(b))) => {
            nonzero(b != 0)?;
            Value::I64(a.wrapping_div(b))
        }
        ("modulo", (Num::I64(a), Num::I64(b))) => {
            nonzero(b != 0)?;
            Value::I64(a.wrapping_rem(b))
        }
        ("plus", (Num::F32(a), Num::F32(b))) => Value::F32(a + b),
        ("minus", (Num::F32(a), Num::F32(b))) => Value::F32(a - b),
        ("times", (Num::F32(a), Num::F32(b))) => Value::F32(a * b),
        ("divide", (Num::F32(a), Num::F32(b))) => Value::F32(a / b),
        ("modulo", (Num::F32(a), Num::F32(b))) => Value::F32(a % b),
        ("plus", (Num::F64(a), Num::F64(b))) => Value::F64(a + b),
        ("minus", (Num::F64(a), Num::F64(b))) => Value::F64(a - b),
        ("times", (Num::F64(a), Num::F64(b))) => Value::F64(a * b),
        ("divide", (Num::F64(a), Num::F64(b))) => Value::F64(a / b),
        ("modulo", (Num::F64(a), Num::F64(b))) => Value::F64(a % b),
        _ => return Err(unsupported(name, &[left.clone(), right.clone()])),
    };
    Ok(value)
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match promote(left, right) {
        Some((Num::I32(a), Num::I32(b))) => Some(a.cmp(&b)),
        Some((Num::I64(a), Num::I64(b))) => Some(a.cmp(&b)),
        Some((Num::F32(a), Num::F32(b))) => a.partial_cmp(&b),
        Some((Num::F64(a), Num::F64(b))) => a.partial_cmp(&b),
        Some(_) => None,
        None => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

/// Language-level `==`: numbers compare after promotion
pub(crate) fn equals(left: &Value, right: &Value) -> bool {
    match promote(left, right) {
        Some(_) => compare(left, right) == Some(Ordering::Equal),
        None => left == right,
    }
}

fn as_bool(name: &str, value: &Value) -> VmResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| unsupported(name, std::slice::from_ref(value)))
}

/// Apply the operator `name` to `args`
pub(crate) fn apply(name: &str, args: &[Value]) -> VmResult<Value> {
    match args {
        [operand] => unary(name, operand),
        [left, right] => binary(name, left, right),
        _ => Err(unsupported(name, args)),
    }
}

fn unary(name: &str, operand: &Value) -> VmResult<Value> {
    match name {
        "not" => Ok(Value::Bool(!as_bool(name, operand)?)),
        _ => Err(unsupported(name, std::slice::from_ref(operand))),
    }
}

fn binary(name: &str, left: &Value, right: &Value) -> VmResult<Value> {
    match name {
        "plus" => match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::str(&format!("{}{}", left, right)))
            }
            _ => arithmetic(name, left, right),
        },
        "times" => match (left, right) {
            (Value::Str(s), Value::I32(n)) | (Value::I32(n), Value::Str(s)) => {
                let count = usize::try_from(*n).map_err(|_| {
                    VmError::RuntimeError(format!("negative repeat count {}", n))
                })?;
                Ok(Value::str(&s.repeat(count)))
            }
            _ => arithmetic(name, left, right),
        },
        "minus" | "divide" | "modulo" => arithmetic(name, left, right),
        "less" | "lessorequals" | "more" | "moreorequals" => {
            let Some(ordering) = compare(left, right) else {
                return Err(unsupported(name, &[left.clone(), right.clone()]));
            };
            Ok(Value::Bool(match name {
                "less" => ordering == Ordering::Less,
                "lessorequals" => ordering != Ordering::Greater,
                "more" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        "equals" => Ok(Value::Bool(equals(left, right))),
        "notequals" => Ok(Value::Bool(!equals(left, right))),
        "is" => Ok(Value::Bool(left.same(right))),
        "isnt" => Ok(Value::Bool(!left.same(right))),
        "and" => Ok(Value::Bool(as_bool(name, left)? && as_bool(name, right)?)),
        "or" => Ok(Value::Bool(as_bool(name, left)? || as_bool(name, right)?)),
        "orifnull" => Ok(if left.is_null() {
            right.clone()
        } else {
            left.clone()
        }),
        _ => Err(unsupported(name, &[left.clone(), right.clone()])),
    }
}
