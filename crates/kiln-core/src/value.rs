//! Runtime value representation
//!
//! Scalars are stored inline; strings, collections, function handles,
//! variants and structs are reference counted. Arrays, lists, vectors, sets,
//! maps and unfrozen structs are mutable through shared handles, tuples are
//! not.
//!
//! Sets and maps keep insertion order and compare elements with `==` on
//! [`Value`], so `1` and `1L` are distinct keys.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Type names reported for builtin values
pub mod type_names {
    /// `null`
    pub const NULL: &str = "kiln.lang.Null";
    /// Booleans
    pub const BOOLEAN: &str = "kiln.lang.Boolean";
    /// 32-bit integers
    pub const INTEGER: &str = "kiln.lang.Integer";
    /// 64-bit integers
    pub const LONG: &str = "kiln.lang.Long";
    /// 32-bit floats
    pub const FLOAT: &str = "kiln.lang.Float";
    /// 64-bit floats
    pub const DOUBLE: &str = "kiln.lang.Double";
    /// Characters
    pub const CHAR: &str = "kiln.lang.Char";
    /// Strings
    pub const STRING: &str = "kiln.lang.String";
    /// Fixed-size arrays
    pub const ARRAY: &str = "kiln.lang.Array";
    /// Tuples
    pub const TUPLE: &str = "kiln.lang.Tuple";
    /// Lists
    pub const LIST: &str = "kiln.lang.List";
    /// Vectors
    pub const VECTOR: &str = "kiln.lang.Vector";
    /// Sets
    pub const SET: &str = "kiln.lang.Set";
    /// Maps
    pub const MAP: &str = "kiln.lang.Map";
    /// Function handles
    pub const FUNCTION: &str = "kiln.lang.Function";
    /// Type references
    pub const TYPE: &str = "kiln.lang.Type";
}

/// What a function handle calls
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    /// Function `function` of loaded unit `unit`
    Code {
        /// Unit index in the VM
        unit: usize,
        /// Function index in the unit
        function: usize,
    },
    /// Registered native, by qualified name
    Native(Rc<str>),
}

/// A callable handle with optional leading bound arguments
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionValue {
    /// Target
    pub target: Callable,
    /// Display name of the target
    pub name: Rc<str>,
    /// Arguments bound in front of the call arguments
    pub bound: Vec<Value>,
    /// Trailing arguments are collected into an array
    pub varargs: bool,
}

/// An instance of an algebraic type variant
#[derive(Debug, Clone, PartialEq)]
pub struct VariantValue {
    /// Qualified name of the variant unit
    pub name: Rc<str>,
    /// Member values in declaration order
    pub fields: Vec<Value>,
}

/// An instance of a struct unit
#[derive(Debug)]
pub struct StructValue {
    /// Qualified name of the struct unit
    pub name: Rc<str>,
    /// Member names in declaration order
    pub members: Rc<[String]>,
    /// Member values, parallel to `members`
    pub fields: RefCell<Vec<Value>>,
    /// Frozen structs reject updates and compare by value
    pub frozen: bool,
}

impl StructValue {
    pub fn new(name: Rc<str>, members: Rc<[String]>, fields: Vec<Value>, frozen: bool) -> Self {
        Self {
            name,
            members,
            fields: RefCell::new(fields),
            frozen,
        }
    }

    /// Index of member `name`
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m == name)
    }

    /// Public members paired with their current values
    pub fn public_entries(&self) -> Vec<(String, Value)> {
        let fields = self.fields.borrow();
        self.members
            .iter()
            .zip(fields.iter())
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// A copy with the same member values
    pub fn copy(&self, frozen: bool) -> Self {
        Self::new(
            Rc::clone(&self.name),
            Rc::clone(&self.members),
            self.fields.borrow().clone(),
            frozen,
        )
    }
}

impl PartialEq for StructValue {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
            || (self.frozen
                && other.frozen
                && self.name == other.name
                && *self.fields.borrow() == *other.fields.borrow())
    }
}

/// A runtime value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Character
    Char(char),
    /// Immutable string
    Str(Rc<str>),
    /// Fixed-size array
    Array(Rc<RefCell<Vec<Value>>>),
    /// Immutable tuple
    Tuple(Rc<[Value]>),
    /// Growable list
    List(Rc<RefCell<Vec<Value>>>),
    /// Growable vector
    Vector(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered set
    Set(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered map
    Map(Rc<RefCell<Vec<(Value, Value)>>>),
    /// Function handle
    Function(Rc<FunctionValue>),
    /// Reference to a type by qualified name
    Type(Rc<str>),
    /// Algebraic type instance
    Variant(Rc<VariantValue>),
    /// Struct instance
    Struct(Rc<StructValue>),
}

impl Value {
    /// Create a string value
    pub fn str(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }

    /// Create an array value
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Create a tuple value
    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    /// Create a list value
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Extract a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract a 32-bit integer
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Snapshot of the elements of an array, tuple, list, vector or set
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) | Value::List(items) | Value::Vector(items) | Value::Set(items) => {
                Some(items.borrow().clone())
            }
            Value::Tuple(items) => Some(items.to_vec()),
            _ => None,
        }
    }

    /// Snapshot of the entries of a map
    pub fn entries(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::Map(entries) => Some(entries.borrow().clone()),
            _ => None,
        }
    }

    /// Qualified type name, used to find extensions
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => type_names::NULL,
            Value::Bool(_) => type_names::BOOLEAN,
            Value::I32(_) => type_names::INTEGER,
            Value::I64(_) => type_names::LONG,
            Value::F32(_) => type_names::FLOAT,
            Value::F64(_) => type_names::DOUBLE,
            Value::Char(_) => type_names::CHAR,
            Value::Str(_) => type_names::STRING,
            Value::Array(_) => type_names::ARRAY,
            Value::Tuple(_) => type_names::TUPLE,
            Value::List(_) => type_names::LIST,
            Value::Vector(_) => type_names::VECTOR,
            Value::Set(_) => type_names::SET,
            Value::Map(_) => type_names::MAP,
            Value::Function(_) => type_names::FUNCTION,
            Value::Type(_) => type_names::TYPE,
            Value::Variant(variant) => &variant.name,
            Value::Struct(instance) => &instance.name,
        }
    }

    /// Identity comparison (`is`)
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Array(a), Value::Array(b))
            | (Value::List(a), Value::List(b))
            | (Value::Vector(a), Value::Vector(b))
            | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Variant(a), Value::Variant(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            _ => self == other,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

fn write_joined<'v>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = &'v Value>,
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (index, item) in items.enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(i) => write!(f, "{}", i),
            Value::I64(i) => write!(f, "{}", i),
            Value::F32(x) => write!(f, "{:?}", x),
            Value::F64(x) => write!(f, "{:?}", x),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(s) => f.write_str(s),
            Value::Array(items) | Value::List(items) => {
                write_joined(f, "[", items.borrow().iter(), "]")
            }
            Value::Vector(items) => write_joined(f, "vector[", items.borrow().iter(), "]"),
            Value::Set(items) => write_joined(f, "set[", items.borrow().iter(), "]"),
            Value::Tuple(items) => write_joined(f, "tuple[", items.iter(), "]"),
            Value::Map(entries) => {
                f.write_str("{")?;
                for (index, (key, value)) in entries.borrow().iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Function(function) => write!(f, "function({})", function.name),
            Value::Type(name) => f.write_str(name),
            Value::Variant(variant) => {
                let simple = variant.name.rsplit('.').next().unwrap_or(&variant.name);
                write_joined(f, &format!("{}(", simple), variant.fields.iter(), ")")
            }
            Value::Struct(instance) => {
                let simple = instance.name.rsplit('.').next().unwrap_or(&instance.name);
                write!(f, "struct {}{{", simple)?;
                for (index, (name, value)) in instance.public_entries().iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}
