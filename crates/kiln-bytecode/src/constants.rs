//! Constant pool of a code unit
//!
//! Strings referenced by `CONST_STR` and `NEW_VARIANT` are interned here.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use rustc_hash::FxHashMap;

/// Interned string constants
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    strings: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its index
    pub fn add_string(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.index.get(value) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.index.insert(value.to_string(), index);
        index
    }

    /// Get a string by index
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the pool holds no strings
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Encode the pool
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }
    }

    /// Decode a pool written by [`ConstantPool::encode`]
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()?;
        let mut pool = Self::new();
        for _ in 0..count {
            let s = reader.read_string()?;
            pool.add_string(&s);
        }
        Ok(pool)
    }
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.strings == other.strings
    }
}
