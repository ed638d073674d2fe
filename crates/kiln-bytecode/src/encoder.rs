//! Bytecode encoding and decoding utilities
//!
//! [`BytecodeWriter`] appends opcodes and little-endian operands and supports
//! back-patching of forward jump offsets. [`BytecodeReader`] walks a buffer
//! with bounds-checked reads.

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Invalid character code point
    #[error("Invalid character code point {0:#x} at offset {1}")]
    InvalidChar(u32, usize),
}

/// Bytecode writer for encoding instructions
#[derive(Debug, Clone)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit float (little-endian)
    pub fn emit_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed string (u32 length + UTF-8 bytes)
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit an optional string as a presence byte followed by the string
    pub fn emit_opt_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.emit_u8(1);
                self.emit_string(s);
            }
            None => self.emit_u8(0),
        }
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit an opcode
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    // ===== Instructions =====

    /// Emit CONST_I32
    pub fn emit_const_i32(&mut self, value: i32) {
        self.emit_opcode(Opcode::ConstI32);
        self.emit_i32(value);
    }

    /// Emit CONST_I64
    pub fn emit_const_i64(&mut self, value: i64) {
        self.emit_opcode(Opcode::ConstI64);
        self.emit_i64(value);
    }

    /// Emit CONST_F32
    pub fn emit_const_f32(&mut self, value: f32) {
        self.emit_opcode(Opcode::ConstF32);
        self.emit_f32(value);
    }

    /// Emit CONST_F64
    pub fn emit_const_f64(&mut self, value: f64) {
        self.emit_opcode(Opcode::ConstF64);
        self.emit_f64(value);
    }

    /// Emit CONST_CHAR
    pub fn emit_const_char(&mut self, value: char) {
        self.emit_opcode(Opcode::ConstChar);
        self.emit_u32(value as u32);
    }

    /// Emit CONST_STR with a constant pool index
    pub fn emit_const_str(&mut self, index: u32) {
        self.emit_opcode(Opcode::ConstStr);
        self.emit_u32(index);
    }

    /// Emit LOAD_LOCAL
    pub fn emit_load_local(&mut self, slot: u16) {
        self.emit_opcode(Opcode::LoadLocal);
        self.emit_u16(slot);
    }

    /// Emit STORE_LOCAL
    pub fn emit_store_local(&mut self, slot: u16) {
        self.emit_opcode(Opcode::StoreLocal);
        self.emit_u16(slot);
    }

    /// Emit LOAD_GLOBAL
    pub fn emit_load_global(&mut self, index: u16) {
        self.emit_opcode(Opcode::LoadGlobal);
        self.emit_u16(index);
    }

    /// Emit STORE_GLOBAL
    pub fn emit_store_global(&mut self, index: u16) {
        self.emit_opcode(Opcode::StoreGlobal);
        self.emit_u16(index);
    }

    /// Emit INVOKE with a call-site index
    pub fn emit_invoke(&mut self, site: u32) {
        self.emit_opcode(Opcode::Invoke);
        self.emit_u32(site);
    }

    /// Emit BIND_ARGS
    pub fn emit_bind_args(&mut self, position: u16) {
        self.emit_opcode(Opcode::BindArgs);
        self.emit_u16(position);
    }

    /// Emit NEW_VARIANT
    pub fn emit_new_variant(&mut self, name_index: u32, count: u16) {
        self.emit_opcode(Opcode::NewVariant);
        self.emit_u32(name_index);
        self.emit_u16(count);
    }

    /// Emit GET_FIELD
    pub fn emit_get_field(&mut self, index: u16) {
        self.emit_opcode(Opcode::GetField);
        self.emit_u16(index);
    }

    /// Emit NEW_STRUCT
    pub fn emit_new_struct(&mut self, count: u16) {
        self.emit_opcode(Opcode::NewStruct);
        self.emit_u16(count);
    }

    /// Emit SET_FIELD
    pub fn emit_set_field(&mut self, index: u16) {
        self.emit_opcode(Opcode::SetField);
        self.emit_u16(index);
    }

    // ===== Patching (for forward jumps) =====

    /// Patch a previously emitted i32 value at the given offset
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Patch a previously emitted u32 value at the given offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reserve space for an i32 value (returns offset for later patching)
    pub fn reserve_i32(&mut self) -> usize {
        let offset = self.offset();
        self.emit_i32(0);
        offset
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytecode reader for decoding instructions and unit payloads
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the remaining bytes in the buffer
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Seek to a specific position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.position + N;
        let slice = self
            .buffer
            .get(self.position..end)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        self.position = end;
        Ok(bytes)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take().map(u16::from_le_bytes)
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take().map(u32::from_le_bytes)
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.take().map(i32::from_le_bytes)
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.take().map(i64::from_le_bytes)
    }

    /// Read a 32-bit float (little-endian)
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.take().map(f32::from_le_bytes)
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.take().map(f64::from_le_bytes)
    }

    /// Read a character encoded as a u32 code point
    pub fn read_char(&mut self) -> Result<char, DecodeError> {
        let offset = self.position;
        let code = self.read_u32()?;
        char::from_u32(code).ok_or(DecodeError::InvalidChar(code, offset))
    }

    /// Read a length-prefixed string (u32 length + UTF-8 bytes)
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a string written by [`BytecodeWriter::emit_opt_string`]
    pub fn read_opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            _ => self.read_string().map(Some),
        }
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.position + count;
        let bytes = self
            .buffer
            .get(self.position..end)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        self.position = end;
        Ok(bytes)
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, self.position - 1))
    }
}
