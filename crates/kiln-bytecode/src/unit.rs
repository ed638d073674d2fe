//! Code unit format
//!
//! A code unit is the output artifact of the code generator: one per module,
//! per extension group, per algebraic type and per variant. Units refer to
//! each other by qualified name through their `outer`/`inner` relations.
//!
//! # Binary layout
//!
//! ```text
//! magic "KILN" | version u32 | flags u32 | crc32 u32 | sha256 [u8; 32] | payload
//! ```
//!
//! Both checksums cover the payload only.

use crate::constants::ConstantPool;
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Magic number of an encoded unit
pub const MAGIC: [u8; 4] = *b"KILN";

/// Current format version
pub const VERSION: u32 = 1;

const HEADER_SIZE: usize = 48;

/// Unit flags
pub mod flags {
    /// Functions carry line and local-variable tables
    pub const HAS_DEBUG_INFO: u32 = 1 << 0;
}

/// Unit encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected KILN, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// CRC32 mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// SHA-256 mismatch
    #[error("SHA-256 digest mismatch")]
    DigestMismatch,

    /// Unknown enum tag in the payload
    #[error("Invalid {what} tag {tag}")]
    InvalidTag {
        /// Which table the tag belongs to
        what: &'static str,
        /// Offending tag
        tag: u8,
    },
}

/// 31-polynomial string hash over UTF-16 code units, wrapping at 32 bits
///
/// Keys of the `$extensionApplications` lookup switch are computed with it.
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Role of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    /// Primary unit of a module
    Module,
    /// Extension group nested in a module
    Extension,
    /// Algebraic type
    Union,
    /// One variant of an algebraic type
    Variant,
    /// Record type with named, mutable members
    Struct,
}

impl UnitKind {
    fn tag(self) -> u8 {
        match self {
            UnitKind::Module => 0,
            UnitKind::Extension => 1,
            UnitKind::Union => 2,
            UnitKind::Variant => 3,
            UnitKind::Struct => 4,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, UnitError> {
        match tag {
            0 => Ok(UnitKind::Module),
            1 => Ok(UnitKind::Extension),
            2 => Ok(UnitKind::Union),
            3 => Ok(UnitKind::Variant),
            4 => Ok(UnitKind::Struct),
            _ => Err(UnitError::InvalidTag { what: "unit kind", tag }),
        }
    }
}

/// How the runtime links a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Function looked up by (possibly qualified) name
    Function,
    /// Method looked up on the receiver
    Method,
    /// Invocation of a function value
    Closure,
    /// Operator dispatch on operand types
    Operator,
    /// Type reference by qualified name
    ClassRef,
    /// Handle on a function of a unit
    ClosureRef,
}

impl CallKind {
    fn tag(self) -> u8 {
        match self {
            CallKind::Function => 0,
            CallKind::Method => 1,
            CallKind::Closure => 2,
            CallKind::Operator => 3,
            CallKind::ClassRef => 4,
            CallKind::ClosureRef => 5,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, UnitError> {
        match tag {
            0 => Ok(CallKind::Function),
            1 => Ok(CallKind::Method),
            2 => Ok(CallKind::Closure),
            3 => Ok(CallKind::Operator),
            4 => Ok(CallKind::ClassRef),
            5 => Ok(CallKind::ClosureRef),
            _ => Err(UnitError::InvalidTag { what: "call kind", tag }),
        }
    }
}

/// Descriptor of a late-bound call site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// Link strategy
    pub kind: CallKind,
    /// Target name
    pub name: String,
    /// Values popped from the operand stack (receiver or callable included)
    pub arity: u16,
    /// The first result may be cached for the lifetime of the site
    pub constant: bool,
    /// A null receiver yields null without dispatch
    pub null_safe: bool,
    /// Nothing is pushed on return
    pub void: bool,
    /// Labels of named arguments, empty for positional calls
    pub argument_names: Vec<String>,
    /// Unit owning the target (`ClosureRef` only)
    pub owner: Option<String>,
    /// Effective arity of the referenced function (`ClosureRef` only)
    pub target_arity: u16,
    /// Target collects trailing arguments (`ClosureRef` only)
    pub varargs: bool,
}

impl CallSite {
    /// A call site with no bootstrap flags set
    pub fn new(kind: CallKind, name: impl Into<String>, arity: u16) -> Self {
        Self {
            kind,
            name: name.into(),
            arity,
            constant: false,
            null_safe: false,
            void: false,
            argument_names: Vec::new(),
            owner: None,
            target_arity: 0,
            varargs: false,
        }
    }

    /// Values pushed after the call returns
    pub fn results(&self) -> i32 {
        if self.void {
            0
        } else {
            1
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u8(self.kind.tag());
        writer.emit_string(&self.name);
        writer.emit_u16(self.arity);
        let bits = (self.constant as u8)
            | (self.null_safe as u8) << 1
            | (self.void as u8) << 2
            | (self.varargs as u8) << 3;
        writer.emit_u8(bits);
        writer.emit_u32(self.argument_names.len() as u32);
        for name in &self.argument_names {
            writer.emit_string(name);
        }
        writer.emit_opt_string(self.owner.as_deref());
        writer.emit_u16(self.target_arity);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, UnitError> {
        let kind = CallKind::from_tag(reader.read_u8()?)?;
        let name = reader.read_string()?;
        let arity = reader.read_u16()?;
        let bits = reader.read_u8()?;
        let count = reader.read_u32()?;
        let mut argument_names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            argument_names.push(reader.read_string()?);
        }
        let owner = reader.read_opt_string()?;
        let target_arity = reader.read_u16()?;
        Ok(Self {
            kind,
            name,
            arity,
            constant: bits & 1 != 0,
            null_safe: bits & 2 != 0,
            void: bits & 4 != 0,
            varargs: bits & 8 != 0,
            argument_names,
            owner,
            target_arity,
        })
    }
}

/// Catch-all protected region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First protected offset
    pub start: u32,
    /// End of the protected range (exclusive)
    pub end: u32,
    /// Handler offset
    pub handler: u32,
    /// Operand stack depth kept below the thrown value on handler entry
    pub stack_depth: u16,
}

/// Bytecode offset to source line mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// First offset of the line's code
    pub offset: u32,
    /// 1-based source line
    pub line: u32,
}

/// Live range of a named local slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Source name
    pub name: String,
    /// Slot index
    pub slot: u16,
    /// First offset where the name is in scope
    pub start: u32,
    /// End of the range (exclusive)
    pub end: u32,
}

/// Role flags of an emitted function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Visible outside its unit
    pub public: bool,
    /// Program entry point
    pub main: bool,
    /// Run once before the unit is first used
    pub module_init: bool,
    /// Generated rather than declared
    pub synthetic: bool,
    /// Produces a decorator
    pub decorator: bool,
}

impl FunctionFlags {
    fn bits(&self) -> u8 {
        (self.public as u8)
            | (self.main as u8) << 1
            | (self.module_init as u8) << 2
            | (self.synthetic as u8) << 3
            | (self.decorator as u8) << 4
    }

    fn from_bits(bits: u8) -> Self {
        Self {
            public: bits & 1 != 0,
            main: bits & 2 != 0,
            module_init: bits & 4 != 0,
            synthetic: bits & 8 != 0,
            decorator: bits & 16 != 0,
        }
    }
}

/// A function of a code unit
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Function name, unique per (name, arity) within a unit
    pub name: String,
    /// Parameter names in slot order
    pub parameters: Vec<String>,
    /// Trailing parameter collects extra arguments into an array
    pub varargs: bool,
    /// Role flags
    pub flags: FunctionFlags,
    /// Function producing the decorator wrapping this one
    pub decorated_by: Option<String>,
    /// Local slots needed by the frame (parameters included)
    pub max_locals: u16,
    /// Instruction stream
    pub code: Vec<u8>,
    /// Catch-all handlers, innermost first
    pub exception_table: Vec<ExceptionEntry>,
    /// Line table
    pub lines: Vec<LineEntry>,
    /// Local-variable table
    pub locals: Vec<LocalVariable>,
}

impl FunctionDef {
    /// A function with an empty body
    pub fn new(name: impl Into<String>, parameters: Vec<String>) -> Self {
        let max_locals = parameters.len() as u16;
        Self {
            name: name.into(),
            parameters,
            varargs: false,
            flags: FunctionFlags::default(),
            decorated_by: None,
            max_locals,
            code: Vec::new(),
            exception_table: Vec::new(),
            lines: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// Declared parameter count
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Source line of the instruction at `offset`
    pub fn line_at(&self, offset: u32) -> Option<u32> {
        self.lines
            .iter()
            .take_while(|entry| entry.offset <= offset)
            .last()
            .map(|entry| entry.line)
    }

    fn encode(&self, writer: &mut BytecodeWriter, debug_info: bool) {
        writer.emit_string(&self.name);
        writer.emit_u32(self.parameters.len() as u32);
        for p in &self.parameters {
            writer.emit_string(p);
        }
        writer.emit_u8(self.varargs as u8);
        writer.emit_u8(self.flags.bits());
        writer.emit_opt_string(self.decorated_by.as_deref());
        writer.emit_u16(self.max_locals);
        writer.emit_u32(self.code.len() as u32);
        writer.emit_bytes(&self.code);
        writer.emit_u32(self.exception_table.len() as u32);
        for entry in &self.exception_table {
            writer.emit_u32(entry.start);
            writer.emit_u32(entry.end);
            writer.emit_u32(entry.handler);
            writer.emit_u16(entry.stack_depth);
        }
        if debug_info {
            writer.emit_u32(self.lines.len() as u32);
            for entry in &self.lines {
                writer.emit_u32(entry.offset);
                writer.emit_u32(entry.line);
            }
            writer.emit_u32(self.locals.len() as u32);
            for local in &self.locals {
                writer.emit_string(&local.name);
                writer.emit_u16(local.slot);
                writer.emit_u32(local.start);
                writer.emit_u32(local.end);
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>, debug_info: bool) -> Result<Self, UnitError> {
        let name = reader.read_string()?;
        let count = reader.read_u32()?;
        let mut parameters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            parameters.push(reader.read_string()?);
        }
        let varargs = reader.read_u8()? != 0;
        let flags = FunctionFlags::from_bits(reader.read_u8()?);
        let decorated_by = reader.read_opt_string()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?.to_vec();

        let count = reader.read_u32()?;
        let mut exception_table = Vec::with_capacity(count as usize);
        for _ in 0..count {
            exception_table.push(ExceptionEntry {
                start: reader.read_u32()?,
                end: reader.read_u32()?,
                handler: reader.read_u32()?,
                stack_depth: reader.read_u16()?,
            });
        }

        let mut lines = Vec::new();
        let mut locals = Vec::new();
        if debug_info {
            for _ in 0..reader.read_u32()? {
                lines.push(LineEntry {
                    offset: reader.read_u32()?,
                    line: reader.read_u32()?,
                });
            }
            for _ in 0..reader.read_u32()? {
                locals.push(LocalVariable {
                    name: reader.read_string()?,
                    slot: reader.read_u16()?,
                    start: reader.read_u32()?,
                    end: reader.read_u32()?,
                });
            }
        }

        Ok(Self {
            name,
            parameters,
            varargs,
            flags,
            decorated_by,
            max_locals,
            code,
            exception_table,
            lines,
            locals,
        })
    }
}

/// A self-contained output artifact tagged with a qualified name
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    /// Fully qualified name
    pub name: String,
    /// Role of the unit
    pub kind: UnitKind,
    /// Source file the unit was compiled from
    pub source_file: Option<String>,
    /// Enclosing unit
    pub outer: Option<String>,
    /// Nested units
    pub inner: Vec<String>,
    /// Type extended by an extension unit
    pub extension_target: Option<String>,
    /// Imported qualified names, searched when linking function call sites
    pub imports: Vec<String>,
    /// Names of module-state globals
    pub globals: Vec<String>,
    /// Member names of a struct unit, in declaration order
    pub members: Vec<String>,
    /// String constants
    pub constants: ConstantPool,
    /// Call-site descriptors referenced by `INVOKE`
    pub call_sites: Vec<CallSite>,
    /// Function definitions
    pub functions: Vec<FunctionDef>,
}

impl CodeUnit {
    /// Create an empty unit
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
            source_file: None,
            outer: None,
            inner: Vec::new(),
            extension_target: None,
            imports: Vec::new(),
            globals: Vec::new(),
            members: Vec::new(),
            constants: ConstantPool::new(),
            call_sites: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Register a call site, returning its index
    pub fn add_call_site(&mut self, site: CallSite) -> u32 {
        let index = self.call_sites.len() as u32;
        self.call_sites.push(site);
        index
    }

    /// Find a function by name and exact arity
    pub fn find_function(&self, name: &str, arity: usize) -> Option<usize> {
        self.functions
            .iter()
            .position(|f| f.name == name && f.arity() == arity)
    }

    /// Simple name of the unit (after the last `.`)
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Encode the unit to its binary form
    pub fn encode(&self) -> Vec<u8> {
        let debug_info = self
            .functions
            .iter()
            .any(|f| !f.lines.is_empty() || !f.locals.is_empty());
        let unit_flags = if debug_info { flags::HAS_DEBUG_INFO } else { 0 };

        let mut writer = BytecodeWriter::new();
        writer.emit_bytes(&MAGIC);
        writer.emit_u32(VERSION);
        writer.emit_u32(unit_flags);
        writer.emit_u32(0); // crc32, patched below
        writer.emit_bytes(&[0u8; 32]); // sha256, patched below

        writer.emit_string(&self.name);
        writer.emit_u8(self.kind.tag());
        writer.emit_opt_string(self.source_file.as_deref());
        writer.emit_opt_string(self.outer.as_deref());
        emit_strings(&mut writer, &self.inner);
        writer.emit_opt_string(self.extension_target.as_deref());
        emit_strings(&mut writer, &self.imports);
        emit_strings(&mut writer, &self.globals);
        emit_strings(&mut writer, &self.members);
        self.constants.encode(&mut writer);
        writer.emit_u32(self.call_sites.len() as u32);
        for site in &self.call_sites {
            site.encode(&mut writer);
        }
        writer.emit_u32(self.functions.len() as u32);
        for function in &self.functions {
            function.encode(&mut writer, debug_info);
        }

        let payload = &writer.buffer[HEADER_SIZE..];
        let crc32 = crc32fast::hash(payload);
        let digest = Sha256::digest(payload);
        writer.patch_u32(12, crc32);
        writer.buffer[16..HEADER_SIZE].copy_from_slice(digest.as_slice());
        writer.into_bytes()
    }

    /// Decode a unit from its binary form, validating both checksums
    pub fn decode(data: &[u8]) -> Result<Self, UnitError> {
        let mut reader = BytecodeReader::new(data);
        let mut magic = [0u8; 4];
        magic.copy_from_slice(reader.read_bytes(4)?);
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic(magic));
        }
        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(UnitError::UnsupportedVersion(version));
        }
        let unit_flags = reader.read_u32()?;
        let stored_crc32 = reader.read_u32()?;
        let stored_digest = reader.read_bytes(32)?;

        let payload = &data[HEADER_SIZE..];
        let actual = crc32fast::hash(payload);
        if actual != stored_crc32 {
            return Err(UnitError::ChecksumMismatch {
                expected: stored_crc32,
                actual,
            });
        }
        let digest = Sha256::digest(payload);
        if digest.as_slice() != stored_digest {
            return Err(UnitError::DigestMismatch);
        }

        let debug_info = unit_flags & flags::HAS_DEBUG_INFO != 0;
        let name = reader.read_string()?;
        let kind = UnitKind::from_tag(reader.read_u8()?)?;
        let source_file = reader.read_opt_string()?;
        let outer = reader.read_opt_string()?;
        let inner = read_strings(&mut reader)?;
        let extension_target = reader.read_opt_string()?;
        let imports = read_strings(&mut reader)?;
        let globals = read_strings(&mut reader)?;
        let members = read_strings(&mut reader)?;
        let constants = ConstantPool::decode(&mut reader)?;
        let count = reader.read_u32()?;
        let mut call_sites = Vec::with_capacity(count as usize);
        for _ in 0..count {
            call_sites.push(CallSite::decode(&mut reader)?);
        }
        let count = reader.read_u32()?;
        let mut functions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            functions.push(FunctionDef::decode(&mut reader, debug_info)?);
        }

        Ok(Self {
            name,
            kind,
            source_file,
            outer,
            inner,
            extension_target,
            imports,
            globals,
            members,
            constants,
            call_sites,
            functions,
        })
    }

    /// Structural summary for tooling and tests
    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "kind": self.kind,
            "outer": self.outer,
            "inner": self.inner,
            "extension_target": self.extension_target,
            "imports": self.imports,
            "globals": self.globals,
            "members": self.members,
            "functions": self
                .functions
                .iter()
                .map(|f| serde_json::json!({
                    "name": f.name,
                    "arity": f.arity(),
                    "varargs": f.varargs,
                    "flags": f.flags,
                    "decorated_by": f.decorated_by,
                }))
                .collect::<Vec<_>>(),
            "call_sites": self.call_sites,
        })
    }
}

fn emit_strings(writer: &mut BytecodeWriter, values: &[String]) {
    writer.emit_u32(values.len() as u32);
    for value in values {
        writer.emit_string(value);
    }
}

fn read_strings(reader: &mut BytecodeReader<'_>) -> Result<Vec<String>, DecodeError> {
    let count = reader.read_u32()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(reader.read_string()?);
    }
    Ok(values)
}
