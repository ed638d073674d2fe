//! Bytecode opcodes for the Kiln stack machine
//!
//! Every opcode is a single byte, optionally followed by little-endian
//! operands. Jump offsets are relative to the offset of the jump's own opcode.

/// Bytecode opcode enumeration
///
/// Opcodes are organized into categories:
/// - 0x00-0x0F: Stack manipulation & constants
/// - 0x10-0x1F: Locals and module state
/// - 0x20-0x2F: Control flow
/// - 0x30-0x3F: Calls, returns and exceptions
/// - 0x40-0x4F: Collections
/// - 0x50-0x5F: Function handles
/// - 0x60-0x6F: Algebraic values
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Push null
    ConstNull = 0x04,
    /// Push boolean true
    ConstTrue = 0x05,
    /// Push boolean false
    ConstFalse = 0x06,
    /// Push 32-bit integer (operand: i32)
    ConstI32 = 0x07,
    /// Push 64-bit integer (operand: i64)
    ConstI64 = 0x08,
    /// Push 32-bit float (operand: f32)
    ConstF32 = 0x09,
    /// Push 64-bit float (operand: f64)
    ConstF64 = 0x0A,
    /// Push character (operand: u32 code point)
    ConstChar = 0x0B,
    /// Push string from the constant pool (operand: u32 index)
    ConstStr = 0x0C,

    // ===== Locals & Module State (0x10-0x1F) =====
    /// Load local slot (operand: u16 slot)
    LoadLocal = 0x10,
    /// Store into local slot (operand: u16 slot)
    StoreLocal = 0x11,
    /// Load module-state global (operand: u16 index)
    LoadGlobal = 0x12,
    /// Store module-state global (operand: u16 index)
    StoreGlobal = 0x13,

    // ===== Control Flow (0x20-0x2F) =====
    /// Unconditional jump (operand: i32 offset)
    Jmp = 0x20,
    /// Pop a boolean, jump when false (operand: i32 offset)
    JmpIfFalse = 0x21,
    /// Pop a boolean, jump when true (operand: i32 offset)
    JmpIfTrue = 0x22,
    /// Pop an i32 key and jump through a sorted key table
    /// (operands: i32 default offset, u32 count, count x (i32 key, i32 offset))
    LookupSwitch = 0x23,

    // ===== Calls, Returns & Exceptions (0x30-0x3F) =====
    /// Invoke a late-bound call site (operand: u32 call-site index)
    Invoke = 0x30,
    /// Return top of stack
    Return = 0x31,
    /// Return without a value
    ReturnVoid = 0x32,
    /// Throw top of stack
    Throw = 0x33,

    // ===== Collections (0x40-0x4F) =====
    /// Pop an i32 size, push a null-filled array
    NewArray = 0x40,
    /// Pop value, index and array; store the value
    StoreElem = 0x41,
    /// Pop an array, push a tuple holding its elements
    NewTuple = 0x42,
    /// Pop index and tuple, push the element
    TupleGet = 0x43,
    /// Push an empty linked list
    NewList = 0x44,
    /// Pop an i32 capacity, push an empty vector
    NewVector = 0x45,
    /// Push an empty insertion-ordered set
    NewSet = 0x46,
    /// Push an empty insertion-ordered map
    NewMap = 0x47,
    /// Pop value and collection, add the value
    CollectionAdd = 0x48,
    /// Pop value, key and map, insert the entry
    MapPut = 0x49,

    // ===== Function Handles (0x50-0x5F) =====
    /// Check that top of stack is callable
    CastFunction = 0x50,
    /// Pop an array and a function, push the function with the array's
    /// values bound from a position (operand: u16 position)
    BindArgs = 0x51,
    /// Mark the function on top of stack as collecting trailing arguments
    AsVarargs = 0x52,

    // ===== Algebraic Values (0x60-0x6F) =====
    /// Pop members, push a variant value (operands: u32 name index, u16 count)
    NewVariant = 0x60,
    /// Replace a variant or struct value by one of its members (operand: u16 index)
    GetField = 0x61,
    /// Pop members, push a struct of the current unit (operand: u16 count)
    NewStruct = 0x62,
    /// Pop a value and a struct, store the value as a member (operand: u16 index)
    SetField = 0x63,
}

impl Opcode {
    /// Decode an opcode from its byte value
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::Swap),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstI32),
            0x08 => Some(Self::ConstI64),
            0x09 => Some(Self::ConstF32),
            0x0A => Some(Self::ConstF64),
            0x0B => Some(Self::ConstChar),
            0x0C => Some(Self::ConstStr),

            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),
            0x12 => Some(Self::LoadGlobal),
            0x13 => Some(Self::StoreGlobal),

            0x20 => Some(Self::Jmp),
            0x21 => Some(Self::JmpIfFalse),
            0x22 => Some(Self::JmpIfTrue),
            0x23 => Some(Self::LookupSwitch),

            0x30 => Some(Self::Invoke),
            0x31 => Some(Self::Return),
            0x32 => Some(Self::ReturnVoid),
            0x33 => Some(Self::Throw),

            0x40 => Some(Self::NewArray),
            0x41 => Some(Self::StoreElem),
            0x42 => Some(Self::NewTuple),
            0x43 => Some(Self::TupleGet),
            0x44 => Some(Self::NewList),
            0x45 => Some(Self::NewVector),
            0x46 => Some(Self::NewSet),
            0x47 => Some(Self::NewMap),
            0x48 => Some(Self::CollectionAdd),
            0x49 => Some(Self::MapPut),

            0x50 => Some(Self::CastFunction),
            0x51 => Some(Self::BindArgs),
            0x52 => Some(Self::AsVarargs),

            0x60 => Some(Self::NewVariant),
            0x61 => Some(Self::GetField),
            0x62 => Some(Self::NewStruct),
            0x63 => Some(Self::SetField),

            _ => None,
        }
    }

    /// Get the byte value of the opcode
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Swap => "SWAP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstTrue => "CONST_TRUE",
            Self::ConstFalse => "CONST_FALSE",
            Self::ConstI32 => "CONST_I32",
            Self::ConstI64 => "CONST_I64",
            Self::ConstF32 => "CONST_F32",
            Self::ConstF64 => "CONST_F64",
            Self::ConstChar => "CONST_CHAR",
            Self::ConstStr => "CONST_STR",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::StoreGlobal => "STORE_GLOBAL",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::JmpIfTrue => "JMP_IF_TRUE",
            Self::LookupSwitch => "LOOKUP_SWITCH",
            Self::Invoke => "INVOKE",
            Self::Return => "RETURN",
            Self::ReturnVoid => "RETURN_VOID",
            Self::Throw => "THROW",
            Self::NewArray => "NEW_ARRAY",
            Self::StoreElem => "STORE_ELEM",
            Self::NewTuple => "NEW_TUPLE",
            Self::TupleGet => "TUPLE_GET",
            Self::NewList => "NEW_LIST",
            Self::NewVector => "NEW_VECTOR",
            Self::NewSet => "NEW_SET",
            Self::NewMap => "NEW_MAP",
            Self::CollectionAdd => "COLLECTION_ADD",
            Self::MapPut => "MAP_PUT",
            Self::CastFunction => "CAST_FUNCTION",
            Self::BindArgs => "BIND_ARGS",
            Self::AsVarargs => "AS_VARARGS",
            Self::NewVariant => "NEW_VARIANT",
            Self::GetField => "GET_FIELD",
            Self::NewStruct => "NEW_STRUCT",
            Self::SetField => "SET_FIELD",
        }
    }

    /// Size in bytes of the fixed operands following the opcode
    ///
    /// Returns `None` for `LookupSwitch`, whose size depends on its key count.
    pub fn operand_size(self) -> Option<usize> {
        match self {
            Self::ConstI32 | Self::ConstF32 | Self::ConstChar | Self::ConstStr => Some(4),
            Self::ConstI64 | Self::ConstF64 => Some(8),
            Self::LoadLocal | Self::StoreLocal | Self::LoadGlobal | Self::StoreGlobal => Some(2),
            Self::Jmp | Self::JmpIfFalse | Self::JmpIfTrue => Some(4),
            Self::Invoke => Some(4),
            Self::BindArgs | Self::GetField | Self::NewStruct | Self::SetField => Some(2),
            Self::NewVariant => Some(6),
            Self::LookupSwitch => None,
            _ => Some(0),
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp | Self::JmpIfFalse | Self::JmpIfTrue | Self::LookupSwitch
        )
    }

    /// Check if this opcode returns from the current function
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid)
    }

    /// Check if execution never continues with the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return() || matches!(self, Self::Throw | Self::Jmp | Self::LookupSwitch)
    }
}
