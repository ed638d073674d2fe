//! Bytecode verification
//!
//! Checks that every function of a code unit decodes cleanly, that jumps and
//! handlers land on instruction boundaries, that operands reference existing
//! table entries, and that the operand stack depth is consistent on every path.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::opcode::Opcode;
use crate::unit::{CodeUnit, FunctionDef, UnitKind};
use rustc_hash::FxHashMap;
use std::fmt;

/// Bytecode verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Invalid opcode
    #[error("Invalid opcode {opcode:#x} at offset {offset}")]
    InvalidOpcode {
        /// Offending byte
        opcode: u8,
        /// Offset of the byte
        offset: usize,
    },

    /// Stack underflow
    #[error("Stack underflow in {function} at offset {offset}")]
    StackUnderflow {
        /// Function name
        function: String,
        /// Instruction offset
        offset: usize,
    },

    /// Two paths reach an instruction with different depths
    #[error("Stack depth mismatch in {function} at offset {offset}: {first} vs {second}")]
    StackMismatch {
        /// Function name
        function: String,
        /// Instruction offset
        offset: usize,
        /// Depth recorded first
        first: i32,
        /// Conflicting depth
        second: i32,
    },

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Computed target
        target: i64,
        /// Jump offset
        offset: usize,
    },

    /// Invalid local slot
    #[error("Invalid local slot {slot} (max {max}) at offset {offset}")]
    InvalidLocalRef {
        /// Slot operand
        slot: u16,
        /// Frame size
        max: u16,
        /// Instruction offset
        offset: usize,
    },

    /// Invalid global index
    #[error("Invalid global {index} at offset {offset}")]
    InvalidGlobalRef {
        /// Global operand
        index: u16,
        /// Instruction offset
        offset: usize,
    },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference: index {index} at offset {offset}")]
    InvalidConstantRef {
        /// Pool index
        index: u32,
        /// Instruction offset
        offset: usize,
    },

    /// Invalid call-site reference
    #[error("Invalid call site {index} at offset {offset}")]
    InvalidCallSite {
        /// Call-site index
        index: u32,
        /// Instruction offset
        offset: usize,
    },

    /// `NEW_STRUCT` outside a struct unit, or with the wrong member count
    #[error("Invalid struct construction with {count} members at offset {offset}")]
    InvalidStruct {
        /// Count operand
        count: u16,
        /// Instruction offset
        offset: usize,
    },

    /// Lookup switch keys must be strictly ascending
    #[error("Unsorted lookup switch keys at offset {0}")]
    UnsortedSwitch(usize),

    /// Malformed exception table entry
    #[error("Invalid exception handler {index} in {function}")]
    InvalidHandler {
        /// Function name
        function: String,
        /// Entry index
        index: usize,
    },

    /// Execution falls off end
    #[error("Execution falls off end of {0}")]
    FallOffEnd(String),

    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),
}

/// Decoded operand of an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 16-bit slot, global, position or field index
    U16(u16),
    /// 32-bit index or code point
    U32(u32),
    /// 32-bit integer or relative jump offset
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// `NEW_VARIANT` operands
    Variant {
        /// Constant-pool index of the variant name
        name: u32,
        /// Member count
        count: u16,
    },
    /// `LOOKUP_SWITCH` operands, offsets relative to the switch
    Switch {
        /// Offset taken when no key matches
        default: i32,
        /// (key, offset) pairs
        cases: Vec<(i32, i32)>,
    },
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the opcode
    pub offset: usize,
    /// Opcode
    pub opcode: Opcode,
    /// Decoded operand
    pub operand: Operand,
    /// Encoded size, opcode included
    pub size: usize,
}

impl Instruction {
    /// Absolute targets of a jump or switch
    pub fn jump_targets(&self) -> Vec<i64> {
        let base = self.offset as i64;
        match (&self.operand, self.opcode) {
            (Operand::I32(rel), Opcode::Jmp | Opcode::JmpIfFalse | Opcode::JmpIfTrue) => {
                vec![base + *rel as i64]
            }
            (Operand::Switch { default, cases }, _) => std::iter::once(*default)
                .chain(cases.iter().map(|(_, rel)| *rel))
                .map(|rel| base + rel as i64)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>4}: {}", self.offset, self.opcode.name())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::U16(v) => write!(f, " {}", v),
            Operand::U32(v) => write!(f, " {}", v),
            Operand::I32(v) if self.opcode.is_jump() => write!(f, " {:+}", v),
            Operand::I32(v) => write!(f, " {}", v),
            Operand::I64(v) => write!(f, " {}", v),
            Operand::F32(v) => write!(f, " {}", v),
            Operand::F64(v) => write!(f, " {}", v),
            Operand::Variant { name, count } => write!(f, " #{} {}", name, count),
            Operand::Switch { default, cases } => {
                write!(f, " default {:+}", default)?;
                for (key, rel) in cases {
                    write!(f, ", {} => {:+}", key, rel)?;
                }
                Ok(())
            }
        }
    }
}

/// Decode an instruction stream
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>, VerifyError> {
    let mut reader = BytecodeReader::new(code);
    let mut instructions = Vec::new();

    while reader.has_more() {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(VerifyError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;
        let operand = match opcode {
            Opcode::ConstI32 | Opcode::Jmp | Opcode::JmpIfFalse | Opcode::JmpIfTrue => {
                Operand::I32(reader.read_i32()?)
            }
            Opcode::ConstI64 => Operand::I64(reader.read_i64()?),
            Opcode::ConstF32 => Operand::F32(reader.read_f32()?),
            Opcode::ConstF64 => Operand::F64(reader.read_f64()?),
            Opcode::ConstChar | Opcode::ConstStr | Opcode::Invoke => {
                Operand::U32(reader.read_u32()?)
            }
            Opcode::LoadLocal
            | Opcode::StoreLocal
            | Opcode::LoadGlobal
            | Opcode::StoreGlobal
            | Opcode::BindArgs
            | Opcode::GetField
            | Opcode::NewStruct
            | Opcode::SetField => Operand::U16(reader.read_u16()?),
            Opcode::NewVariant => Operand::Variant {
                name: reader.read_u32()?,
                count: reader.read_u16()?,
            },
            Opcode::LookupSwitch => {
                let default = reader.read_i32()?;
                let count = reader.read_u32()?;
                let mut cases = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    cases.push((reader.read_i32()?, reader.read_i32()?));
                }
                Operand::Switch { default, cases }
            }
            _ => Operand::None,
        };
        instructions.push(Instruction {
            offset,
            opcode,
            operand,
            size: reader.position() - offset,
        });
    }

    Ok(instructions)
}

/// Verify every function of a unit
pub fn verify_unit(unit: &CodeUnit) -> Result<(), VerifyError> {
    for function in &unit.functions {
        verify_function(unit, function)?;
    }
    Ok(())
}

fn verify_function(unit: &CodeUnit, function: &FunctionDef) -> Result<(), VerifyError> {
    let instructions = decode_instructions(&function.code)?;
    if instructions.is_empty() {
        return Err(VerifyError::FallOffEnd(function.name.clone()));
    }
    let by_offset: FxHashMap<usize, usize> = instructions
        .iter()
        .enumerate()
        .map(|(index, instr)| (instr.offset, index))
        .collect();

    for instr in &instructions {
        verify_operands(unit, function, instr)?;
        for target in instr.jump_targets() {
            if target < 0 || !by_offset.contains_key(&(target as usize)) {
                return Err(VerifyError::InvalidJumpTarget {
                    target,
                    offset: instr.offset,
                });
            }
        }
    }

    let code_len = function.code.len() as u32;
    for (index, entry) in function.exception_table.iter().enumerate() {
        let valid = entry.start < entry.end
            && entry.end <= code_len
            && by_offset.contains_key(&(entry.start as usize))
            && by_offset.contains_key(&(entry.handler as usize));
        if !valid {
            return Err(VerifyError::InvalidHandler {
                function: function.name.clone(),
                index,
            });
        }
    }

    verify_stack_depth(unit, function, &instructions, &by_offset)
}

fn verify_operands(
    unit: &CodeUnit,
    function: &FunctionDef,
    instr: &Instruction,
) -> Result<(), VerifyError> {
    let offset = instr.offset;
    match (&instr.operand, instr.opcode) {
        (Operand::U16(slot), Opcode::LoadLocal | Opcode::StoreLocal) => {
            if *slot >= function.max_locals {
                return Err(VerifyError::InvalidLocalRef {
                    slot: *slot,
                    max: function.max_locals,
                    offset,
                });
            }
        }
        (Operand::U16(index), Opcode::LoadGlobal | Opcode::StoreGlobal) => {
            if *index as usize >= unit.globals.len() {
                return Err(VerifyError::InvalidGlobalRef {
                    index: *index,
                    offset,
                });
            }
        }
        (Operand::U32(index), Opcode::ConstStr) | (Operand::Variant { name: index, .. }, _) => {
            if *index as usize >= unit.constants.len() {
                return Err(VerifyError::InvalidConstantRef {
                    index: *index,
                    offset,
                });
            }
        }
        (Operand::U16(count), Opcode::NewStruct) => {
            if unit.kind != UnitKind::Struct || *count as usize != unit.members.len() {
                return Err(VerifyError::InvalidStruct {
                    count: *count,
                    offset,
                });
            }
        }
        (Operand::U32(index), Opcode::Invoke) => {
            if *index as usize >= unit.call_sites.len() {
                return Err(VerifyError::InvalidCallSite {
                    index: *index,
                    offset,
                });
            }
        }
        (Operand::Switch { cases, .. }, _) => {
            if cases.windows(2).any(|pair| pair[0].0 >= pair[1].0) {
                return Err(VerifyError::UnsortedSwitch(offset));
            }
        }
        _ => {}
    }
    Ok(())
}

/// (values required, net effect)
fn stack_effect(unit: &CodeUnit, instr: &Instruction) -> (i32, i32) {
    match instr.opcode {
        Opcode::Nop | Opcode::Jmp | Opcode::ReturnVoid => (0, 0),
        Opcode::Pop | Opcode::StoreLocal | Opcode::StoreGlobal => (1, -1),
        Opcode::JmpIfFalse | Opcode::JmpIfTrue | Opcode::LookupSwitch => (1, -1),
        Opcode::Return | Opcode::Throw => (1, -1),
        Opcode::Dup => (1, 1),
        Opcode::Swap => (2, 0),
        Opcode::ConstNull
        | Opcode::ConstTrue
        | Opcode::ConstFalse
        | Opcode::ConstI32
        | Opcode::ConstI64
        | Opcode::ConstF32
        | Opcode::ConstF64
        | Opcode::ConstChar
        | Opcode::ConstStr
        | Opcode::LoadLocal
        | Opcode::LoadGlobal
        | Opcode::NewList
        | Opcode::NewSet
        | Opcode::NewMap => (0, 1),
        Opcode::NewArray
        | Opcode::NewTuple
        | Opcode::NewVector
        | Opcode::CastFunction
        | Opcode::AsVarargs
        | Opcode::GetField => (1, 0),
        Opcode::TupleGet | Opcode::BindArgs => (2, -1),
        Opcode::CollectionAdd => (2, -2),
        Opcode::SetField => (2, -2),
        Opcode::StoreElem | Opcode::MapPut => (3, -3),
        Opcode::NewVariant => match instr.operand {
            Operand::Variant { count, .. } => (count as i32, 1 - count as i32),
            _ => (0, 1),
        },
        Opcode::NewStruct => match instr.operand {
            Operand::U16(count) => (count as i32, 1 - count as i32),
            _ => (0, 1),
        },
        Opcode::Invoke => match instr.operand {
            Operand::U32(index) => match unit.call_sites.get(index as usize) {
                Some(site) => (site.arity as i32, site.results() - site.arity as i32),
                None => (0, 0),
            },
            _ => (0, 0),
        },
    }
}

fn verify_stack_depth(
    unit: &CodeUnit,
    function: &FunctionDef,
    instructions: &[Instruction],
    by_offset: &FxHashMap<usize, usize>,
) -> Result<(), VerifyError> {
    let mut depths: Vec<Option<i32>> = vec![None; instructions.len()];
    let mut worklist: Vec<(usize, i32)> = vec![(0, 0)];
    for entry in &function.exception_table {
        if let Some(&index) = by_offset.get(&(entry.handler as usize)) {
            worklist.push((index, entry.stack_depth as i32 + 1));
        }
    }

    while let Some((index, depth)) = worklist.pop() {
        match depths[index] {
            Some(first) if first == depth => continue,
            Some(first) => {
                return Err(VerifyError::StackMismatch {
                    function: function.name.clone(),
                    offset: instructions[index].offset,
                    first,
                    second: depth,
                })
            }
            None => depths[index] = Some(depth),
        }

        let instr = &instructions[index];
        let (required, effect) = stack_effect(unit, instr);
        if depth < required {
            return Err(VerifyError::StackUnderflow {
                function: function.name.clone(),
                offset: instr.offset,
            });
        }
        let next_depth = depth + effect;

        for target in instr.jump_targets() {
            if let Some(&target_index) = by_offset.get(&(target as usize)) {
                worklist.push((target_index, next_depth));
            }
        }
        if !instr.opcode.is_terminator() {
            if index + 1 >= instructions.len() {
                return Err(VerifyError::FallOffEnd(function.name.clone()));
            }
            worklist.push((index + 1, next_depth));
        }
    }

    Ok(())
}
