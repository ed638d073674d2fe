//! Operand stack of one activation
//!
//! Each call gets its own stack; locals live beside it in the frame. The
//! depth reached here is what exception table entries record, so a handler
//! can truncate back to it.

use crate::{value::Value, VmError, VmResult};

/// Default maximum stack size (in slots)
const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 64;

/// Bounded operand stack
#[derive(Debug, Clone)]
pub struct Stack {
    slots: Vec<Value>,
    max_size: usize,
}

impl Stack {
    /// Create a new stack with default size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STACK_SIZE)
    }

    /// Create a stack holding at most `max_size` values
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_size.min(16)),
            max_size,
        }
    }

    /// Push a value onto the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.slots.len() >= self.max_size {
            return Err(VmError::StackOverflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Pop a value from the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        self.slots.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop `count` values, returned in push order
    pub fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        if count > self.slots.len() {
            return Err(VmError::StackUnderflow);
        }
        let start = self.slots.len() - count;
        Ok(self.slots.split_off(start))
    }

    /// Peek at the top value without popping
    pub fn peek(&self) -> VmResult<&Value> {
        self.slots.last().ok_or(VmError::StackUnderflow)
    }

    /// Drop values above `depth`
    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }

    /// Current number of values
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Check if stack is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maximum number of values
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}
