//! Resolver output consumed by the code generator

use kiln_ir::{FunctionId, NodeId, RefId};
use rustc_hash::FxHashMap;

/// How a function invocation reaches its callee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Plain call by name, linked by the runtime
    Function,
    /// Call through the function value held by a local
    Reference(RefId),
    /// Call through the function value held by module state
    ModuleState(RefId),
}

/// A synthetic local bound on entry to a closure over its own function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfBinding {
    /// Local receiving the closure
    pub reference: RefId,
    /// Captured parameters re-bound into the closure, in capture order
    pub captured: Vec<RefId>,
}

/// Slots, call targets and loop bindings of one module
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub(crate) slots: FxHashMap<RefId, u16>,
    pub(crate) call_targets: FxHashMap<NodeId, CallTarget>,
    pub(crate) loops: FxHashMap<NodeId, NodeId>,
    pub(crate) self_bindings: FxHashMap<FunctionId, SelfBinding>,
    pub(crate) frame_sizes: FxHashMap<FunctionId, u16>,
}

impl Resolution {
    /// Slot of a local reference; `None` for module state
    pub fn slot(&self, reference: RefId) -> Option<u16> {
        self.slots.get(&reference).copied()
    }

    /// Target classification of a function invocation
    pub fn call_target(&self, invocation: NodeId) -> CallTarget {
        self.call_targets
            .get(&invocation)
            .copied()
            .unwrap_or(CallTarget::Function)
    }

    /// Loop a `break`/`continue` statement belongs to
    pub fn enclosing_loop(&self, control: NodeId) -> Option<NodeId> {
        self.loops.get(&control).copied()
    }

    /// Self binding of a synthetic closure function
    pub fn self_binding(&self, function: FunctionId) -> Option<&SelfBinding> {
        self.self_bindings.get(&function)
    }

    /// Number of local slots used by a function
    pub fn frame_size(&self, function: FunctionId) -> u16 {
        self.frame_sizes.get(&function).copied().unwrap_or(0)
    }
}
