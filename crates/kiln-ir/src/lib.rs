//! Kiln IR - the tree handed to the back end
//!
//! A module is an arena: functions, scopes and references live in flat
//! vectors and refer to each other through small copyable ids. The tree of
//! statements and expressions hangs off each function's body block.
//!
//! The IR is produced by an upstream builder (see [`builder`]) after closure
//! capture discovery, then read by `kiln-checker` and `kiln-compiler`.

pub mod builder;
pub mod module;
pub mod node;
pub mod span;

pub use builder::{BuildError, ClosureOptions, FunctionBuilder, ModuleBuilder};
pub use module::{
    Function, FunctionFlags, FunctionId, Module, RefId, Reference, ReferenceKind, Scope, ScopeId,
    Struct, Union, Variant, Visibility,
};
pub use node::{
    Argument, Assignment, BinaryOp, Block, CatchClause, CollectionKind, CollectionLiteral,
    Conditional, Constant, ElseBranch, Expr, FunctionInvocation, Loop, LoopControl,
    LoopControlKind, MethodInvocation, NodeId, Return, Statement, Throw, TryCatchFinally,
    TryKind, UnaryOp,
};
pub use span::Span;
