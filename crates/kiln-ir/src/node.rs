//! Statement and expression nodes

use crate::module::{FunctionId, RefId, ScopeId};
use crate::span::Span;

/// Identity of a node that later passes annotate (calls, loops, loop control)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Ordered statements plus the scope they declare into
#[derive(Debug, Clone)]
pub struct Block {
    pub scope: ScopeId,
    pub statements: Vec<Statement>,
}

impl Block {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            statements: Vec::new(),
        }
    }

    /// Whether the block unconditionally leaves the function at its own level
    pub fn has_return(&self) -> bool {
        self.statements
            .iter()
            .any(|s| matches!(s, Statement::Return(_) | Statement::Throw(_)))
    }

    /// Whether control can reach the end of the block
    pub fn falls_through(&self) -> bool {
        !matches!(
            self.statements.last(),
            Some(Statement::Return(_)) | Some(Statement::Throw(_))
        )
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    /// Expression evaluated for its side effects
    Expr(Expr),
    Assign(Assignment),
    Return(Return),
    Throw(Throw),
    If(Conditional),
    Loop(Loop),
    LoopControl(LoopControl),
    Try(TryCatchFinally),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Expr(e) => e.span(),
            Statement::Assign(a) => a.span,
            Statement::Return(r) => r.span,
            Statement::Throw(t) => t.span,
            Statement::If(c) => c.span,
            Statement::Loop(l) => l.span,
            Statement::LoopControl(c) => c.span,
            Statement::Try(t) => t.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub target: RefId,
    pub value: Expr,
    /// Introduces the binding (`let`/`var`) rather than updating it
    pub declaring: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Return {
    /// `None` returns nothing (entry point and initializer)
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Throw {
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Conditional {
    pub condition: Expr,
    pub then_block: Block,
    pub otherwise: Option<ElseBranch>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ElseBranch {
    Block(Block),
    If(Box<Conditional>),
}

/// Counted and conditional loops share one shape
#[derive(Debug, Clone)]
pub struct Loop {
    pub id: NodeId,
    pub init: Option<Box<Statement>>,
    /// A missing condition loops until a `break`
    pub condition: Option<Expr>,
    pub body: Block,
    pub post: Option<Box<Statement>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControlKind {
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub struct LoopControl {
    pub id: NodeId,
    pub kind: LoopControlKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    /// Name of the reference, owned by `block`, receiving the thrown value
    pub exception: String,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct TryCatchFinally {
    pub try_block: Block,
    pub catch: Option<CatchClause>,
    pub finally: Option<Block>,
    pub span: Span,
}

/// Shape of a try statement, fixed by which optional blocks are present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryKind {
    TryOnly,
    TryCatch,
    TryFinally,
    TryCatchFinally,
}

impl TryCatchFinally {
    pub fn kind(&self) -> TryKind {
        match (&self.catch, &self.finally) {
            (None, None) => TryKind::TryOnly,
            (Some(_), None) => TryKind::TryCatch,
            (None, Some(_)) => TryKind::TryFinally,
            (Some(_), Some(_)) => TryKind::TryCatchFinally,
        }
    }
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(String),
    /// Reference to a type by qualified name
    ClassRef(String),
    /// Reference to a function, optionally qualified by its module
    FunctionRef { module: Option<String>, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    Less,
    LessOrEquals,
    More,
    MoreOrEquals,
    And,
    Or,
    Is,
    Isnt,
    OrIfNull,
    /// `receiver: method(...)`
    MethodCall,
    /// `receiver?: method(...)`
    ElvisMethodCall,
    /// `(callable)(...)` where the right side is an anonymous invocation
    AnonCall,
}

impl BinaryOp {
    /// Operator call-site name
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Plus => "plus",
            BinaryOp::Minus => "minus",
            BinaryOp::Times => "times",
            BinaryOp::Divide => "divide",
            BinaryOp::Modulo => "modulo",
            BinaryOp::Equals => "equals",
            BinaryOp::NotEquals => "notequals",
            BinaryOp::Less => "less",
            BinaryOp::LessOrEquals => "lessorequals",
            BinaryOp::More => "more",
            BinaryOp::MoreOrEquals => "moreorequals",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Is => "is",
            BinaryOp::Isnt => "isnt",
            BinaryOp::OrIfNull => "orifnull",
            BinaryOp::MethodCall => "method_call",
            BinaryOp::ElvisMethodCall => "elvis_method_call",
            BinaryOp::AnonCall => "anon_call",
        }
    }

    /// Operations whose right operand is itself the call consuming the left one
    pub fn is_method_call(&self) -> bool {
        matches!(
            self,
            BinaryOp::MethodCall | BinaryOp::ElvisMethodCall | BinaryOp::AnonCall
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Tuple,
    Array,
    List,
    Vector,
    Set,
    Map,
}

#[derive(Debug, Clone)]
pub struct CollectionLiteral {
    pub kind: CollectionKind,
    pub items: Vec<Expr>,
    pub span: Span,
}

/// A call argument, labelled when the call uses named arguments
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

impl Argument {
    pub fn positional(value: Expr) -> Self {
        Self { name: None, value }
    }

    pub fn named(name: impl Into<String>, value: Expr) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionInvocation {
    pub id: NodeId,
    pub name: String,
    pub arguments: Vec<Argument>,
    /// Result may be cached by the call site after the first call
    pub constant: bool,
    /// Invokes the callable already on the operand stack
    pub anonymous: bool,
    /// Chained `f(a)(b)(c)` calls applied to this call's result
    pub anonymous_calls: Vec<FunctionInvocation>,
    pub span: Span,
}

impl FunctionInvocation {
    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    pub fn uses_named_arguments(&self) -> bool {
        !self.arguments.is_empty() && self.arguments.iter().all(|a| a.name.is_some())
    }

    pub fn with_anonymous_call(mut self, call: FunctionInvocation) -> Self {
        self.anonymous_calls.push(call);
        self
    }
}

#[derive(Debug, Clone)]
pub struct MethodInvocation {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub null_safe: bool,
    pub anonymous_calls: Vec<FunctionInvocation>,
    pub span: Span,
}

impl MethodInvocation {
    pub fn new(name: impl Into<String>, arguments: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(Argument::positional).collect(),
            null_safe: false,
            anonymous_calls: Vec::new(),
            span: Span::default(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    pub fn uses_named_arguments(&self) -> bool {
        !self.arguments.is_empty() && self.arguments.iter().all(|a| a.name.is_some())
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Constant { value: Constant, span: Span },
    Lookup { name: String, span: Span },
    Call(FunctionInvocation),
    Method(MethodInvocation),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Collection(CollectionLiteral),
    /// Callable handle on a function of the same module
    Closure { target: FunctionId, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Constant { span, .. }
            | Expr::Lookup { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Closure { span, .. } => *span,
            Expr::Call(call) => call.span,
            Expr::Method(call) => call.span,
            Expr::Collection(literal) => literal.span,
        }
    }

    pub fn constant(value: Constant) -> Self {
        Expr::Constant {
            value,
            span: Span::default(),
        }
    }

    pub fn null() -> Self {
        Self::constant(Constant::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self::constant(Constant::Bool(value))
    }

    pub fn int(value: i32) -> Self {
        Self::constant(Constant::Int(value))
    }

    pub fn long(value: i64) -> Self {
        Self::constant(Constant::Long(value))
    }

    pub fn float(value: f32) -> Self {
        Self::constant(Constant::Float(value))
    }

    pub fn double(value: f64) -> Self {
        Self::constant(Constant::Double(value))
    }

    pub fn char(value: char) -> Self {
        Self::constant(Constant::Char(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::constant(Constant::Str(value.into()))
    }

    pub fn class_ref(name: impl Into<String>) -> Self {
        Self::constant(Constant::ClassRef(name.into()))
    }

    pub fn function_ref(module: Option<&str>, name: impl Into<String>) -> Self {
        Self::constant(Constant::FunctionRef {
            module: module.map(str::to_string),
            name: name.into(),
        })
    }

    pub fn lookup(name: impl Into<String>) -> Self {
        Expr::Lookup {
            name: name.into(),
            span: Span::default(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: Span::default(),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
            span: Span::default(),
        }
    }

    pub fn collection(kind: CollectionKind, items: Vec<Expr>) -> Self {
        Expr::Collection(CollectionLiteral {
            kind,
            items,
            span: Span::default(),
        })
    }

    /// `receiver: name(arguments...)`
    pub fn method_call(receiver: Expr, invocation: MethodInvocation) -> Self {
        Self::binary(BinaryOp::MethodCall, receiver, Expr::Method(invocation))
    }

    /// `receiver?: name(arguments...)`
    pub fn elvis_call(receiver: Expr, mut invocation: MethodInvocation) -> Self {
        invocation.null_safe = true;
        Self::binary(BinaryOp::ElvisMethodCall, receiver, Expr::Method(invocation))
    }

    /// `(callable)(arguments...)`; `invocation` must be anonymous
    pub fn anon_call(callable: Expr, invocation: FunctionInvocation) -> Self {
        Self::binary(BinaryOp::AnonCall, callable, Expr::Call(invocation))
    }

    pub fn with_span(mut self, new_span: Span) -> Self {
        match &mut self {
            Expr::Constant { span, .. }
            | Expr::Lookup { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Closure { span, .. } => *span = new_span,
            Expr::Call(call) => call.span = new_span,
            Expr::Method(call) => call.span = new_span,
            Expr::Collection(literal) => literal.span = new_span,
        }
        self
    }
}
