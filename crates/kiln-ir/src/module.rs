//! Module arena: functions, scopes and references

use crate::node::Block;
use crate::span::Span;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Index of a function in [`Module::functions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// Index of a scope in [`Module::scopes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Index of a reference in [`Module::references`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub u32);

/// Storage class of a named reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// `var` local
    Variable,
    /// `let` local
    Constant,
    /// Module-level `var`
    ModuleVariable,
    /// Module-level `let`
    ModuleConstant,
    /// Introduced by an upstream pass (captures, closure self names, loop temporaries)
    Synthetic,
}

/// A named storage location
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub name: String,
    pub kind: ReferenceKind,
    /// Scope owning this reference
    pub scope: ScopeId,
}

impl Reference {
    pub fn is_module_state(&self) -> bool {
        matches!(
            self.kind,
            ReferenceKind::ModuleVariable | ReferenceKind::ModuleConstant
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            ReferenceKind::Constant | ReferenceKind::ModuleConstant
        )
    }

    pub fn is_synthetic(&self) -> bool {
        self.kind == ReferenceKind::Synthetic
    }
}

/// Reference table attached to a block
///
/// Lookups walk the parent chain; ownership is per scope, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    owned: Vec<RefId>,
    names: FxHashMap<String, RefId>,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>) -> Self {
        Self {
            parent,
            owned: Vec::new(),
            names: FxHashMap::default(),
        }
    }

    /// References declared directly in this scope, in declaration order
    pub fn owned(&self) -> &[RefId] {
        &self.owned
    }

    /// Look a name up in this scope only
    pub fn get_owned(&self, name: &str) -> Option<RefId> {
        self.names.get(name).copied()
    }

    /// A redeclared name shadows the earlier entry but both stay owned
    pub(crate) fn insert(&mut self, name: String, id: RefId) {
        self.names.insert(name, id);
        self.owned.push(id);
    }
}

/// Function visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Role flags of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionFlags {
    /// Program entry point
    pub main: bool,
    /// Module initializer, the only place module constants may be assigned
    pub module_init: bool,
    /// Generated by an upstream pass (closures, decorators)
    pub synthetic: bool,
    pub decorator: bool,
    pub decorated: bool,
}

/// A function declaration
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Parameter names; captured names of a closure come first
    pub parameters: Vec<String>,
    pub varargs: bool,
    pub visibility: Visibility,
    pub flags: FunctionFlags,
    /// Name of the function producing this function's decorator
    pub decorator_ref: Option<String>,
    /// Local name a synthetic closure uses to refer to itself
    pub self_name: Option<String>,
    /// Captured names, a prefix of `parameters`
    pub synthetic_parameters: Vec<String>,
    pub body: Block,
    pub span: Span,
}

impl Function {
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_synthetic(&self) -> bool {
        self.flags.synthetic
    }
}

/// One case of an algebraic type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: String,
    pub members: Vec<String>,
}

/// A closed sum type declared by the module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Union {
    pub name: String,
    pub variants: Vec<Variant>,
}

/// A record type declared by the module
///
/// Members whose name starts with `_` are private to the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Struct {
    pub name: String,
    pub members: Vec<String>,
}

impl Struct {
    pub fn is_private_member(name: &str) -> bool {
        name.starts_with('_')
    }

    /// Members visible outside the module, in declaration order
    pub fn public_members(&self) -> impl Iterator<Item = &String> + '_ {
        self.members.iter().filter(|m| !Self::is_private_member(m))
    }
}

/// IR of one module
#[derive(Debug, Clone)]
pub struct Module {
    /// Fully qualified module name, e.g. `acme.Tools`
    pub name: String,
    pub source_file: Option<String>,
    /// Imported qualified names, deduplicated, in declaration order
    pub imports: Vec<String>,
    /// Every function of the module, including extension members and closures
    pub functions: Vec<Function>,
    /// Module-level functions (closures included) in declaration order
    pub top_level: Vec<FunctionId>,
    /// Extension groups keyed by the extended type
    pub extensions: BTreeMap<String, Vec<FunctionId>>,
    /// Extension groups declared under a name
    pub named_extensions: BTreeMap<String, Vec<FunctionId>>,
    /// Extended type -> names of the extension groups applied to it
    pub extension_applications: BTreeMap<String, Vec<String>>,
    pub structs: Vec<Struct>,
    pub unions: Vec<Union>,
    /// Module-level variables and constants
    pub module_state: Vec<RefId>,
    pub scopes: Vec<Scope>,
    pub references: Vec<Reference>,
    /// Scope holding the module state, parent of every function's outer scope
    pub global_scope: ScopeId,
}

impl Module {
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn reference(&self, id: RefId) -> &Reference {
        &self.references[id.0 as usize]
    }

    /// Resolve a name from `scope` outwards
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<RefId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let table = self.scope(id);
            if let Some(found) = table.get_owned(name) {
                return Some(found);
            }
            current = table.parent;
        }
        None
    }

    /// Functions in resolution and emission order: module functions, then
    /// extension groups, then named extension groups
    pub fn all_functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.top_level
            .iter()
            .chain(self.extensions.values().flatten())
            .chain(self.named_extensions.values().flatten())
            .copied()
    }

    /// Module name split into (package, simple name)
    pub fn package_and_class(&self) -> (&str, &str) {
        match self.name.rfind('.') {
            Some(index) => (&self.name[..index], &self.name[index + 1..]),
            None => ("", self.name.as_str()),
        }
    }
}
