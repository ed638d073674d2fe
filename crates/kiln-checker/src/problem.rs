//! Collected compilation problems

use crate::diagnostic::{create_files, Diagnostic, JsonDiagnostic};
use kiln_ir::Span;
use serde::Serialize;
use std::fmt;

/// Kind of a user-facing resolver problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProblemKind {
    /// Write to a constant that is already assigned, or to a module
    /// constant outside the module initializer
    AssignConstant,
    /// A name declared twice in the same lexical chain
    DuplicateDeclarationInBlock,
    /// Read of a name with no visible declaration
    UndeclaredReference,
    /// Read of a local before its declaring assignment
    UninitializedReferenceAccess,
    /// `break` or `continue` with no enclosing loop
    BreakOrContinueOutsideLoop,
}

impl ProblemKind {
    /// Stable diagnostic code
    pub fn code(self) -> &'static str {
        match self {
            ProblemKind::AssignConstant => "K1001",
            ProblemKind::DuplicateDeclarationInBlock => "K1002",
            ProblemKind::UndeclaredReference => "K1003",
            ProblemKind::UninitializedReferenceAccess => "K1004",
            ProblemKind::BreakOrContinueOutsideLoop => "K1005",
        }
    }

    /// Short label shown under the offending span
    pub fn label(self) -> &'static str {
        match self {
            ProblemKind::AssignConstant => "constant reassigned here",
            ProblemKind::DuplicateDeclarationInBlock => "already declared",
            ProblemKind::UndeclaredReference => "not found in this scope",
            ProblemKind::UninitializedReferenceAccess => "read before assignment",
            ProblemKind::BreakOrContinueOutsideLoop => "not inside a loop",
        }
    }
}

/// A problem found by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// Problem kind
    pub kind: ProblemKind,
    /// Offending source position
    pub span: Span,
    /// Human-readable description
    pub description: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.description)
    }
}

/// Accumulates problems during a traversal
#[derive(Debug, Default)]
pub struct ProblemBuilder {
    problems: Vec<Problem>,
}

impl ProblemBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem
    pub fn report(&mut self, kind: ProblemKind, span: Span, description: impl Into<String>) {
        self.problems.push(Problem {
            kind,
            span,
            description: description.into(),
        });
    }

    /// Problems recorded so far
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Whether nothing was reported
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Consume the builder; `None` when nothing was reported
    pub fn into_failure(
        self,
        module: impl Into<String>,
        source_file: Option<String>,
    ) -> Option<CompilationFailure> {
        if self.problems.is_empty() {
            None
        } else {
            Some(CompilationFailure {
                module: module.into(),
                source_file,
                problems: self.problems,
            })
        }
    }
}

/// Every problem found in one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationFailure {
    /// Module name
    pub module: String,
    /// Source file, when known
    pub source_file: Option<String>,
    problems: Vec<Problem>,
}

impl CompilationFailure {
    /// Problems in traversal order
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Problems of one kind
    pub fn of_kind(&self, kind: ProblemKind) -> impl Iterator<Item = &Problem> + '_ {
        self.problems.iter().filter(move |p| p.kind == kind)
    }

    /// One diagnostic per problem, labelled against file id 0
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.problems
            .iter()
            .map(|problem| Diagnostic::from_problem(problem, 0))
            .collect()
    }

    /// JSON array of diagnostics rendered against `source`
    pub fn to_json(&self, source: &str) -> Result<String, serde_json::Error> {
        let name = self
            .source_file
            .clone()
            .unwrap_or_else(|| format!("{}.kiln", self.module));
        let files = create_files(name, source);
        let diagnostics: Vec<JsonDiagnostic> = self
            .diagnostics()
            .iter()
            .map(|diag| JsonDiagnostic::from_diagnostic(diag, &files))
            .collect();
        serde_json::to_string_pretty(&diagnostics)
    }
}

impl fmt::Display for CompilationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compilation of {} failed with {} problem{}",
            self.module,
            self.problems.len(),
            if self.problems.len() == 1 { "" } else { "s" }
        )?;
        for problem in &self.problems {
            write!(f, "\n  {}", problem)?;
        }
        Ok(())
    }
}
