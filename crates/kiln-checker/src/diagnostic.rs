//! Diagnostic infrastructure for problem reporting
//!
//! Renders resolver problems with source context on a terminal, or as JSON
//! for editor integration.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, LabelStyle, Severity};
use codespan_reporting::files::{Files, SimpleFiles};
use codespan_reporting::term;
use kiln_ir::Span;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use termcolor::{ColorChoice, StandardStream, WriteColor};

use crate::problem::{Problem, ProblemKind};

/// Error code for a diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode(pub &'static str);

impl ErrorCode {
    /// The code text, e.g. `K1003`
    pub fn as_str(&self) -> &str {
        self.0
    }
}

/// A diagnostic message with source code context
pub struct Diagnostic {
    inner: CsDiagnostic<usize>,
    code: Option<ErrorCode>,
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            inner: CsDiagnostic::new(Severity::Error).with_message(message),
            code: None,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.inner = self.inner.with_code(code.0);
        self.code = Some(code);
        self
    }

    /// Add a primary label
    pub fn with_primary_label(mut self, file_id: usize, span: Span, message: impl Into<String>) -> Self {
        let label = Label::primary(file_id, span.start..span.end).with_message(message);
        self.inner.labels.push(label);
        self
    }

    /// Add a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.inner.notes.push(note.into());
        self
    }

    /// Add a help suggestion
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.inner.notes.push(format!("help: {}", help.into()));
        self
    }

    /// Create a diagnostic from a resolver problem
    pub fn from_problem(problem: &Problem, file_id: usize) -> Self {
        let diag = Diagnostic::error(problem.description.clone())
            .with_code(error_code(problem.kind))
            .with_primary_label(file_id, problem.span, problem.kind.label());

        match problem.kind {
            ProblemKind::AssignConstant => {
                diag.with_help("declare the reference with `var` if it must change")
            }
            ProblemKind::UninitializedReferenceAccess => {
                diag.with_note("a reference is only readable after its declaring assignment")
            }
            _ => diag,
        }
    }

    /// Error code, if set
    pub fn code(&self) -> Option<&ErrorCode> {
        self.code.as_ref()
    }

    /// Main message
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Emit the diagnostic to stderr with colors
    pub fn emit(&self, files: &SimpleFiles<String, String>) -> Result<(), codespan_reporting::files::Error> {
        let mut writer = StandardStream::stderr(ColorChoice::Auto);
        self.emit_to(&mut writer, files)
    }

    /// Emit the diagnostic to any color-capable writer
    pub fn emit_to(
        &self,
        writer: &mut dyn WriteColor,
        files: &SimpleFiles<String, String>,
    ) -> Result<(), codespan_reporting::files::Error> {
        let config = term::Config::default();
        term::emit(writer, &config, files, &self.inner)
    }

    /// Get the underlying codespan diagnostic
    pub fn inner(&self) -> &CsDiagnostic<usize> {
        &self.inner
    }

    /// Convert to JSON representation for IDE integration
    pub fn to_json(&self, files: &SimpleFiles<String, String>) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&JsonDiagnostic::from_diagnostic(self, files))
    }
}

/// JSON representation of a diagnostic
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonDiagnostic {
    /// Error code (e.g., "K1001")
    pub code: Option<String>,
    /// Severity level
    pub severity: String,
    /// Main message
    pub message: String,
    /// Source locations with labels
    pub labels: Vec<JsonLabel>,
    /// Additional notes and help
    pub notes: Vec<String>,
}

/// JSON representation of a diagnostic label
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLabel {
    /// File path
    pub file: String,
    /// Start line (1-indexed)
    pub start_line: usize,
    /// Start column (1-indexed)
    pub start_column: usize,
    /// End line (1-indexed)
    pub end_line: usize,
    /// End column (1-indexed)
    pub end_column: usize,
    /// Label message
    pub message: Option<String>,
    /// Label style (primary or secondary)
    pub style: String,
}

impl JsonDiagnostic {
    /// Convert a Diagnostic to its JSON representation
    pub fn from_diagnostic(diag: &Diagnostic, files: &SimpleFiles<String, String>) -> Self {
        let severity = match diag.inner.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
            Severity::Help => "help",
            Severity::Bug => "bug",
        };

        let labels = diag
            .inner
            .labels
            .iter()
            .filter_map(|label| {
                let file = files.get(label.file_id).ok()?;
                let start = file.location((), label.range.start).ok()?;
                let end = file.location((), label.range.end).ok()?;
                Some(JsonLabel {
                    file: file.name().to_string(),
                    start_line: start.line_number,
                    start_column: start.column_number,
                    end_line: end.line_number,
                    end_column: end.column_number,
                    message: Some(label.message.clone()),
                    style: match label.style {
                        LabelStyle::Primary => "primary",
                        LabelStyle::Secondary => "secondary",
                    }
                    .to_string(),
                })
            })
            .collect();

        JsonDiagnostic {
            code: diag.code.as_ref().map(|c| c.0.to_string()),
            severity: severity.to_string(),
            message: diag.inner.message.clone(),
            labels,
            notes: diag.inner.notes.clone(),
        }
    }
}

/// Get the error code of a problem kind
pub fn error_code(kind: ProblemKind) -> ErrorCode {
    ErrorCode(kind.code())
}

/// Helper to create a SimpleFiles instance from source code
pub fn create_files(path: impl Into<PathBuf>, source: impl Into<String>) -> SimpleFiles<String, String> {
    let mut files = SimpleFiles::new();
    files.add(path.into().display().to_string(), source.into());
    files
}
