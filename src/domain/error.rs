//! Domain error types.

use crate::domain::complexity::ComplexityFactors;
use crate::domain::token::Span;
use serde::Serialize;

/// A required structural element is missing or malformed.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("syntax error at line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    /// Token kinds or constructs that would have been accepted here.
    pub expected: Vec<String>,
    pub message: String,
}

impl SyntaxError {
    pub fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            column: span.column,
            expected: Vec::new(),
            message: message.into(),
        }
    }

    pub fn expecting(mut self, expected: &[&str]) -> Self {
        self.expected = expected.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Format the error with the offending source line and a caret under the column.
    pub fn display_with_context(&self, source: &str) -> String {
        let line = source.lines().nth(self.line.saturating_sub(1)).unwrap_or("");
        let caret = " ".repeat(self.column.saturating_sub(1)) + "^";
        let mut rendered = format!("{line}\n{caret}\n{err}", line = line, caret = caret, err = self);
        if !self.expected.is_empty() {
            rendered.push_str(&format!("\nexpected one of: {}", self.expected.join(", ")));
        }
        rendered
    }
}

/// A recognised construct that mechanical conversion does not model.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("unsupported construct at line {}, column {}: {description}", span.line, span.column)]
pub struct UnsupportedConstruct {
    pub span: Span,
    pub description: String,
}

impl UnsupportedConstruct {
    pub fn new(span: Span, description: impl Into<String>) -> Self {
        Self {
            span,
            description: description.into(),
        }
    }
}

/// The script is too complex for mechanical conversion.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("complexity score {score:.3} is at or above the mechanical threshold {threshold:.2}")]
pub struct ComplexityRejected {
    pub score: f64,
    pub threshold: f64,
    pub factors: ComplexityFactors,
}

/// Generated source failed its own syntax check. Always a generator bug.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("generated source for `{script}` failed its syntax check: {message}")]
pub struct GeneratorInvariantViolation {
    pub script: String,
    pub message: String,
}

/// Top-level error type for pinecast.
#[derive(Debug, thiserror::Error)]
pub enum PinecastError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Generator(#[from] GeneratorInvariantViolation),

    #[error("no scripts found in {path}")]
    NoScripts { path: String },

    /// Some scripts need the fallback converter.
    #[error("{rejected} of {total} scripts were rejected")]
    Rejected { rejected: usize, total: usize },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&PinecastError> for std::process::ExitCode {
    fn from(err: &PinecastError) -> Self {
        let code: u8 = match err {
            PinecastError::Io(_) | PinecastError::Json(_) => 1,
            PinecastError::ConfigParse { .. }
            | PinecastError::ConfigMissing { .. }
            | PinecastError::ConfigInvalid { .. } => 2,
            PinecastError::Rejected { .. } => 3,
            PinecastError::Syntax(_) => 4,
            PinecastError::NoScripts { .. } => 5,
            PinecastError::Generator(_) => 70,
        };
        std::process::ExitCode::from(code)
    }
}
