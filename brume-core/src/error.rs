use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("prelude directory was not found at {0}")]
    MissingPrelude(PathBuf),
    #[error("lex error at byte {position}: {message}")]
    LexError { position: usize, message: String },
    #[error("parse error at {span}: {message}")]
    ParseError { message: String, span: Span },
    #[error("failed to encode module interface: {0}")]
    InterfaceEncoding(#[from] serde_json::Error),

    #[error("unbound name `{name}` at {span}")]
    UnboundName { name: String, span: Span },
    #[error("type mismatch at {span}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("`{name}` is already declared in this scope ({span})")]
    Redeclaration { name: String, span: Span },
    #[error("ambiguous call to `{name}` at {span}: {candidates} candidates match")]
    AmbiguousOverload {
        name: String,
        candidates: usize,
        span: Span,
    },
    #[error("no matching overload of `{name}` at {span}")]
    NoMatchingOverload { name: String, span: Span },
    #[error("invalid instance of `{typeclass}` at {span}: {reason}")]
    InvalidInstance {
        typeclass: String,
        reason: String,
        span: Span,
    },
    #[error("analysis cannot make progress at {span}: dependency cycle")]
    CyclicDependency { span: Span },

    #[error("internal error: insertion of `{name}` into a closed scope")]
    ScopeClosed { name: String },
    #[error("internal error: {construct} reached {stage}")]
    MalformedConstruct {
        construct: String,
        stage: &'static str,
    },
}

impl CoreError {
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>, span: Span) -> Self {
        CoreError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn malformed(construct: impl Into<String>, stage: &'static str) -> Self {
        CoreError::MalformedConstruct {
            construct: construct.into(),
            stage,
        }
    }

    /// Source range of a user-facing error.
    pub fn span(&self) -> Option<Span> {
        match self {
            CoreError::ParseError { span, .. }
            | CoreError::UnboundName { span, .. }
            | CoreError::TypeMismatch { span, .. }
            | CoreError::Redeclaration { span, .. }
            | CoreError::AmbiguousOverload { span, .. }
            | CoreError::NoMatchingOverload { span, .. }
            | CoreError::InvalidInstance { span, .. }
            | CoreError::CyclicDependency { span } => Some(*span),
            _ => None,
        }
    }

    /// Internal defects indicate a pipeline ordering bug rather than a
    /// problem in the user's program.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CoreError::ScopeClosed { .. } | CoreError::MalformedConstruct { .. }
        )
    }
}

impl From<&CoreError> for Diagnostic {
    fn from(error: &CoreError) -> Self {
        let diagnostic = Diagnostic::error(error.to_string(), error.span().unwrap_or_default());
        match error {
            CoreError::LexError { .. } => diagnostic.with_code("E0001"),
            CoreError::ParseError { .. } => diagnostic.with_code("E0100"),
            CoreError::UnboundName { .. } => diagnostic.with_code("E0200"),
            CoreError::TypeMismatch { .. } => diagnostic.with_code("E0201"),
            CoreError::Redeclaration { .. } => diagnostic.with_code("E0202"),
            CoreError::AmbiguousOverload { .. } => diagnostic.with_code("E0203"),
            CoreError::NoMatchingOverload { .. } => diagnostic.with_code("E0204"),
            CoreError::InvalidInstance { .. } => diagnostic.with_code("E0205"),
            CoreError::CyclicDependency { .. } => diagnostic.with_code("E0206"),
            _ => diagnostic,
        }
    }
}
