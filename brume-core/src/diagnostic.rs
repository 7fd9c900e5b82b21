//! Diagnostics produced by the front end and carried out of the pipeline.
//!
//! Formatting them for humans belongs to the driver; this module only
//! records what went wrong and where.

use std::borrow::Cow;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub code: Option<&'static str>,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(message: impl Into<Cow<'static, str>>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into().into_owned(),
            code: None,
            span,
        }
    }

    pub fn warning(message: impl Into<Cow<'static, str>>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into().into_owned(),
            code: None,
            span,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
