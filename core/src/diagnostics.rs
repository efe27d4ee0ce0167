use crate::parser::DocumentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `Error` marks a document that could not be read from disk, `Warning` one
/// that was read but rejected by the parser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

impl DiagnosticLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warn",
        }
    }
}

/// A scan document left out of the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub document: String,
    pub message: String,
}

impl Diagnostic {
    pub fn skipped_document(document: impl Into<String>, err: &DocumentError) -> Self {
        let (level, message) = match err {
            DocumentError::Io(_) => (
                DiagnosticLevel::Error,
                format!("document unreadable: {err}"),
            ),
            _ => (DiagnosticLevel::Warning, format!("document skipped: {err}")),
        };
        Self {
            level,
            document: document.into(),
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.level.as_str(),
            self.document,
            self.message
        )
    }
}
