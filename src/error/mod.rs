//! Error types for every phase of the pipeline.

use thiserror::Error;

/// Scanner errors.
#[derive(Debug, Error)]
pub enum LexerError {
    #[error("Unexpected character.")]
    UnexpectedChar { line: usize },

    #[error("Unterminated string.")]
    UnterminatedString { line: usize },
}

impl LexerError {
    pub fn unexpected_char(line: usize) -> Self {
        Self::UnexpectedChar { line }
    }

    pub fn unterminated_string(line: usize) -> Self {
        Self::UnterminatedString { line }
    }

    pub fn line(&self) -> usize {
        match self {
            Self::UnexpectedChar { line } => *line,
            Self::UnterminatedString { line } => *line,
        }
    }
}

/// Compilation failure: every diagnostic that was reported on the way to EOF.
///
/// Diagnostics are already formatted (`[line N] Error at 'x': message`) and
/// were printed to stderr as they were encountered; they are kept here so the
/// caller (and the test suite) can inspect them.
#[derive(Debug, Error)]
#[error("{}", .diagnostics.join("\n"))]
pub struct CompileError {
    pub diagnostics: Vec<String>,
}

impl CompileError {
    pub fn new(diagnostics: Vec<String>) -> Self {
        Self { diagnostics }
    }
}

/// A runtime error with the stack trace captured at the point of failure.
///
/// The trace lists frames deepest-first, one `[line N] in f` entry per frame.
#[derive(Debug, Error)]
#[error("{message}\n{}", .trace.join("\n"))]
pub struct RuntimeError {
    pub message: String,
    pub line: usize,
    pub trace: Vec<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
            trace: Vec::new(),
        }
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum LoxError {
    #[error("{0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
