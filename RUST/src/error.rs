use std::fmt;
use thiserror::Error;

/// Failure raised while decoding a stream or while lazily computing a field.
///
/// Everything decoded before the failure stays available; the viewer shows
/// the partial graph and reports the error in a modal.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("end of stream: requested {requested} bytes at offset {pos}, only {available} available")]
    Eof {
        pos: usize,
        requested: usize,
        available: usize,
    },

    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("decode error: {0}")]
    Decode(String),
}

/// One entry of a structured format-resolution error list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub file: String,
    pub line: Option<usize>,
    pub col: Option<usize>,
    pub path: Vec<String>,
    pub message: String,
}

impl CompileError {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            col: None,
            path: Vec::new(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(col) = self.col {
                write!(f, ":{col}")?;
            }
        }
        if !self.path.is_empty() {
            write!(f, ":/{}", self.path.join("/"))?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileErrors(pub Vec<CompileError>);

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", if self.0.len() > 1 { "Errors" } else { "Error" })?;
        for err in &self.0 {
            writeln!(f, "{err}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum VisError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid color: {0}")]
    InvalidColor(String),

    #[error("invalid file path: {0:?}")]
    InvalidPath(String),

    #[error("format resolution failed\n{0}")]
    Compile(CompileErrors),
}

impl VisError {
    /// Errors the interactive loop reports in a modal and then keeps browsing.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VisError::Parse(_) | VisError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, VisError>;
