//! Error types for tally.

use std::fmt;

use thiserror::Error;

/// Top-level result type for tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;

/// Top-level error type for tally.
///
/// One tagged type for every failure domain; use [`TallyError::kind`] when
/// only the discriminant matters.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("invalid filter pattern '{pattern}': {reason}")]
    FilterConfig { pattern: String, reason: String },

    #[error(transparent)]
    Frontmatter(#[from] FrontmatterError),

    #[error("batch operation failed for '{path}': {source}")]
    BatchOperation {
        path: String,
        #[source]
        source: FrontmatterError,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of a [`TallyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FilterConfig,
    Frontmatter,
    BatchOperation,
    Config,
    Io,
}

impl TallyError {
    /// The failure domain this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FilterConfig { .. } => ErrorKind::FilterConfig,
            Self::Frontmatter(_) => ErrorKind::Frontmatter,
            Self::BatchOperation { .. } => ErrorKind::BatchOperation,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// The header operation that was attempted when a [`FrontmatterError`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderOperation {
    Read,
    Parse,
    Write,
}

impl fmt::Display for HeaderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Parse => "parse",
            Self::Write => "write",
        };
        f.write_str(s)
    }
}

/// A frontmatter operation failed on a specific document.
#[derive(Debug, Clone, Error)]
#[error("frontmatter {operation} failed for '{path}': {reason}")]
pub struct FrontmatterError {
    pub path: String,
    pub operation: HeaderOperation,
    pub reason: String,
}

impl FrontmatterError {
    pub fn new(path: impl Into<String>, operation: HeaderOperation, reason: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            operation,
            reason: reason.to_string(),
        }
    }
}
