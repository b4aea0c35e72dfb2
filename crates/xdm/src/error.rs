//! Error types for the XDM crate

use thiserror::Error;

/// Result type for XDM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building trees or accessing sequences
#[derive(Error, Debug)]
pub enum Error {
    /// The input was not well-formed XML. No partial tree is published.
    #[error("XML parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Sequence index out of bounds
    #[error("index {index} out of bounds for sequence of size {size}")]
    Index { index: usize, size: usize },

    /// A node operation was applied to a node kind that does not support it
    #[error("node access error: {0}")]
    NodeAccess(String),

    /// IO error while reading a source file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a parse error from a byte offset into the source text.
    pub(crate) fn parse_at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let clamped = offset.min(source.len());
        let mut line = 1;
        let mut column = 1;
        for ch in source[..clamped].chars() {
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}
