//! The unified error taxonomy of the processor surface.
//!
//! Lower-level crates keep their own error enums; everything crossing
//! the processor boundary is folded into [`Error`] so callers match on
//! one type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The input XML was not well formed.
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// A stylesheet, query or schema failed to compile.
    #[error("compile error: {0}")]
    Compile(String),

    /// An XPath expression could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A static error found during expression compilation.
    #[error("static error: {0}")]
    StaticType(String),

    /// A dynamic error with its standard code, as raised during
    /// evaluation or surfaced to `xsl:catch`.
    #[error("{code}: {description}")]
    Dynamic { code: String, description: String },

    /// A sequence had the wrong number of items.
    #[error("cardinality error: {0}")]
    Cardinality(String),

    /// A function was called with the wrong number of arguments.
    #[error("arity error: {0}")]
    Arity(String),

    /// A value did not conform to a required or declared type.
    #[error("type error: {0}")]
    Type(String),

    /// A reference to an undeclared template, function or variable.
    #[error("unknown name: {0}")]
    Name(String),

    /// A processor was configured inconsistently, such as mutating the
    /// static context after compilation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The engine is not in a state that allows the operation.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// A sequence index was out of bounds.
    #[error("index {index} out of bounds for sequence of size {size}")]
    Index { index: usize, size: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn dynamic(code: &str, description: impl Into<String>) -> Self {
        Error::Dynamic {
            code: code.to_string(),
            description: description.into(),
        }
    }

    /// The standard error code carried by dynamic errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Dynamic { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<xdm::Error> for Error {
    fn from(err: xdm::Error) -> Self {
        match err {
            xdm::Error::Parse {
                line,
                column,
                message,
            } => Error::Parse {
                line,
                column,
                message,
            },
            xdm::Error::Index { index, size } => Error::Index { index, size },
            xdm::Error::NodeAccess(message) => Error::Type(message),
            xdm::Error::Io(err) => Error::Io(err),
        }
    }
}

impl From<xdm_xpath::Error> for Error {
    fn from(err: xdm_xpath::Error) -> Self {
        match err {
            xdm_xpath::Error::Syntax(message) => Error::Syntax(message),
            xdm_xpath::Error::StaticType(message) => Error::StaticType(message),
            xdm_xpath::Error::Dynamic { code, description } => {
                Error::Dynamic { code, description }
            }
            xdm_xpath::Error::Cardinality(message) => Error::Cardinality(message),
            xdm_xpath::Error::Type(message) => Error::Type(message),
            xdm_xpath::Error::Name(message) => Error::Name(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
