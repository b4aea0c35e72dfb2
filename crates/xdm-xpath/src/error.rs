//! Error types for XPath compilation and evaluation.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The expression text could not be parsed.
    #[error("XPath syntax error: {0}")]
    Syntax(String),

    /// A static error found during compilation, such as an unknown
    /// namespace prefix or a call to an undefined function.
    #[error("XPath static error: {0}")]
    StaticType(String),

    /// A dynamic error raised during evaluation, carrying the standard
    /// error code (FOAR0001, XPTY0004, ...) and a description.
    #[error("{code}: {description}")]
    Dynamic { code: String, description: String },

    /// A value had the wrong number of items for the operation.
    #[error("cardinality error: {0}")]
    Cardinality(String),

    /// An operand or argument had an unusable type.
    #[error("type error: {0}")]
    Type(String),

    /// A reference to a variable or function that is not bound.
    #[error("unknown name: {0}")]
    Name(String),
}

impl Error {
    pub fn dynamic(code: &str, description: impl Into<String>) -> Self {
        Error::Dynamic {
            code: code.to_string(),
            description: description.into(),
        }
    }

    /// The standard error code, when this error carries one.
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
            xdm::Error::Index { index, size } => Error::dynamic(
                "XPDY0002",
                format!("index {index} out of bounds for sequence of {size}"),
            ),
            other => Error::dynamic("FODC0002", other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
