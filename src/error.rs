//! Error taxonomy shared by the template parser, class compiler and runtime.
//!
//! Syntax errors surface at class-definition time. Type, Reference and Range
//! errors surface at the point of use and never leave a partial effect behind.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, OomlError>;

/// Error category, for matching without inspecting message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Type,
    Reference,
    Range,
    Logic,
    Io,
}

#[derive(Debug, Clone, Error)]
pub enum OomlError {
    /// Malformed template grammar, duplicate declarations, invalid names
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// A value does not fit the declared type set or substitution shape
    #[error("TypeError: {0}")]
    Type(String),

    /// Unknown names, double attachment, missing classes
    #[error("ReferenceError: {0}")]
    Reference(String),

    #[error("RangeError: {0}")]
    Range(String),

    /// A broken internal invariant
    #[error("internal invariant violated: {0}")]
    Logic(String),

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
}

impl OomlError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::Reference(message.into())
    }

    pub fn range(message: impl Into<String>) -> Self {
        Self::Range(message.into())
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::Type(_) => ErrorKind::Type,
            Self::Reference(_) => ErrorKind::Reference,
            Self::Range(_) => ErrorKind::Range,
            Self::Logic(_) => ErrorKind::Logic,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// The message without the category prefix
    pub fn message(&self) -> String {
        match self {
            Self::Syntax(m) | Self::Type(m) | Self::Reference(m) | Self::Range(m) | Self::Logic(m) => {
                m.clone()
            }
            Self::Io { path, message } => format!("{}: {}", path, message),
        }
    }
}
