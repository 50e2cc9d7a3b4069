use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    /// The failure category and its details.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwraps the boxed kind.
    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        let (name, message) = (name.into(), message.into());
        ErrorKind::InvalidArgument { name, message }.into()
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        ErrorKind::InvalidOperation { name: name.into() }.into()
    }

    pub fn illegal_state(message: impl Into<String>) -> Error {
        let message = message.into();
        ErrorKind::IllegalState { message }.into()
    }

    pub fn not_found(path: impl AsRef<Path>) -> Error {
        let path = path.as_ref().to_path_buf();
        ErrorKind::NotFound { path }.into()
    }

    pub fn not_a_directory(path: impl AsRef<Path>) -> Error {
        let path = path.as_ref().to_path_buf();
        ErrorKind::NotADirectory { path }.into()
    }

    pub fn not_executable(path: impl AsRef<Path>) -> Error {
        let path = path.as_ref().to_path_buf();
        ErrorKind::NotExecutable { path }.into()
    }

    /// A filter pattern that failed to compile; `source` is the parser error.
    pub fn invalid_pattern<E>(pattern: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let (pattern, source) = (pattern.into(), Box::new(source) as StdErrorBoxed);
        ErrorKind::InvalidPattern { pattern, source }.into()
    }

    /// An I/O failure; `context` is usually the path involved.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        let context = context.into();
        ErrorKind::Io { context, source }.into()
    }

    /// Returns `true` if this error reports an object queried before it was ready.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self.kind(), ErrorKind::IllegalState { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("illegal state: {message}")]
    IllegalState { message: String },

    #[error("'{}' not found", path.display())]
    NotFound { path: PathBuf },

    #[error("'{}' is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("'{}' is not executable", path.display())]
    NotExecutable { path: PathBuf },

    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: StdErrorBoxed,
    },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}
