//! Error types shared by every codec and session.

use serde::Serialize;
use thiserror::Error;

/// Main error type for libbits operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid {format} data: {reason}")]
    InvalidFormat { format: &'static str, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    DuplicatePath(String),

    #[error("Read past end of buffer at offset {offset:#x} (length {len:#x})")]
    OutOfBounds { offset: u64, len: u64 },

    #[error("Invalid YAML: {message}")]
    InvalidSyntax {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    #[error("YAML does not match the {format} schema: {message}")]
    SchemaMismatch { format: &'static str, message: String },

    #[error("{field} value {value} does not fit in its field")]
    ValueOutOfRange { field: &'static str, value: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("No {0} is open")]
    NotOpen(&'static str),

    #[error("In nested archive {path}: {source}")]
    Nested {
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Yaz0 error: {0}")]
    Yaz0(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for libbits operations
pub type Result<T> = std::result::Result<T, Error>;

/// Flat error taxonomy reported across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidFormat,
    NotFound,
    DuplicatePath,
    OutOfBounds,
    InvalidSyntax,
    SchemaMismatch,
    ValueOutOfRange,
    Cancelled,
    NotOpen,
    Io,
}

impl Error {
    pub(crate) fn invalid(format: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidFormat {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn schema(format: &'static str, message: impl Into<String>) -> Self {
        Error::SchemaMismatch {
            format,
            message: message.into(),
        }
    }

    pub(crate) fn nested(path: impl Into<String>, source: Error) -> Self {
        Error::Nested {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// The boundary category of this error. Nested errors report the kind of
    /// the underlying failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidFormat { .. } | Error::Yaz0(_) => ErrorKind::InvalidFormat,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::DuplicatePath(_) => ErrorKind::DuplicatePath,
            Error::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Error::InvalidSyntax { .. } => ErrorKind::InvalidSyntax,
            Error::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Error::ValueOutOfRange { .. } => ErrorKind::ValueOutOfRange,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::NotOpen(_) => ErrorKind::NotOpen,
            Error::Nested { source, .. } => source.kind(),
            Error::Io(_) | Error::Json(_) => ErrorKind::Io,
        }
    }

    /// The offending path, for errors that carry one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::NotFound(path) | Error::DuplicatePath(path) => Some(path),
            Error::Nested { path, source } => source.path().or(Some(path)),
            _ => None,
        }
    }

    /// Line and column (1-based) of a text conversion error, when known.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            Error::InvalidSyntax {
                line: Some(line),
                column: Some(column),
                ..
            } => Some((*line, *column)),
            Error::Nested { source, .. } => source.location(),
            _ => None,
        }
    }

    /// Re-labels reader faults as a malformed `format`; a truncated table is a
    /// format error from the caller's point of view.
    pub(crate) fn into_format(self, format: &'static str) -> Self {
        match self {
            Error::OutOfBounds { offset, len } => Error::invalid(
                format,
                format!("truncated data (offset {offset:#x}, length {len:#x})"),
            ),
            other => other,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        let location = err.location();
        Error::InvalidSyntax {
            message: err.to_string(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_errors_report_inner_kind_and_path() {
        let err = Error::nested("Outer.sarc", Error::NotFound("Actor/Link.bxml".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.path(), Some("Actor/Link.bxml"));
    }

    #[test]
    fn yaml_errors_carry_location() {
        let err: Error = serde_yaml::from_str::<serde_yaml::Value>("a: [1, 2")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::InvalidSyntax);
        assert!(err.location().is_some());
    }
}
