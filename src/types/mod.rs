//! Error taxonomy shared by every adapter.
//!
//! Backend-native failures are mapped into [`DbError`] at exactly one place per
//! adapter (its `translate_backend_error` function). Everything above the wire
//! boundary only ever sees an [`ErrorKind`] plus the original message and
//! native code, so callers can branch on the kind without knowing which engine
//! produced it.

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;

/// Category of a failure, independent of the backend that raised it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Unique constraint violated (document, collection or index already exists).
    Duplicate,
    /// The backend aborted the call because its deadline elapsed.
    Timeout,
    /// Invalid transaction state transition or no active transaction.
    Transaction,
    /// Referenced database, collection or document is absent.
    NotFound,
    /// Malformed query, cursor, pattern or tenant usage.
    InvalidQuery,
    /// Uncategorized native failure.
    Backend,
}

impl ErrorKind {
    /// Returns a machine-readable code for the kind.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Duplicate => "Duplicate",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Transaction => "Transaction",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidQuery => "InvalidQuery",
            ErrorKind::Backend => "Backend",
        }
    }

    /// Whether a caller is expected to branch on this kind and carry on.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::Duplicate | ErrorKind::NotFound)
    }

    /// Whether the operation may succeed if the caller retries it later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured error value: kind, message and the optional native code.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct DbError {
    kind: ErrorKind,
    message: String,
    native_code: Option<String>,
}

impl DbError {
    /// Builds an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            native_code: None,
        }
    }

    /// Attaches the backend's own error code for diagnostics.
    pub fn with_native_code(mut self, code: impl ToString) -> Self {
        self.native_code = Some(code.to_string());
        self
    }

    /// Shorthand for [`ErrorKind::Duplicate`].
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    /// Shorthand for [`ErrorKind::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Shorthand for [`ErrorKind::Transaction`].
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    /// Shorthand for [`ErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for [`ErrorKind::InvalidQuery`].
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidQuery, message)
    }

    /// Shorthand for [`ErrorKind::Backend`].
    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backend, message)
    }

    /// Category of the failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message, preserved verbatim from the backend when mapped.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Native error code reported by the backend, if any.
    pub fn native_code(&self) -> Option<&str> {
        self.native_code.as_deref()
    }

    /// Machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::invalid_query(format!("malformed JSON: {err}"))
    }
}

/// Formats an error together with its kind code and native code.
pub struct DbErrorWithCode<'a>(pub &'a DbError);

impl fmt::Display for DbErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.native_code() {
            Some(native) => write!(f, "[{}/{}] {}", self.0.code(), native, self.0.message()),
            None => write!(f, "[{}] {}", self.0.code(), self.0.message()),
        }
    }
}
