use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

/// Error kinds for relata operations.
///
/// Each kind names one category of failure in the property model, the
/// repositories, or the connection providers, enabling precise error
/// handling at the call site.
///
/// # Examples
///
/// ```rust,ignore
/// use relata::errors::{RelataError, ErrorKind, RelataResult};
///
/// fn example() -> RelataResult<()> {
///     Err(RelataError::new("no such property", ErrorKind::UndefinedProperty))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Property model errors - raised by the generic accessor layer
    /// Access to a property the entity model does not declare
    UndefinedProperty,
    /// Write access to a property flagged readonly
    ReadonlyProperty,
    /// Clearing a property flagged required
    RequiredProperty,
    /// A value does not satisfy the property's declared type
    TypeMismatch,
    /// add/remove on a property that is not a collection
    NotACollection,

    // Metadata and relation errors
    /// A relation name the entity model does not declare
    UnknownRelation,
    /// A model name that is not registered, or that fails the entity contract
    InvalidEntityClass,

    // Connection provider errors
    /// A logical connection name missing from the provider settings
    UnknownConnection,

    // Operation errors
    /// The operation is not valid in the current context
    InvalidOperation,

    // Storage backend errors - driver messages pass through verbatim
    /// Error reported by the underlying storage driver, never translated
    Driver,

    // Generic/internal errors - used as fallback
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::UndefinedProperty => write!(f, "Undefined property"),
            ErrorKind::ReadonlyProperty => write!(f, "Readonly property"),
            ErrorKind::RequiredProperty => write!(f, "Required property"),
            ErrorKind::TypeMismatch => write!(f, "Type mismatch"),
            ErrorKind::NotACollection => write!(f, "Not a collection"),
            ErrorKind::UnknownRelation => write!(f, "Unknown relation"),
            ErrorKind::InvalidEntityClass => write!(f, "Invalid entity class"),
            ErrorKind::UnknownConnection => write!(f, "Unknown connection"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::Driver => write!(f, "Driver error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom relata error type.
///
/// `RelataError` encapsulates the error message, kind, and an optional
/// cause. It supports error chaining and backtraces for debugging.
///
/// Storage driver failures are wrapped with [`ErrorKind::Driver`] and the
/// driver's message preserved verbatim - they are never translated into a
/// finer-grained kind.
///
/// # Type alias
///
/// The `RelataResult<T>` type alias is equivalent to `Result<T, RelataError>`
/// and is used throughout the codebase for operations that can fail.
#[derive(Clone)]
pub struct RelataError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<RelataError>>,
    backtrace: Atomic<Backtrace>,
}

impl RelataError {
    /// Creates a new `RelataError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        RelataError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `RelataError` with a cause error, preserving the
    /// chain for debugging.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: RelataError) -> Self {
        RelataError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Wraps a storage driver failure without translating it. The driver's
    /// message surfaces verbatim to the caller.
    pub fn driver(message: &str) -> Self {
        RelataError::new(message, ErrorKind::Driver)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&Box<RelataError>> {
        self.cause.as_ref()
    }
}

impl Display for RelataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for RelataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{:?}", self.message, self.backtrace.read()),
        }
    }
}

impl Error for RelataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for relata operations.
///
/// `RelataResult<T>` is shorthand for `Result<T, RelataError>`.
pub type RelataResult<T> = Result<T, RelataError>;

// From trait implementations for automatic error conversion
impl From<std::num::ParseIntError> for RelataError {
    fn from(err: std::num::ParseIntError) -> Self {
        RelataError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::TypeMismatch,
        )
    }
}

impl From<std::num::ParseFloatError> for RelataError {
    fn from(err: std::num::ParseFloatError) -> Self {
        RelataError::new(
            &format!("Float parsing error: {}", err),
            ErrorKind::TypeMismatch,
        )
    }
}

impl From<std::fmt::Error> for RelataError {
    fn from(err: std::fmt::Error) -> Self {
        RelataError::new(
            &format!("Formatting error: {}", err),
            ErrorKind::InternalError,
        )
    }
}

impl From<String> for RelataError {
    fn from(msg: String) -> Self {
        RelataError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for RelataError {
    fn from(msg: &str) -> Self {
        RelataError::new(msg, ErrorKind::InternalError)
    }
}
