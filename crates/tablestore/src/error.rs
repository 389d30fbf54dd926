//! Error types for the table client.
//!
//! Errors are split the same way the service contract splits them:
//!
//! - [`ValidationError`] - raised on the client before any network I/O and
//!   never retried.
//! - [`RequestError`] - the outcome of talking to the service (or deciding not
//!   to), carrying the HTTP status and the service's extended error details.
//! - [`SerializationError`] - a payload could not be written or read.
//!
//! All three are wrapped by [`TableError`], which is what every public
//! operation returns.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error type used for caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all table operations.
#[derive(Error, Debug)]
pub enum TableError {
    /// Client-side validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport and service errors
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Payload serialization errors
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// Errors raised while validating caller input.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// An argument is malformed (too long, missing a required token, ...).
    #[error("invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },

    /// An argument is well formed but not acceptable in this position.
    #[error("{message}")]
    Argument { message: String },

    /// The call is never supported on this type.
    #[error("operation not supported: {operation}")]
    UnsupportedOperation { operation: String },

    /// The object is not in a state that allows the call.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
}

/// Errors produced by executing a request.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The service answered with a non-success status.
    #[error(
        "request failed with status {status} ({}): {}",
        extended.error_code,
        extended.error_message
    )]
    Service {
        status: u16,
        extended: ExtendedErrorInformation,
        request_id: Option<String>,
        /// Index of the offending operation when a batch was rejected.
        operation_index: Option<usize>,
    },

    /// The maximum execution time elapsed before the operation completed.
    #[error("operation exceeded the maximum execution time of {max_execution_ms}ms")]
    Timeout {
        max_execution_ms: u64,
        #[source]
        source: OperationTimedOut,
    },

    /// The caller cancelled the operation.
    #[error("operation was cancelled")]
    Cancelled,

    /// A write was routed to a secondary-only configuration.
    #[error("{command} can only be sent to the primary location")]
    PrimaryOnlyCommand { command: String },

    /// The request never produced an HTTP response.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A caller-supplied resolver returned an error.
    #[error("the property resolver or entity resolver failed while reading the response")]
    Resolver {
        #[source]
        source: BoxError,
    },
}

/// Inner error carried by [`RequestError::Timeout`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the operation timed out after {elapsed_ms}ms")]
pub struct OperationTimedOut {
    pub elapsed_ms: u64,
}

/// Errors raised by the payload codecs.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML serialization error: {0}")]
    XmlSerialize(#[from] quick_xml::se::SeError),

    #[error("XML deserialization error: {0}")]
    XmlDeserialize(#[from] quick_xml::de::DeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed payload: {message}")]
    Malformed { message: String },
}

impl SerializationError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        SerializationError::Malformed {
            message: message.into(),
        }
    }
}

/// Structured error details returned by the service in an error body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedErrorInformation {
    /// Service error code, e.g. `UpdateConditionNotSatisfied`.
    pub error_code: String,
    /// Human-readable message.
    pub error_message: String,
    /// Any additional key/value details included in the body.
    #[serde(default)]
    pub additional_details: BTreeMap<String, String>,
}

impl ExtendedErrorInformation {
    /// Creates error information from a code and message.
    pub fn new(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            error_message: error_message.into(),
            additional_details: BTreeMap::new(),
        }
    }
}

impl fmt::Display for ExtendedErrorInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.error_message)
    }
}

/// Error codes returned by the table service.
pub mod error_codes {
    pub const TABLE_ALREADY_EXISTS: &str = "TableAlreadyExists";
    pub const TABLE_NOT_FOUND: &str = "TableNotFound";
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFound";
    pub const ENTITY_ALREADY_EXISTS: &str = "EntityAlreadyExists";
    pub const UPDATE_CONDITION_NOT_SATISFIED: &str = "UpdateConditionNotSatisfied";
    pub const CONDITION_NOT_MET: &str = "ConditionNotMet";
    pub const INVALID_DUPLICATE_ROW: &str = "InvalidDuplicateRow";
    pub const ENTITY_TOO_LARGE: &str = "EntityTooLarge";
    pub const REQUEST_BODY_TOO_LARGE: &str = "RequestBodyTooLarge";
    pub const INVALID_INPUT: &str = "InvalidInput";
    pub const SERVER_BUSY: &str = "ServerBusy";
    pub const OPERATION_TIMED_OUT: &str = "OperationTimedOut";
}

/// Result type alias for table operations.
pub type TableResult<T> = Result<T, TableError>;

impl TableError {
    /// HTTP status of the failed request, when the service produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TableError::Request(RequestError::Service { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Service error code, when the service produced one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            TableError::Request(RequestError::Service { extended, .. }) => {
                Some(extended.error_code.as_str())
            }
            _ => None,
        }
    }

    /// Extended error information, when the service produced one.
    pub fn extended_error(&self) -> Option<&ExtendedErrorInformation> {
        match self {
            TableError::Request(RequestError::Service { extended, .. }) => Some(extended),
            _ => None,
        }
    }

    /// Index of the batch operation the service rejected.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            TableError::Request(RequestError::Service {
                operation_index, ..
            }) => *operation_index,
            _ => None,
        }
    }

    /// Whether this failure is transient and may succeed on another attempt.
    ///
    /// Timeouts surfaced by the service (408), throttling (429) and server
    /// errors other than 501/505 are transient, as are transport failures.
    /// Every other failure is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            TableError::Request(RequestError::Service { status, .. }) => {
                matches!(*status, 408 | 429) || (*status >= 500 && !matches!(*status, 501 | 505))
            }
            TableError::Request(RequestError::Transport { .. }) => true,
            _ => false,
        }
    }

    pub(crate) fn service(
        status: u16,
        extended: ExtendedErrorInformation,
        request_id: Option<String>,
        operation_index: Option<usize>,
    ) -> Self {
        TableError::Request(RequestError::Service {
            status,
            extended,
            request_id,
            operation_index,
        })
    }

    pub(crate) fn invalid_argument(name: &str, message: impl Into<String>) -> Self {
        TableError::Validation(ValidationError::InvalidArgument {
            name: name.to_string(),
            message: message.into(),
        })
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        TableError::Validation(ValidationError::InvalidOperation {
            message: message.into(),
        })
    }
}

impl From<serde_json::Error> for TableError {
    fn from(err: serde_json::Error) -> Self {
        TableError::Serialization(SerializationError::Json(err))
    }
}

impl From<quick_xml::Error> for TableError {
    fn from(err: quick_xml::Error) -> Self {
        TableError::Serialization(SerializationError::Xml(err))
    }
}
