use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Error type for gradebook operations.
#[derive(Error, Debug)]
pub enum GradebookError {
    /// IO error from sockets or files.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error.
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Error from the sled storage backend.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// The payload could not be decoded as a request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A required request field is absent.
    #[error("Missing field: {0}")]
    MissingField(String),

    /// A request field is present but has the wrong type or an empty value.
    #[error("Invalid field: {field} ({expected})")]
    InvalidField {
        /// Name of the offending field.
        field: String,
        /// What the field should have been.
        expected: &'static str,
    },

    /// An `update_student` request carried no field to change.
    #[error("No fields to update")]
    NoUpdateFields,

    /// Username or password did not match a stored account.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The old password supplied to a password change was wrong.
    #[error("Invalid old password")]
    InvalidOldPassword,

    /// The caller's permission does not allow the action.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No student with the given id.
    #[error("Student not found: {0}")]
    StudentNotFound(String),

    /// No account with the given username.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// A student with the given id already exists.
    #[error("Student already exists: {0}")]
    DuplicateStudent(String),

    /// Connecting to the server failed after every retry.
    #[error("Failed to connect to {addr} after {attempts} attempts")]
    Connection {
        /// The address that was tried.
        addr: SocketAddr,
        /// How many connection attempts were made.
        attempts: u32,
    },

    /// The server answered with an error status.
    #[error("{0}")]
    Server(String),

    /// Error with a string message.
    #[error("{0}")]
    StringError(String),
}

impl GradebookError {
    /// Returns the text reported to a remote caller for this error.
    ///
    /// Backend failures are reported generically; their detail stays in
    /// the server log.
    pub fn client_message(&self) -> String {
        match self {
            GradebookError::Io(_)
            | GradebookError::Serde(_)
            | GradebookError::Sled(_)
            | GradebookError::StringError(_) => "Internal store error".to_owned(),
            GradebookError::StudentNotFound(_) => "Student not found".to_owned(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for gradebook operations.
pub type Result<T> = std::result::Result<T, GradebookError>;
