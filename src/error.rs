//! Error types for dbus-dispatch.

use thiserror::Error;

use crate::invocation::MethodInvocation;

/// Result type alias for dbus-dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the dispatcher, the skeleton adapter and the
/// blocking bus helpers.
#[derive(Debug, Error)]
pub enum Error {
    /// Sending or receiving on the bus failed.
    #[error("D-Bus error: {0}")]
    DBus(zbus::Error),

    /// The peer answered with an error message.
    #[error("{name}: {message}")]
    Remote {
        /// D-Bus error name, e.g. `org.freedesktop.DBus.Error.UnknownProperty`.
        name: String,
        /// Error text sent by the peer.
        message: String,
    },

    /// A detached handler could not be launched.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Message parsing error.
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// The static interface description is not usable on the bus.
    #[error("Invalid interface schema: {0}")]
    InvalidSchema(String),

    /// An interface is already exported at this path.
    #[error("Interface {interface} already exported at {path}")]
    ObjectExists { path: String, interface: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Nothing is exported under this path and interface.
    #[error("Interface {interface} not exported at {path}")]
    NotExported { path: String, interface: String },

    /// The connection stopped delivering messages.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}

impl Error {
    /// The peer's error text, if this is a remote error.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Error::Remote { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Failures of the dispatch call itself (not of the handler it runs).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker thread for a detached handler could not be created.
    ///
    /// The invocation was never handed to the handler and is returned so
    /// the caller can complete it with an error.
    #[error("Couldn't create D-Bus call dispatcher: {source}")]
    Launch {
        source: std::io::Error,
        invocation: Option<MethodInvocation>,
    },
}

impl DispatchError {
    /// Take back the invocation that was never run.
    pub fn into_invocation(self) -> Option<MethodInvocation> {
        match self {
            DispatchError::Launch { invocation, .. } => invocation,
        }
    }
}

/// Message-related errors.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Missing required message header field.
    #[error("Missing message header field: {0}")]
    MissingHeader(String),

    /// Message body deserialization failed.
    #[error("Failed to deserialize message body: {0}")]
    DeserializeFailed(String),

    /// The message is not of the expected type.
    #[error("Unexpected message type: {0}")]
    UnexpectedType(String),
}

impl From<zbus::Error> for Error {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, detail, _) => Error::Remote {
                name: name.to_string(),
                message: detail.unwrap_or_default(),
            },
            other => Error::DBus(other),
        }
    }
}

impl From<zbus::zvariant::Error> for Error {
    fn from(err: zbus::zvariant::Error) -> Self {
        Error::Message(MessageError::DeserializeFailed(err.to_string()))
    }
}
