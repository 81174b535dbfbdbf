//! Unified error system for tether
//!
//! A single closed error enumeration shared by the peer-side control channel,
//! the mediator and every traversal technique. Nothing in the workspace
//! retries on its own; each variant carries enough context (technique, target
//! id, mediator address) for the caller to decide what to do.

use crate::technique::TechniqueCode;
use std::net::SocketAddr;

/// Unified error type for all tether operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TetherError {
    /// A transport-level connection (control, listening or outgoing) could not be set up
    #[error("[{technique}] connection not established: {message}")]
    ConnectionNotEstablished {
        /// Name of the technique that attempted the connection
        technique: String,
        /// Description of the underlying transport failure
        message: String,
    },

    /// A required attribute is absent from a received message
    #[error("Missing attribute {attribute} in {context}")]
    MissingAttribute {
        /// Attribute type name
        attribute: &'static str,
        /// Where the attribute was expected
        context: String,
    },

    /// No handler is registered for the requested technique code
    #[error("Unknown traversal technique: {code}")]
    UnknownTechnique {
        /// The code that was looked up
        code: TechniqueCode,
    },

    /// A handler is already registered under the code
    #[error("Traversal technique {code} already registered")]
    DuplicateTechnique {
        /// The contested code
        code: TechniqueCode,
    },

    /// The code is reserved and cannot be registered or requested
    #[error("Traversal technique code {code} is reserved")]
    ReservedTechnique {
        /// The reserved code
        code: TechniqueCode,
    },

    /// Register or deregister could not be sent to the mediator
    #[error("Registration of {target_id} at {mediator} failed: {message}")]
    RegistrationFailure {
        /// Target id being (de)registered
        target_id: String,
        /// Mediator the registration was sent to
        mediator: SocketAddr,
        /// Description of the underlying failure
        message: String,
    },

    /// The mediator answered with an error response
    #[error("Request rejected by mediator ({code}): {reason}")]
    RequestRejected {
        /// Error code carried by the response
        code: u16,
        /// Reason phrase carried by the response
        reason: String,
    },

    /// The mediator has no registration for the target
    #[error("Target not registered: {target_id}")]
    TargetNotRegistered {
        /// Requested target id
        target_id: String,
    },

    /// A bounded wait expired
    #[error("Timed out: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// Received bytes do not form a valid message
    #[error("Malformed message: {message}")]
    MalformedMessage {
        /// What was wrong with the input
        message: String,
    },

    /// The peer closed the stream before a message header arrived
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// I/O failure outside connection setup
    #[error("I/O error: {message}")]
    Io {
        /// Error message describing the I/O failure
        message: String,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration problem
        message: String,
    },
}

impl TetherError {
    /// Create a connection-not-established error for a technique
    pub fn connection_not_established(
        technique: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConnectionNotEstablished {
            technique: technique.into(),
            message: message.into(),
        }
    }

    /// Create a missing attribute error
    pub fn missing_attribute(attribute: &'static str, context: impl Into<String>) -> Self {
        Self::MissingAttribute {
            attribute,
            context: context.into(),
        }
    }

    /// Create a registration failure carrying target and mediator context
    pub fn registration_failure(
        target_id: impl Into<String>,
        mediator: SocketAddr,
        message: impl Into<String>,
    ) -> Self {
        Self::RegistrationFailure {
            target_id: target_id.into(),
            mediator,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a malformed message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Attribute an error to `technique`.
    ///
    /// Registration failures keep their variant, target id and mediator with
    /// the technique named in the message; connection errors pass through;
    /// everything else becomes a connection failure of `technique`.
    pub fn within_technique(self, technique: &str) -> Self {
        match self {
            err @ Self::ConnectionNotEstablished { .. } => err,
            Self::RegistrationFailure {
                target_id,
                mediator,
                message,
            } => {
                let prefix = format!("[{technique}] ");
                let message = if message.starts_with(&prefix) {
                    message
                } else {
                    format!("{prefix}{message}")
                };
                Self::RegistrationFailure {
                    target_id,
                    mediator,
                    message,
                }
            }
            other => Self::connection_not_established(technique, other.to_string()),
        }
    }
}

/// Standard Result type for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::ConnectionClosed,
            _ => Self::Io {
                message: err.to_string(),
            },
        }
    }
}
