// SPDX-License-Identifier: MPL-2.0

//! Error types for MQTT client operations
//!
//! A single error type is shared by the lifecycle engine, the transport collaborator
//! interface and the completion handles returned to callers. Every connection-level error
//! leads to another connection attempt until the client is stopped; configuration errors
//! are fatal at construction time.

use std::io;

/// Comprehensive error type for MQTT client operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MqttClientError {
    // ==================== Connection Errors (Recoverable) ====================
    /// Connection refused by broker with a failing CONNACK reason code
    #[error("Connection refused by broker: {description} (code: 0x{reason_code:02X})")]
    ConnectionRefused { reason_code: u8, description: String },

    /// No CONNACK arrived within the configured window
    #[error("No CONNACK received within {timeout_ms} ms")]
    ConnackTimeout { timeout_ms: u64 },

    /// Connection lost unexpectedly
    #[error("Connection to broker lost: {reason}")]
    ConnectionLost { reason: String },

    /// Network I/O error reported by the transport engine
    #[error("Network error ({kind:?}): {message}")]
    NetworkError { kind: io::ErrorKind, message: String },

    /// No PINGRESP arrived within the configured window
    #[error("No PINGRESP received within {timeout_ms} ms")]
    PingTimeout { timeout_ms: u64 },

    /// The connection was closed because the user stopped the client
    #[error("Connection closed by user request")]
    UserInitiatedDisconnect,

    // ==================== Protocol Errors ====================
    /// MQTT protocol violation detected
    #[error("MQTT protocol violation: {message}")]
    ProtocolViolation { message: String },

    // ==================== Operation Errors (Surfaced to caller) ====================
    /// Operation timed out waiting for its acknowledgment
    #[error("Operation '{operation}' timed out after {timeout_ms} ms")]
    OperationTimeout { operation: String, timeout_ms: u64 },

    /// Operation failed by the offline queue policy while the client was not connected
    #[error("Operation '{operation}' rejected while offline by the offline queue policy")]
    OfflineQueuePolicyFailed { operation: String },

    /// Operation failed client-side validation
    #[error("Operation '{operation}' failed validation: {reason}")]
    ValidationFailed { operation: String, reason: String },

    /// The transport engine reported that it could not perform the operation
    #[error("Operation '{operation}' failed in transport: {reason}")]
    OperationFailed { operation: String, reason: String },

    // ==================== Resource Errors ====================
    /// Internal channel closed unexpectedly
    #[error("Internal channel '{channel}' closed unexpectedly")]
    ChannelClosed { channel: String },

    // ==================== Configuration Errors (Unrecoverable) ====================
    /// Invalid client configuration
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // ==================== Internal Errors (Unrecoverable) ====================
    /// Internal client error (should not happen)
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl MqttClientError {
    /// Returns true if the error is fatal (client should not be used)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. } | Self::InternalError { .. }
        )
    }

    /// Returns true if the error is related to authentication
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused {
                reason_code: 0x86 | 0x87 | 0x8C,
                ..
            }
        )
    }

    /// Convert from io::Error with context
    pub fn from_io_error(error: io::Error, context: &str) -> Self {
        Self::NetworkError {
            kind: error.kind(),
            message: format!("{}: {}", context, error),
        }
    }

    pub(crate) fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(operation: &str, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }
}

// Conversion from io::Error (without context)
impl From<io::Error> for MqttClientError {
    fn from(error: io::Error) -> Self {
        Self::NetworkError {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

// Conversion to io::Error for callers living in io::Result code
impl From<MqttClientError> for io::Error {
    fn from(error: MqttClientError) -> Self {
        match error {
            MqttClientError::OperationTimeout { .. }
            | MqttClientError::ConnackTimeout { .. }
            | MqttClientError::PingTimeout { .. } => {
                io::Error::new(io::ErrorKind::TimedOut, error.to_string())
            }
            MqttClientError::NetworkError { kind, message } => io::Error::new(kind, message),
            MqttClientError::ConnectionLost { reason } => {
                io::Error::new(io::ErrorKind::ConnectionReset, reason)
            }
            MqttClientError::ConnectionRefused { .. } => {
                io::Error::new(io::ErrorKind::ConnectionRefused, error.to_string())
            }
            MqttClientError::OfflineQueuePolicyFailed { .. } => {
                io::Error::new(io::ErrorKind::NotConnected, error.to_string())
            }
            MqttClientError::ChannelClosed { .. } => {
                io::Error::new(io::ErrorKind::BrokenPipe, error.to_string())
            }
            MqttClientError::InvalidConfiguration { .. }
            | MqttClientError::ValidationFailed { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, error.to_string())
            }
            MqttClientError::ProtocolViolation { message } => {
                io::Error::new(io::ErrorKind::InvalidData, message)
            }
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Type alias for Result with MqttClientError
pub type MqttClientResult<T> = Result<T, MqttClientError>;
