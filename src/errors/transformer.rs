// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Classified outcome of every runtime operation.
//!
//! Transformer instances catch raw adapter failures and translate them into
//! one of these variants before anything above them sees the error. Every
//! variant names the device it concerns so callers can report which device
//! failed and how.

use std::time::Duration;
use thiserror::Error;

use super::ConnectionError;

/// Coarse failure class used by callers that only need to branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Validation,
    UnsupportedCommand,
    RecoveryExhausted,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformerError {
    /// Transport failure, retryable with backoff.
    #[error("Device '{device_id}' connection error: {source}")]
    Connection {
        device_id: String,
        #[source]
        source: ConnectionError,
    },

    /// Malformed request, never retried.
    #[error("Invalid request for device '{device_id}': {reason}")]
    Validation { device_id: String, reason: String },

    /// No device is registered under this id.
    #[error("Device '{device_id}' not found")]
    NotFound { device_id: String },

    /// The device is known but does not recognise this command.
    #[error("Device '{device_id}' does not support command '{command}'")]
    UnsupportedCommand { device_id: String, command: String },

    /// Reconnection gave up; the device stays degraded until cleared.
    #[error("Device '{device_id}' recovery exhausted after {attempts} attempts")]
    RecoveryExhausted { device_id: String, attempts: u32 },

    /// An operation exceeded its deadline.
    #[error("Device '{device_id}' {operation} timed out after {after:?}")]
    Timeout {
        device_id: String,
        operation: String,
        after: Duration,
    },

    /// The instance was torn down while the call was pending.
    #[error("Device '{device_id}' call cancelled: instance is shutting down")]
    Cancelled { device_id: String },

    /// The device answered but the reply made no sense.
    #[error("Device '{device_id}' returned an unexpected reply: {reason}")]
    Protocol { device_id: String, reason: String },
}

impl TransformerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformerError::Connection { .. } | TransformerError::Timeout { .. } => {
                ErrorKind::Connection
            }
            TransformerError::Validation { .. } | TransformerError::NotFound { .. } => {
                ErrorKind::Validation
            }
            TransformerError::UnsupportedCommand { .. } => ErrorKind::UnsupportedCommand,
            TransformerError::RecoveryExhausted { .. } => ErrorKind::RecoveryExhausted,
            TransformerError::Cancelled { .. } | TransformerError::Protocol { .. } => {
                ErrorKind::Internal
            }
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            TransformerError::Connection { device_id, .. }
            | TransformerError::Validation { device_id, .. }
            | TransformerError::NotFound { device_id }
            | TransformerError::UnsupportedCommand { device_id, .. }
            | TransformerError::RecoveryExhausted { device_id, .. }
            | TransformerError::Timeout { device_id, .. }
            | TransformerError::Cancelled { device_id }
            | TransformerError::Protocol { device_id, .. } => device_id,
        }
    }

    pub fn validation(device_id: &str, reason: impl Into<String>) -> Self {
        TransformerError::Validation {
            device_id: device_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn protocol(device_id: &str, reason: impl Into<String>) -> Self {
        TransformerError::Protocol {
            device_id: device_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap an adapter failure, folding adapter timeouts into `Timeout`.
    pub fn from_connection(device_id: &str, operation: &str, source: ConnectionError) -> Self {
        match source {
            ConnectionError::Timeout(after) => TransformerError::Timeout {
                device_id: device_id.to_string(),
                operation: operation.to_string(),
                after,
            },
            ConnectionError::Protocol(reason) => TransformerError::protocol(device_id, reason),
            source => TransformerError::Connection {
                device_id: device_id.to_string(),
                source,
            },
        }
    }

    /// Whether this failure should count against the device's link health.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            TransformerError::Connection { .. } | TransformerError::Timeout { .. }
        )
    }
}

/// Result alias for runtime operations.
pub type TransformerResult<T> = Result<T, TransformerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let cases = vec![
            (
                TransformerError::from_connection(
                    "robot1",
                    "read_status",
                    ConnectionError::Closed("10.0.0.5:29999".into()),
                ),
                ErrorKind::Connection,
            ),
            (
                TransformerError::from_connection(
                    "robot1",
                    "read_status",
                    ConnectionError::Timeout(Duration::from_millis(5)),
                ),
                ErrorKind::Connection,
            ),
            (TransformerError::validation("plc1", "empty name"), ErrorKind::Validation),
            (
                TransformerError::NotFound {
                    device_id: "ghost".into(),
                },
                ErrorKind::Validation,
            ),
            (
                TransformerError::UnsupportedCommand {
                    device_id: "plc1".into(),
                    command: "FLY".into(),
                },
                ErrorKind::UnsupportedCommand,
            ),
            (
                TransformerError::RecoveryExhausted {
                    device_id: "plc1".into(),
                    attempts: 3,
                },
                ErrorKind::RecoveryExhausted,
            ),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "wrong kind for {}", error);
        }
    }

    #[test]
    fn test_adapter_timeout_becomes_operation_timeout() {
        let err = TransformerError::from_connection(
            "robot1",
            "write_variable",
            ConnectionError::Timeout(Duration::from_millis(250)),
        );
        match err {
            TransformerError::Timeout { device_id, operation, after } => {
                assert_eq!(device_id, "robot1");
                assert_eq!(operation, "write_variable");
                assert_eq!(after, Duration::from_millis(250));
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_every_error_names_its_device() {
        let err = TransformerError::Cancelled {
            device_id: "cnc7".into(),
        };
        assert_eq!(err.device_id(), "cnc7");
        assert!(err.to_string().contains("cnc7"));
    }
}
