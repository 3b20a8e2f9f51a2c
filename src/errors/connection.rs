// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Transport-level errors raised by protocol adapters.
//!
//! Adapters never retry on their own; they classify what went wrong and hand
//! it back to the owning transformer instance, which decides whether to
//! reconnect, back off, or surface the failure.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a `ProtocolAdapter`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// The connection could not be established.
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// A read or write on an established connection failed.
    #[error("I/O error on {endpoint}: {reason}")]
    Io { endpoint: String, reason: String },

    /// The call did not complete within its deadline.
    #[error("Adapter call timed out after {0:?}")]
    Timeout(Duration),

    /// `send` was called before `connect` succeeded.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The peer closed the connection.
    #[error("Connection to {0} closed by peer")]
    Closed(String),

    /// The peer answered with something the adapter cannot frame.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Whether reconnecting could plausibly fix this error.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ConnectionError::Protocol(_))
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io {
            endpoint: "unknown".to_string(),
            reason: e.to_string(),
        }
    }
}
