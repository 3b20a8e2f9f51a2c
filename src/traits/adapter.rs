// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::fmt;

use crate::errors::ConnectionError;

/// Connection state of a single adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Reply to one `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub payload: Vec<u8>,
}

impl Response {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Uniform transport used by a transformer instance.
///
/// The adapter value is the connection handle: it is configured when built,
/// `connect` opens it, `disconnect` closes it. `send` writes the request and
/// waits for the matching reply in one call. Adapters never retry and never
/// back off; they report failures as `ConnectionError` and leave policy to
/// the instance that owns them. `connect` and `disconnect` are safe to call
/// repeatedly.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Slot name the owning device refers to this adapter by.
    fn name(&self) -> &str;

    fn protocol(&self) -> &'static str;

    fn endpoint(&self) -> String;

    fn state(&self) -> ConnectionState;

    async fn connect(&mut self) -> Result<(), ConnectionError>;

    async fn disconnect(&mut self) -> Result<(), ConnectionError>;

    async fn send(&mut self, payload: &[u8]) -> Result<Response, ConnectionError>;
}
