// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for adapter connections and device lifecycle events.
//!
//! This module contains message types for logging events related to:
//! * Adapter connect, disconnect and connection failures
//! * Device state transitions
//! * Reconnection attempts and giving up
//! * Classified operation failures
//! * Queued requests dropped after their caller gave up

use crate::errors::{ConnectionError, TransformerError};
use crate::model::DeviceState;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// Adapter connection established.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use the_workcell::observability::messages::device::AdapterConnected;
///
/// let msg = AdapterConnected {
///     device_id: "robot1",
///     adapter: "main",
///     endpoint: "10.0.0.12:29999",
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct AdapterConnected<'a> {
    pub device_id: &'a str,
    pub adapter: &'a str,
    pub endpoint: &'a str,
}

impl Display for AdapterConnected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' adapter '{}' connected to {}",
            self.device_id, self.adapter, self.endpoint
        )
    }
}

impl StructuredLog for AdapterConnected<'_> {
    fn log(&self) {
        tracing::info!(
            device_id = self.device_id,
            adapter = self.adapter,
            endpoint = self.endpoint,
            "{}", self
        );
    }
}

/// Adapter connection attempt failed.
///
/// # Log Level
/// `warn!` - Expected on flaky links; the instance will back off and retry
pub struct AdapterConnectFailed<'a> {
    pub device_id: &'a str,
    pub adapter: &'a str,
    pub error: &'a ConnectionError,
}

impl Display for AdapterConnectFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' adapter '{}' failed to connect: {}",
            self.device_id, self.adapter, self.error
        )
    }
}

impl StructuredLog for AdapterConnectFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            device_id = self.device_id,
            adapter = self.adapter,
            error = %self.error,
            "{}", self
        );
    }
}

/// Adapter closed.
///
/// # Log Level
/// `debug!`
pub struct AdapterDisconnected<'a> {
    pub device_id: &'a str,
    pub adapter: &'a str,
}

impl Display for AdapterDisconnected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' adapter '{}' disconnected",
            self.device_id, self.adapter
        )
    }
}

impl StructuredLog for AdapterDisconnected<'_> {
    fn log(&self) {
        tracing::debug!(device_id = self.device_id, adapter = self.adapter, "{}", self);
    }
}

/// Device moved between lifecycle states.
///
/// # Log Level
/// `info!` for recoveries and teardown, `warn!` when entering `Degraded`
///
/// # Example
/// ```
/// use the_workcell::model::DeviceState;
/// use the_workcell::observability::messages::device::DeviceStateChanged;
///
/// let msg = DeviceStateChanged {
///     device_id: "plc1",
///     from: DeviceState::Connected,
///     to: DeviceState::Degraded,
/// };
///
/// assert_eq!(msg.to_string(), "Device 'plc1' state connected -> degraded");
/// ```
pub struct DeviceStateChanged<'a> {
    pub device_id: &'a str,
    pub from: DeviceState,
    pub to: DeviceState,
}

impl Display for DeviceStateChanged<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' state {} -> {}",
            self.device_id, self.from, self.to
        )
    }
}

impl StructuredLog for DeviceStateChanged<'_> {
    fn log(&self) {
        if self.to == DeviceState::Degraded {
            tracing::warn!(
                device_id = self.device_id,
                from = %self.from,
                to = %self.to,
                "{}", self
            );
        } else {
            tracing::info!(
                device_id = self.device_id,
                from = %self.from,
                to = %self.to,
                "{}", self
            );
        }
    }
}

/// One reconnect attempt during recovery failed; waiting before the next.
///
/// # Log Level
/// `info!`
pub struct ReconnectScheduled<'a> {
    pub device_id: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Display for ReconnectScheduled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' reconnect attempt {}/{} failed, next in {:?}",
            self.device_id, self.attempt, self.max_attempts, self.delay
        )
    }
}

impl StructuredLog for ReconnectScheduled<'_> {
    fn log(&self) {
        tracing::info!(
            device_id = self.device_id,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            delay_ms = self.delay.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "reconnect",
            span_name = name,
            device_id = self.device_id,
            max_attempts = self.max_attempts,
        )
    }
}

/// Reconnection ran out of attempts.
///
/// # Log Level
/// `error!` - Requires operator intervention
pub struct ReconnectExhausted<'a> {
    pub device_id: &'a str,
    pub attempts: u32,
}

impl Display for ReconnectExhausted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' gave up reconnecting after {} attempts",
            self.device_id, self.attempts
        )
    }
}

impl StructuredLog for ReconnectExhausted<'_> {
    fn log(&self) {
        tracing::error!(device_id = self.device_id, attempts = self.attempts, "{}", self);
    }
}

/// A device operation returned an error to its caller.
///
/// # Log Level
/// `warn!`
pub struct OperationFailed<'a> {
    pub device_id: &'a str,
    pub operation: &'a str,
    pub error: &'a TransformerError,
}

impl Display for OperationFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' {} failed: {}",
            self.device_id, self.operation, self.error
        )
    }
}

impl StructuredLog for OperationFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            device_id = self.device_id,
            operation = self.operation,
            kind = ?self.error.kind(),
            "{}", self
        );
    }
}

/// A queued request was dropped unexecuted because its caller had already
/// timed out or gone away.
///
/// # Log Level
/// `warn!`
pub struct RequestAbandoned<'a> {
    pub device_id: &'a str,
    pub operation: &'a str,
}

impl Display for RequestAbandoned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' dropped queued {}: caller no longer waiting",
            self.device_id, self.operation
        )
    }
}

impl StructuredLog for RequestAbandoned<'_> {
    fn log(&self) {
        tracing::warn!(
            device_id = self.device_id,
            operation = self.operation,
            "{}", self
        );
    }
}
