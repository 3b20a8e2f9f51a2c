// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The I/O boundary of one transformer instance.
//!
//! `DeviceIo` owns a device's adapters and is only ever touched by that
//! device's I/O task. It puts a timeout on every adapter call, tracks link
//! health, reconnects lazily, and turns adapter failures into
//! `TransformerError`s, so transformers only describe request shapes.

use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use super::backoff::ReconnectPolicy;
use crate::adapters::{LineReply, LineRequest};
use crate::errors::{ConnectionError, TransformerError, TransformerResult};
use crate::observability::messages::device::{
    AdapterConnectFailed, AdapterConnected, AdapterDisconnected, ReconnectExhausted,
    ReconnectScheduled,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{ConnectionState, ProtocolAdapter, Response};

/// Whether a failed send may be repeated once after reconnecting.
///
/// Only reads use `Once`; a write that may have reached the device is never
/// sent twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Never,
    Once,
}

/// Consecutive transport failures and the earliest next reconnect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkHealth {
    pub consecutive_failures: u32,
    pub next_attempt_at: Option<Instant>,
    pub last_error: Option<String>,
}

pub struct DeviceIo {
    device_id: String,
    adapters: Vec<Box<dyn ProtocolAdapter>>,
    call_timeout: Duration,
    policy: ReconnectPolicy,
    link: LinkHealth,
}

impl DeviceIo {
    pub fn new(
        device_id: &str,
        adapters: Vec<Box<dyn ProtocolAdapter>>,
        call_timeout: Duration,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            adapters,
            call_timeout,
            policy,
            link: LinkHealth::default(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn link(&self) -> &LinkHealth {
        &self.link
    }

    pub fn has_adapters(&self) -> bool {
        !self.adapters.is_empty()
    }

    pub fn adapter_states(&self) -> Vec<(String, ConnectionState)> {
        self.adapters
            .iter()
            .map(|a| (a.name().to_string(), a.state()))
            .collect()
    }

    /// Send one request and wait for its reply.
    ///
    /// `adapter` picks an adapter by name; `None` means the first one.
    pub async fn request(
        &mut self,
        adapter: Option<&str>,
        payload: &[u8],
        retry: Retry,
    ) -> TransformerResult<Response> {
        let index = self.select(adapter)?;
        let healthy_before = self.link.consecutive_failures == 0;

        self.ensure_connected(index).await?;
        let err = match self.send_once(index, payload).await {
            Ok(response) => {
                self.record_success();
                return Ok(response);
            }
            Err(err) => err,
        };

        if !err.is_transport() {
            return Err(TransformerError::from_connection(&self.device_id, "send", err));
        }
        self.record_failure(&err);
        self.disconnect_one(index).await;

        // One immediate retry, and only for a link that was healthy until now
        if retry == Retry::Never || !healthy_before {
            return Err(TransformerError::from_connection(&self.device_id, "send", err));
        }

        self.connect_one(index).await.map_err(|e| {
            self.record_failure(&e);
            TransformerError::from_connection(&self.device_id, "reconnect", e)
        })?;
        match self.send_once(index, payload).await {
            Ok(response) => {
                self.record_success();
                Ok(response)
            }
            Err(err) => {
                if err.is_transport() {
                    self.record_failure(&err);
                    self.disconnect_one(index).await;
                }
                Err(TransformerError::from_connection(&self.device_id, "send", err))
            }
        }
    }

    /// Send a line-protocol request on the default adapter.
    pub async fn exchange(&mut self, request: &LineRequest, retry: Retry) -> TransformerResult<LineReply> {
        let response = self.request(None, &request.encode(), retry).await?;
        LineReply::parse(&response.text()).map_err(|reason| TransformerError::protocol(&self.device_id, reason))
    }

    /// Read one register. `None` when the device rejects the key.
    pub async fn read_register(&mut self, key: &str) -> TransformerResult<Option<String>> {
        match self.exchange(&LineRequest::read(key), Retry::Once).await? {
            LineReply::Value(value) => Ok(Some(value)),
            LineReply::Err(_) => Ok(None),
            other => Err(TransformerError::protocol(
                &self.device_id,
                format!("expected a value for '{}', got '{}'", key, other),
            )),
        }
    }

    /// Write one register. Never retried.
    pub async fn write_register(&mut self, key: &str, value: &str) -> TransformerResult<()> {
        match self.exchange(&LineRequest::write(key, value), Retry::Never).await? {
            LineReply::Ok => Ok(()),
            LineReply::Err(reason) => Err(TransformerError::validation(&self.device_id, reason)),
            other => Err(TransformerError::protocol(
                &self.device_id,
                format!("expected OK for write of '{}', got '{}'", key, other),
            )),
        }
    }

    /// Connect every adapter that is not already connected.
    pub async fn connect_all(&mut self) -> Result<(), ConnectionError> {
        for index in 0..self.adapters.len() {
            if self.adapters[index].state() != ConnectionState::Connected {
                if let Err(e) = self.connect_one(index).await {
                    self.record_failure(&e);
                    return Err(e);
                }
            }
        }
        self.record_success();
        Ok(())
    }

    /// Close every adapter. Failures are logged, never returned.
    pub async fn disconnect_all(&mut self) {
        for index in 0..self.adapters.len() {
            self.disconnect_one(index).await;
        }
    }

    /// Disconnect, then reconnect with bounded exponential backoff.
    ///
    /// Returns the attempt that succeeded.
    pub async fn recover(&mut self, max_attempts: u32) -> TransformerResult<u32> {
        let max_attempts = max_attempts.max(1);
        self.disconnect_all().await;

        for attempt in 1..=max_attempts {
            let result = self.connect_all_once().await;
            match result {
                Ok(()) => {
                    self.record_success();
                    return Ok(attempt);
                }
                Err(e) => {
                    self.record_failure(&e);
                    if attempt < max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        ReconnectScheduled {
                            device_id: &self.device_id,
                            attempt,
                            max_attempts,
                            delay,
                        }
                        .log();
                        sleep(delay).await;
                    }
                }
            }
        }

        ReconnectExhausted {
            device_id: &self.device_id,
            attempts: max_attempts,
        }
        .log();
        Err(TransformerError::RecoveryExhausted {
            device_id: self.device_id.clone(),
            attempts: max_attempts,
        })
    }

    async fn connect_all_once(&mut self) -> Result<(), ConnectionError> {
        for index in 0..self.adapters.len() {
            self.connect_one(index).await?;
        }
        Ok(())
    }

    fn select(&self, adapter: Option<&str>) -> TransformerResult<usize> {
        if self.adapters.is_empty() {
            return Err(TransformerError::validation(&self.device_id, "device has no adapters"));
        }
        match adapter {
            None => Ok(0),
            Some(name) => self
                .adapters
                .iter()
                .position(|a| a.name() == name)
                .ok_or_else(|| {
                    TransformerError::validation(&self.device_id, format!("no adapter named '{}'", name))
                }),
        }
    }

    /// Lazy reconnect, gated by the backoff deadline after a failure.
    async fn ensure_connected(&mut self, index: usize) -> TransformerResult<()> {
        if self.adapters[index].state() == ConnectionState::Connected {
            return Ok(());
        }

        if let Some(at) = self.link.next_attempt_at {
            if Instant::now() < at {
                let reason = format!(
                    "reconnect backing off after {} failures",
                    self.link.consecutive_failures
                );
                return Err(TransformerError::from_connection(
                    &self.device_id,
                    "connect",
                    ConnectionError::NotConnected(reason),
                ));
            }
        }

        self.connect_one(index).await.map_err(|e| {
            self.record_failure(&e);
            TransformerError::from_connection(&self.device_id, "connect", e)
        })
    }

    async fn connect_one(&mut self, index: usize) -> Result<(), ConnectionError> {
        let call_timeout = self.call_timeout;
        let adapter = &mut self.adapters[index];
        let result = match timeout(call_timeout, adapter.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(call_timeout)),
        };

        match &result {
            Ok(()) => AdapterConnected {
                device_id: &self.device_id,
                adapter: adapter.name(),
                endpoint: &adapter.endpoint(),
            }
            .log(),
            Err(error) => AdapterConnectFailed {
                device_id: &self.device_id,
                adapter: adapter.name(),
                error,
            }
            .log(),
        }
        result
    }

    async fn disconnect_one(&mut self, index: usize) {
        let call_timeout = self.call_timeout;
        let adapter = &mut self.adapters[index];
        match timeout(call_timeout, adapter.disconnect()).await {
            Ok(Ok(())) => AdapterDisconnected {
                device_id: &self.device_id,
                adapter: adapter.name(),
            }
            .log(),
            Ok(Err(e)) => {
                tracing::debug!(device_id = %self.device_id, adapter = adapter.name(), error = %e, "disconnect failed")
            }
            Err(_) => {
                tracing::debug!(device_id = %self.device_id, adapter = adapter.name(), "disconnect timed out")
            }
        }
    }

    async fn send_once(&mut self, index: usize, payload: &[u8]) -> Result<Response, ConnectionError> {
        let call_timeout = self.call_timeout;
        match timeout(call_timeout, self.adapters[index].send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(call_timeout)),
        }
    }

    fn record_success(&mut self) {
        self.link = LinkHealth::default();
    }

    fn record_failure(&mut self, error: &ConnectionError) {
        self.link.consecutive_failures = self.link.consecutive_failures.saturating_add(1);
        self.link.next_attempt_at =
            Some(Instant::now() + self.policy.delay_for(self.link.consecutive_failures));
        self.link.last_error = Some(error.to_string());
    }
}
