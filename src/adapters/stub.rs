// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::adapters::line::{LineReply, LineRequest};
use crate::errors::ConnectionError;
use crate::traits::{ConnectionState, ProtocolAdapter, Response};

/// An adapter whose connect always fails, counting every attempt
pub struct FailingConnectAdapter {
    pub attempts: Arc<AtomicU32>,
    state: ConnectionState,
}

impl FailingConnectAdapter {
    pub fn new(attempts: Arc<AtomicU32>) -> Self {
        Self {
            attempts,
            state: ConnectionState::Disconnected,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for FailingConnectAdapter {
    fn name(&self) -> &str {
        "main"
    }

    fn protocol(&self) -> &'static str {
        "failing"
    }

    fn endpoint(&self) -> String {
        "failing://nowhere".to_string()
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.state = ConnectionState::Failed;
        Err(ConnectionError::ConnectFailed {
            endpoint: self.endpoint(),
            reason: "connection refused".to_string(),
        })
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn send(&mut self, _payload: &[u8]) -> Result<Response, ConnectionError> {
        Err(ConnectionError::NotConnected("main".to_string()))
    }
}

/// An adapter whose send never returns. Flags `released` when dropped.
pub struct HangingAdapter {
    pub released: Arc<AtomicBool>,
    state: ConnectionState,
}

impl HangingAdapter {
    pub fn new(released: Arc<AtomicBool>) -> Self {
        Self {
            released,
            state: ConnectionState::Disconnected,
        }
    }
}

impl Drop for HangingAdapter {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProtocolAdapter for HangingAdapter {
    fn name(&self) -> &str {
        "main"
    }

    fn protocol(&self) -> &'static str {
        "hanging"
    }

    fn endpoint(&self) -> String {
        "hanging://blackhole".to_string()
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn send(&mut self, _payload: &[u8]) -> Result<Response, ConnectionError> {
        std::future::pending::<()>().await;
        Err(ConnectionError::Closed(self.endpoint()))
    }
}

/// An adapter that logs `begin`/`end` around every send so tests can check
/// that calls never interleave.
pub struct RecordingAdapter {
    pub log: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    state: ConnectionState,
}

impl RecordingAdapter {
    pub fn new(log: Arc<Mutex<Vec<String>>>, delay: Duration) -> Self {
        Self {
            log,
            delay,
            state: ConnectionState::Disconnected,
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl ProtocolAdapter for RecordingAdapter {
    fn name(&self) -> &str {
        "main"
    }

    fn protocol(&self) -> &'static str {
        "recording"
    }

    fn endpoint(&self) -> String {
        "recording://log".to_string()
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<Response, ConnectionError> {
        let request = LineRequest::parse(payload).map_err(ConnectionError::Protocol)?;
        self.record(format!("begin {}", request));
        tokio::time::sleep(self.delay).await;
        self.record(format!("end {}", request));

        let reply = match request {
            LineRequest::Read(_) => LineReply::Value("1".to_string()),
            LineRequest::Write(..) => LineReply::Ok,
            LineRequest::Ping => LineReply::Pong,
        };
        Ok(Response::new(reply.encode()))
    }
}
