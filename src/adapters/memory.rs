// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::adapters::line::{LineReply, LineRequest};
use crate::errors::ConnectionError;
use crate::traits::{ConnectionState, ProtocolAdapter, Response};

/// Register contents of simulated equipment.
///
/// Outlives any single adapter so values survive reconnects. Cloning shares
/// the same registers.
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    inner: Arc<Mutex<BankState>>,
}

#[derive(Debug)]
struct BankState {
    registers: HashMap<String, String>,
    online: bool,
}

impl Default for BankState {
    fn default() -> Self {
        Self {
            registers: HashMap::new(),
            online: true,
        }
    }
}

impl RegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(initial: &HashMap<String, String>) -> Self {
        let bank = Self::new();
        bank.lock().registers.extend(initial.clone());
        bank
    }

    fn lock(&self) -> MutexGuard<'_, BankState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().registers.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.lock()
            .registers
            .insert(key.to_string(), value.to_string());
    }

    /// Simulate the equipment dropping off, or coming back onto, the network.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    fn apply(&self, request: LineRequest) -> LineReply {
        let mut state = self.lock();
        match request {
            LineRequest::Ping => LineReply::Pong,
            LineRequest::Read(key) => match state.registers.get(&key) {
                Some(value) => LineReply::Value(value.clone()),
                None => LineReply::Err(format!("no such register {}", key)),
            },
            LineRequest::Write(key, value) => {
                state.registers.insert(key, value);
                LineReply::Ok
            }
        }
    }
}

/// Adapter backed by an in-process `RegisterBank`.
pub struct MemoryAdapter {
    name: String,
    bank: RegisterBank,
    state: ConnectionState,
}

impl MemoryAdapter {
    pub fn new(name: &str, bank: RegisterBank) -> Self {
        Self {
            name: name.to_string(),
            bank,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }
}

#[async_trait]
impl ProtocolAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &'static str {
        "memory"
    }

    fn endpoint(&self) -> String {
        format!("memory://{}", self.name)
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if !self.bank.is_online() {
            self.state = ConnectionState::Failed;
            return Err(ConnectionError::ConnectFailed {
                endpoint: self.endpoint(),
                reason: "equipment offline".to_string(),
            });
        }
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<Response, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected(self.name.clone()));
        }
        if !self.bank.is_online() {
            self.state = ConnectionState::Failed;
            return Err(ConnectionError::Closed(self.endpoint()));
        }

        let request = LineRequest::parse(payload).map_err(ConnectionError::Protocol)?;
        Ok(Response::new(self.bank.apply(request).encode()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let mut adapter = MemoryAdapter::new("main", RegisterBank::new());
        adapter.connect().await.unwrap();

        let reply = adapter
            .send(&LineRequest::write("var.speed", "42").encode())
            .await
            .unwrap();
        assert_eq!(reply.text(), "OK");

        let reply = adapter
            .send(&LineRequest::read("var.speed").encode())
            .await
            .unwrap();
        assert_eq!(reply.text(), "VAL 42");
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let mut adapter = MemoryAdapter::new("main", RegisterBank::new());
        let err = adapter.send(b"PING").await.unwrap_err();
        assert_eq!(err, ConnectionError::NotConnected("main".into()));
    }

    #[tokio::test]
    async fn test_offline_bank() {
        let bank = RegisterBank::new();
        let mut adapter = MemoryAdapter::new("main", bank.clone());
        adapter.connect().await.unwrap();

        bank.set_online(false);
        assert!(matches!(
            adapter.send(b"PING").await,
            Err(ConnectionError::Closed(_))
        ));
        assert_eq!(adapter.state(), ConnectionState::Failed);
        assert!(adapter.connect().await.is_err());

        bank.set_online(true);
        adapter.connect().await.unwrap();
        assert_eq!(adapter.send(b"PING").await.unwrap().text(), "PONG");
    }

    #[tokio::test]
    async fn test_registers_survive_reconnect() {
        let bank = RegisterBank::seeded(&HashMap::from([("robot.mode".to_string(), "1".to_string())]));
        let mut adapter = MemoryAdapter::new("main", bank);
        adapter.connect().await.unwrap();
        adapter.disconnect().await.unwrap();
        adapter.connect().await.unwrap();

        let reply = adapter.send(b"READ robot.mode").await.unwrap();
        assert_eq!(reply.text(), "VAL 1");
    }
}
