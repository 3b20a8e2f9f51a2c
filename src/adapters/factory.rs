// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::memory::{MemoryAdapter, RegisterBank};
use super::tcp::TcpAdapter;
use crate::config::AdapterConfig;
use crate::traits::ProtocolAdapter;

/// Builds an adapter from its config. The duration is the runtime's default
/// call timeout, used when the config sets none.
pub type AdapterConstructor =
    Arc<dyn Fn(&AdapterConfig, Duration) -> Result<Box<dyn ProtocolAdapter>, String> + Send + Sync>;

/// Protocols a device may name in its `adapters` list.
///
/// Populated at startup and passed to the registry; no global state.
#[derive(Clone)]
pub struct AdapterCatalog {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Catalog with the `memory` and `tcp` protocols.
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("memory", Arc::new(build_memory));
        catalog.register("tcp", Arc::new(build_tcp));
        catalog
    }

    /// Register a constructor, replacing any previous one for `protocol`.
    pub fn register(&mut self, protocol: &str, constructor: AdapterConstructor) {
        self.constructors.insert(protocol.to_string(), constructor);
    }

    pub fn create_adapter(
        &self,
        config: &AdapterConfig,
        default_timeout: Duration,
    ) -> Result<Box<dyn ProtocolAdapter>, String> {
        let constructor = self
            .constructors
            .get(&config.protocol)
            .ok_or_else(|| format!("Unknown adapter protocol: '{}'", config.protocol))?;
        constructor(config, default_timeout)
    }

    pub fn list_protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.constructors.keys().cloned().collect();
        protocols.sort();
        protocols
    }

    pub fn is_protocol_available(&self, protocol: &str) -> bool {
        self.constructors.contains_key(protocol)
    }
}

impl Default for AdapterCatalog {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn build_memory(config: &AdapterConfig, _: Duration) -> Result<Box<dyn ProtocolAdapter>, String> {
    let bank = RegisterBank::seeded(&config.initial);
    Ok(Box::new(MemoryAdapter::new(&config.name, bank)))
}

fn build_tcp(config: &AdapterConfig, default_timeout: Duration) -> Result<Box<dyn ProtocolAdapter>, String> {
    let address = config
        .address
        .as_deref()
        .ok_or_else(|| format!("tcp adapter '{}' missing 'address'", config.name))?;
    let port = config
        .port
        .ok_or_else(|| format!("tcp adapter '{}' missing 'port'", config.name))?;
    let timeout = config
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    Ok(Box::new(TcpAdapter::new(&config.name, address, port, timeout)))
}
