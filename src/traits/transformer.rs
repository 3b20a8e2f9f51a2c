// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::engine::DeviceIo;
use crate::errors::TransformerResult;
use crate::model::DeviceStatus;
use crate::transformers::{CapabilityTable, Command};

/// One equipment family's translation between runtime operations and the
/// vendor's request/response shape.
///
/// Implementations hold no connection state of their own. All I/O goes
/// through the `DeviceIo` handed in by the owning instance, which applies
/// timeouts, reconnection and error classification uniformly.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Commands this device accepts. Anything else is rejected before I/O.
    fn capabilities(&self) -> &CapabilityTable;

    /// Devices whose state changes should trigger a status read of this one.
    fn watched_devices(&self) -> Vec<String> {
        Vec::new()
    }

    async fn read_interval_data(
        &self,
        _io: &mut DeviceIo,
    ) -> TransformerResult<BTreeMap<String, Value>> {
        Ok(BTreeMap::new())
    }

    async fn read_status(&self, io: &mut DeviceIo) -> TransformerResult<DeviceStatus>;

    async fn read_variable(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value>;

    async fn write_variable(
        &self,
        io: &mut DeviceIo,
        name: &str,
        value: Value,
    ) -> TransformerResult<Value>;

    async fn read_parameter(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value>;

    async fn write_parameter(
        &self,
        io: &mut DeviceIo,
        name: &str,
        value: Value,
    ) -> TransformerResult<Value>;

    /// Run a command that already passed the capability check.
    async fn execute_command(&self, io: &mut DeviceIo, command: &Command)
        -> TransformerResult<Value>;

    /// Called once from the instance's I/O task before it releases its adapters.
    async fn shutdown(&self) {}
}
