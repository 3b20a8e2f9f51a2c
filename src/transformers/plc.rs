// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Safety and cell PLCs.
//!
//! Status comes from the `safety.state` word. Tags live under `tag.`,
//! configuration under `cfg.`, discrete I/O under `di.` and `do.`.
//! The `interval_tags` device option lists tags sampled on every poll.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

use super::capabilities::CapabilityTable;
use super::command::{Command, CommandKind};
use super::values::{check_name, decode, parse_level, read_named, write_named};
use crate::engine::DeviceIo;
use crate::errors::{TransformerError, TransformerResult};
use crate::model::{DeviceStatus, Health};
use crate::traits::Transformer;

pub const INTERVAL_TAGS_OPTION: &str = "interval_tags";

fn safety_state(raw: &str) -> (&'static str, Health) {
    match raw.trim() {
        "0" | "OK" => ("OK", Health::Ok),
        "1" | "OPERATOR_DOOR_OPEN" => ("OPERATOR_DOOR_OPEN", Health::Degraded),
        "2" | "EMERGENCY_STOP" => ("EMERGENCY_STOP", Health::Fault),
        _ => ("FAULT", Health::Fault),
    }
}

pub struct PlcTransformer {
    capabilities: CapabilityTable,
    interval_tags: Vec<String>,
}

impl PlcTransformer {
    pub fn new(options: &HashMap<String, Value>) -> Self {
        let capabilities = CapabilityTable::new()
            .with(CommandKind::ClearAlarms)
            .with(CommandKind::ReadDigitalInput)
            .with(CommandKind::SetDigitalOutput)
            .with_generic_from_options(options);

        let interval_tags = options
            .get(INTERVAL_TAGS_OPTION)
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            capabilities,
            interval_tags,
        }
    }
}

#[async_trait]
impl Transformer for PlcTransformer {
    fn name(&self) -> &'static str {
        "PlcTransformer"
    }

    fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    async fn read_interval_data(
        &self,
        io: &mut DeviceIo,
    ) -> TransformerResult<BTreeMap<String, Value>> {
        let mut data = BTreeMap::new();
        for tag in &self.interval_tags {
            check_name(io.device_id(), "tag", tag)?;
            if let Some(raw) = io.read_register(&format!("tag.{}", tag)).await? {
                data.insert(tag.clone(), decode(&raw));
            }
        }
        Ok(data)
    }

    async fn read_status(&self, io: &mut DeviceIo) -> TransformerResult<DeviceStatus> {
        let raw = io.read_register("safety.state").await?.ok_or_else(|| {
            TransformerError::protocol(io.device_id(), "PLC did not report safety.state")
        })?;
        let (code, health) = safety_state(&raw);
        Ok(DeviceStatus::new(code, health).with_value("safety_word", decode(&raw)))
    }

    async fn read_variable(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value> {
        read_named(io, "tag", "tag", name).await
    }

    async fn write_variable(
        &self,
        io: &mut DeviceIo,
        name: &str,
        value: Value,
    ) -> TransformerResult<Value> {
        write_named(io, "tag", "tag", name, value).await
    }

    async fn read_parameter(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value> {
        read_named(io, "cfg", "parameter", name).await
    }

    async fn write_parameter(
        &self,
        io: &mut DeviceIo,
        name: &str,
        value: Value,
    ) -> TransformerResult<Value> {
        write_named(io, "cfg", "parameter", name, value).await
    }

    async fn execute_command(
        &self,
        io: &mut DeviceIo,
        command: &Command,
    ) -> TransformerResult<Value> {
        match command {
            Command::ClearAlarms => {
                io.write_register("safety.reset", "1").await?;
                Ok(json!({ "command": command.name(), "accepted": true }))
            }
            Command::ReadDigitalInput { index } => {
                let key = format!("di.{}", index);
                let raw = io.read_register(&key).await?.ok_or_else(|| {
                    TransformerError::validation(io.device_id(), format!("no digital input {}", index))
                })?;
                let value = parse_level(&raw).ok_or_else(|| {
                    TransformerError::protocol(io.device_id(), format!("{} is not a digital level: '{}'", key, raw))
                })?;
                Ok(json!({ "index": index, "value": value }))
            }
            Command::SetDigitalOutput { index, value } => {
                let level = if *value { "1" } else { "0" };
                io.write_register(&format!("do.{}", index), level).await?;
                Ok(json!({ "index": index, "value": value }))
            }
            Command::Generic { name, args } => {
                let key = format!("cmd.{}", name.to_ascii_lowercase());
                io.write_register(&key, &args.to_string()).await?;
                Ok(json!({ "command": name, "accepted": true }))
            }
            other => Err(TransformerError::UnsupportedCommand {
                device_id: io.device_id().to_string(),
                command: other.name().to_string(),
            }),
        }
    }
}
