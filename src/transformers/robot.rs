// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Articulated robot controllers.
//!
//! Register map:
//!
//! | key                 | meaning                              |
//! |---------------------|--------------------------------------|
//! | `robot.mode`        | operating mode, numeric or by name   |
//! | `robot.program`     | loaded program                       |
//! | `robot.alarms`      | active alarm count                   |
//! | `robot.cycle_count` | completed cycles                     |
//! | `robot.command`     | command word written by the runtime  |
//! | `var.<name>`        | program variables                    |
//! | `param.<name>`      | controller parameters                |
//! | `io.di.<n>`         | digital inputs                       |
//! | `io.do.<n>`         | digital outputs                      |
//! | `cmd.<name>`        | generic commands, arguments as JSON  |

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

use super::capabilities::CapabilityTable;
use super::command::{Command, CommandKind};
use super::values::{decode, encode, parse_level, read_named, write_named};
use crate::engine::DeviceIo;
use crate::errors::{TransformerError, TransformerResult};
use crate::model::{DeviceStatus, Health};
use crate::traits::Transformer;

const MODES: [(&str, Health); 5] = [
    ("IDLE", Health::Ok),
    ("RUNNING", Health::Ok),
    ("FAULT", Health::Fault),
    ("EMERGENCY_STOP", Health::Fault),
    ("TEACH_PENDANT_MODE", Health::Ok),
];

/// Map a raw `robot.mode` register to a status code and health.
fn mode(raw: &str) -> Option<(&'static str, Health)> {
    let raw = raw.trim();
    if let Ok(index) = raw.parse::<usize>() {
        return MODES.get(index).copied();
    }
    MODES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(raw))
        .copied()
}

pub struct RobotTransformer {
    capabilities: CapabilityTable,
}

impl RobotTransformer {
    pub fn new(options: &HashMap<String, Value>) -> Self {
        let capabilities = CapabilityTable::new()
            .with(CommandKind::Restart)
            .with(CommandKind::ClearAlarms)
            .with(CommandKind::StartCycle)
            .with(CommandKind::StopCycle)
            .with(CommandKind::LoadProgram)
            .with(CommandKind::ReadDigitalInput)
            .with(CommandKind::SetDigitalOutput)
            .with_generic_from_options(options);
        Self { capabilities }
    }

    async fn command_word(&self, io: &mut DeviceIo, word: &str) -> TransformerResult<Value> {
        io.write_register("robot.command", word).await?;
        Ok(json!({ "command": word, "accepted": true }))
    }
}

#[async_trait]
impl Transformer for RobotTransformer {
    fn name(&self) -> &'static str {
        "RobotTransformer"
    }

    fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    async fn read_interval_data(
        &self,
        io: &mut DeviceIo,
    ) -> TransformerResult<BTreeMap<String, Value>> {
        let mut data = BTreeMap::new();
        if let Some(raw) = io.read_register("robot.cycle_count").await? {
            data.insert("cycle_count".to_string(), decode(&raw));
        }
        if let Some(raw) = io.read_register("robot.program").await? {
            data.insert("program".to_string(), decode(&raw));
        }
        Ok(data)
    }

    async fn read_status(&self, io: &mut DeviceIo) -> TransformerResult<DeviceStatus> {
        let raw = io.read_register("robot.mode").await?.ok_or_else(|| {
            TransformerError::protocol(io.device_id(), "controller did not report robot.mode")
        })?;
        let (code, health) = mode(&raw).ok_or_else(|| {
            TransformerError::protocol(io.device_id(), format!("unknown robot mode '{}'", raw))
        })?;

        let mut status = DeviceStatus::new(code, health);
        if let Some(raw) = io.read_register("robot.alarms").await? {
            status = status.with_value("alarms", decode(&raw));
        }
        Ok(status)
    }

    async fn read_variable(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value> {
        read_named(io, "var", "variable", name).await
    }

    async fn write_variable(
        &self,
        io: &mut DeviceIo,
        name: &str,
        value: Value,
    ) -> TransformerResult<Value> {
        write_named(io, "var", "variable", name, value).await
    }

    async fn read_parameter(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value> {
        read_named(io, "param", "parameter", name).await
    }

    async fn write_parameter(
        &self,
        io: &mut DeviceIo,
        name: &str,
        value: Value,
    ) -> TransformerResult<Value> {
        write_named(io, "param", "parameter", name, value).await
    }

    async fn execute_command(
        &self,
        io: &mut DeviceIo,
        command: &Command,
    ) -> TransformerResult<Value> {
        match command {
            Command::Restart => self.command_word(io, "RESTART").await,
            Command::StartCycle => self.command_word(io, "START_CYCLE").await,
            Command::StopCycle => self.command_word(io, "STOP_CYCLE").await,
            Command::ClearAlarms => {
                io.write_register("robot.alarms", "0").await?;
                Ok(json!({ "command": command.name(), "alarms": 0 }))
            }
            Command::LoadProgram { program } => {
                io.write_register("robot.program", &encode(&json!(program))).await?;
                Ok(json!({ "command": command.name(), "program": program }))
            }
            Command::ReadDigitalInput { index } => {
                let key = format!("io.di.{}", index);
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
                io.write_register(&format!("io.do.{}", index), level).await?;
                Ok(json!({ "index": index, "value": value }))
            }
            Command::Generic { name, args } => {
                let key = format!("cmd.{}", name.to_ascii_lowercase());
                io.write_register(&key, &args.to_string()).await?;
                Ok(json!({ "command": name, "accepted": true }))
            }
        }
    }
}
