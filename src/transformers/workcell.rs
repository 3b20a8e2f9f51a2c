// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The workcell as a device.
//!
//! A workcell has no adapters of its own. Its status is the reconciled
//! status of its members, its variables expose the engine's view, and its
//! commands drive recovery and escalation.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::capabilities::CapabilityTable;
use super::command::{Command, CommandKind};
use crate::engine::{DeviceIo, WorkcellEngine};
use crate::errors::{TransformerError, TransformerResult};
use crate::model::DeviceStatus;
use crate::traits::Transformer;

pub const RECONCILE_COMMAND: &str = "RECONCILE";

pub struct WorkcellTransformer {
    engine: Arc<WorkcellEngine>,
    capabilities: CapabilityTable,
}

impl WorkcellTransformer {
    pub fn new(engine: Arc<WorkcellEngine>) -> Self {
        let capabilities = CapabilityTable::new()
            .with(CommandKind::ClearAlarms)
            .with(CommandKind::Restart)
            .with_generic(RECONCILE_COMMAND);
        Self {
            engine,
            capabilities,
        }
    }

    pub fn engine(&self) -> &Arc<WorkcellEngine> {
        &self.engine
    }
}

fn positive_count(device_id: &str, name: &str, value: &Value) -> TransformerResult<u32> {
    value
        .as_u64()
        .filter(|n| *n >= 1)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            TransformerError::validation(
                device_id,
                format!("{} must be a positive integer, got {}", name, value),
            )
        })
}

#[async_trait]
impl Transformer for WorkcellTransformer {
    fn name(&self) -> &'static str {
        "WorkcellTransformer"
    }

    fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    fn watched_devices(&self) -> Vec<String> {
        self.engine.members().to_vec()
    }

    async fn read_status(&self, _io: &mut DeviceIo) -> TransformerResult<DeviceStatus> {
        let report = self.engine.reconcile().await;
        let members: BTreeMap<&str, Value> = report
            .members
            .iter()
            .map(|m| (m.device_id.as_str(), json!(m.health)))
            .collect();

        Ok(
            DeviceStatus::new(report.aggregate.status.to_string(), report.aggregate.status)
                .with_value("phase", json!(report.phase))
                .with_value(
                    "contributing_device_ids",
                    json!(report.aggregate.contributing_device_ids),
                )
                .with_value("members", json!(members))
                .with_value("escalated", json!(self.engine.escalated())),
        )
    }

    async fn read_variable(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value> {
        let value = match name {
            "phase" => json!(self.engine.phase().await),
            "status" => json!(self.engine.last_aggregate().await.map(|a| a.status)),
            "contributing_device_ids" => json!(self
                .engine
                .last_aggregate()
                .await
                .map(|a| a.contributing_device_ids)
                .unwrap_or_default()),
            "escalated" => json!(self.engine.escalated()),
            "recovering" => json!(self.engine.recoveries_in_flight()),
            other => {
                return Err(TransformerError::validation(
                    io.device_id(),
                    format!("unknown variable '{}'", other),
                ))
            }
        };
        Ok(value)
    }

    async fn write_variable(
        &self,
        io: &mut DeviceIo,
        name: &str,
        _value: Value,
    ) -> TransformerResult<Value> {
        Err(TransformerError::validation(
            io.device_id(),
            format!("workcell variable '{}' is read-only", name),
        ))
    }

    async fn read_parameter(&self, io: &mut DeviceIo, name: &str) -> TransformerResult<Value> {
        let value = match name {
            "failure_threshold" => json!(self.engine.failure_threshold()),
            "max_recovery_attempts" => json!(self.engine.max_recovery_attempts()),
            "reducer" => json!(self.engine.reducer_name()),
            "members" => json!(self.engine.members()),
            "auto_clear_alarms" => json!(self.engine.auto_clear_alarms()),
            "indicator_device" => json!(self.engine.indicator_device()),
            other => {
                return Err(TransformerError::validation(
                    io.device_id(),
                    format!("unknown parameter '{}'", other),
                ))
            }
        };
        Ok(value)
    }

    async fn write_parameter(
        &self,
        io: &mut DeviceIo,
        name: &str,
        value: Value,
    ) -> TransformerResult<Value> {
        match name {
            "failure_threshold" => {
                let threshold = positive_count(io.device_id(), name, &value)?;
                self.engine.set_failure_threshold(threshold);
                Ok(json!(threshold))
            }
            "max_recovery_attempts" => {
                let attempts = positive_count(io.device_id(), name, &value)?;
                self.engine.set_max_recovery_attempts(attempts);
                Ok(json!(attempts))
            }
            "auto_clear_alarms" => {
                let enabled = value.as_bool().ok_or_else(|| {
                    TransformerError::validation(io.device_id(), format!("{} must be a boolean", name))
                })?;
                self.engine.set_auto_clear_alarms(enabled);
                Ok(json!(enabled))
            }
            other => Err(TransformerError::validation(
                io.device_id(),
                format!("parameter '{}' cannot be written", other),
            )),
        }
    }

    async fn execute_command(
        &self,
        io: &mut DeviceIo,
        command: &Command,
    ) -> TransformerResult<Value> {
        match command {
            Command::ClearAlarms => {
                let reset = self.engine.clear_escalation().await;
                Ok(json!({ "command": command.name(), "devices_reset": reset }))
            }
            Command::Restart => {
                let started = self.engine.recover_degraded().await;
                Ok(json!({ "command": command.name(), "recoveries_started": started }))
            }
            Command::Generic { name, .. } if name == RECONCILE_COMMAND => {
                let report = self.engine.reconcile().await;
                Ok(json!({
                    "status": report.aggregate.status,
                    "contributing_device_ids": report.aggregate.contributing_device_ids,
                    "phase": report.phase,
                    "event_emitted": report.event.is_some(),
                    "recoveries_started": report.recoveries_started,
                }))
            }
            other => Err(TransformerError::UnsupportedCommand {
                device_id: io.device_id().to_string(),
                command: other.name().to_string(),
            }),
        }
    }

    async fn shutdown(&self) {
        self.engine.shutdown();
    }
}
