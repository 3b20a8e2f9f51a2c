// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::DeviceState;

/// Coarse health used to combine device statuses.
///
/// The derived ordering is the severity ordering: `Ok < Unknown < Degraded < Fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Ok,
    Unknown,
    Degraded,
    Fault,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Health::Ok => "OK",
            Health::Unknown => "UNKNOWN",
            Health::Degraded => "DEGRADED",
            Health::Fault => "FAULT",
        };
        f.write_str(s)
    }
}

/// What a transformer reports after reading the equipment's status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// Vendor-level status code, e.g. `RUNNING` or `OPERATOR_DOOR_OPEN`
    pub code: String,
    pub health: Health,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
}

impl DeviceStatus {
    pub fn new(code: impl Into<String>, health: Health) -> Self {
        Self {
            code: code.into(),
            health,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

/// Last-known status of one device, as cached by its instance.
///
/// Only the owning instance writes it. Everyone else receives clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub device_id: String,
    pub state: DeviceState,
    /// Most recent status code read from the equipment
    pub code: Option<String>,
    /// Health the equipment itself reported with `code`
    pub reported: Health,
    /// Interval data and status values, merged
    pub values: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub recovery_exhausted: bool,
}

impl StatusSnapshot {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            state: DeviceState::Created,
            code: None,
            reported: Health::Unknown,
            values: BTreeMap::new(),
            timestamp: Utc::now(),
            consecutive_failures: 0,
            last_error: None,
            recovery_exhausted: false,
        }
    }

    /// Health as seen by a workcell: link state first, reported status second.
    pub fn health(&self) -> Health {
        match self.state {
            DeviceState::Connected => self.reported,
            DeviceState::Degraded => {
                if self.recovery_exhausted {
                    Health::Fault
                } else {
                    Health::Degraded
                }
            }
            DeviceState::Created | DeviceState::Disconnected | DeviceState::Destroyed => {
                Health::Unknown
            }
        }
    }
}
