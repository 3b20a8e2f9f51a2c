// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Serialize;
use std::fmt;

use super::StatusSnapshot;

/// Lifecycle of a registered device.
///
/// `Destroyed` is terminal; every other state can be left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Created,
    Connected,
    Degraded,
    Disconnected,
    Destroyed,
}

impl DeviceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeviceState::Destroyed)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Created => "created",
            DeviceState::Connected => "connected",
            DeviceState::Degraded => "degraded",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Static identity of a registered device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub device_id: String,
    pub machine_model: String,
    /// Entry point of the transformer implementation bound to this device
    pub transformer: String,
    pub primary: bool,
}

/// Published on every lifecycle transition of any device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStateChange {
    pub device_id: String,
    pub from: DeviceState,
    pub to: DeviceState,
}

/// One row of the device listing.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    #[serde(flatten)]
    pub device: Device,
    pub state: DeviceState,
    pub last_status: StatusSnapshot,
}
