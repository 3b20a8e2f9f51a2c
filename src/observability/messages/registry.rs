// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for device registration and teardown.

use crate::errors::RegistryError;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Device registered and its instance started.
///
/// # Log Level
/// `info!`
pub struct DeviceRegistered<'a> {
    pub device_id: &'a str,
    pub machine_model: &'a str,
    pub transformer: &'a str,
    pub primary: bool,
}

impl Display for DeviceRegistered<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Registered device '{}' (model '{}', transformer {}{})",
            self.device_id,
            self.machine_model,
            self.transformer,
            if self.primary { ", primary" } else { "" }
        )
    }
}

impl StructuredLog for DeviceRegistered<'_> {
    fn log(&self) {
        tracing::info!(
            device_id = self.device_id,
            machine_model = self.machine_model,
            transformer = self.transformer,
            primary = self.primary,
            "{}", self
        );
    }
}

/// Registration refused.
///
/// # Log Level
/// `warn!`
pub struct RegistrationRejected<'a> {
    pub device_id: &'a str,
    pub error: &'a RegistryError,
}

impl Display for RegistrationRejected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Rejected registration of '{}': {}", self.device_id, self.error)
    }
}

impl StructuredLog for RegistrationRejected<'_> {
    fn log(&self) {
        tracing::warn!(device_id = self.device_id, "{}", self);
    }
}

/// Device torn down cleanly.
///
/// # Log Level
/// `info!`
pub struct DeviceUnregistered<'a> {
    pub device_id: &'a str,
}

impl Display for DeviceUnregistered<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Unregistered device '{}'", self.device_id)
    }
}

impl StructuredLog for DeviceUnregistered<'_> {
    fn log(&self) {
        tracing::info!(device_id = self.device_id, "{}", self);
    }
}

/// Teardown overran its deadline; the instance task was aborted.
///
/// # Log Level
/// `error!` - Adapter resources may not have been closed cleanly
pub struct TeardownForced<'a> {
    pub device_id: &'a str,
    pub timeout: Duration,
}

impl Display for TeardownForced<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device '{}' teardown exceeded {:?}; aborted and marked destroyed",
            self.device_id, self.timeout
        )
    }
}

impl StructuredLog for TeardownForced<'_> {
    fn log(&self) {
        tracing::error!(
            device_id = self.device_id,
            timeout_ms = self.timeout.as_millis() as u64,
            "{}", self
        );
    }
}
