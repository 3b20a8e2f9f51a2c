// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for device registration and teardown.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Device '{0}' is already registered")]
    DuplicateDevice(String),

    #[error("Device '{device_id}': machine model '{machine_model}' is not in the catalog")]
    UnknownMachineModel {
        device_id: String,
        machine_model: String,
    },

    #[error("Device '{device_id}': no transformer implementation available for '{reference}'")]
    ImplementationUnavailable { device_id: String, reference: String },

    #[error("Device '{device_id}' cannot be primary: '{existing}' is already the primary device")]
    PrimaryConflict { device_id: String, existing: String },

    #[error("Device '{device_id}': adapter '{adapter}' could not be created: {reason}")]
    AdapterUnavailable {
        device_id: String,
        adapter: String,
        reason: String,
    },

    #[error("Device '{0}' not found")]
    NotFound(String),

    /// Teardown overran its deadline; the slot was released anyway.
    #[error("Device '{device_id}' teardown did not finish within {after:?}; resources abandoned")]
    TeardownTimedOut { device_id: String, after: Duration },
}
