// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use thiserror::Error;

/// Errors that can occur during configuration validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Two devices share an id
    DuplicateDeviceId {
        device_id: String,
    },
    /// More than one device is flagged primary
    MultiplePrimaries {
        device_ids: Vec<String>,
    },
    /// A device references a machine model that is not in the catalog
    UnknownMachineModel {
        device_id: String,
        machine_model: String,
    },
    /// A machine model references a transformer descriptor that doesn't exist
    UnknownTransformer {
        machine_model: String,
        transformer: String,
    },
    /// A workcell lists a member that is not a configured device
    UnresolvedMember {
        workcell_id: String,
        member: String,
    },
    /// A workcell lists itself, or lists nothing
    InvalidWorkcell {
        workcell_id: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateDeviceId { device_id } => {
                write!(f, "Duplicate device ID: '{}'", device_id)
            }
            ConfigError::MultiplePrimaries { device_ids } => {
                write!(
                    f,
                    "At most one device may be primary, found: {}",
                    device_ids.join(", ")
                )
            }
            ConfigError::UnknownMachineModel {
                device_id,
                machine_model,
            } => {
                write!(
                    f,
                    "Device '{}' uses machine model '{}' which does not exist",
                    device_id, machine_model
                )
            }
            ConfigError::UnknownTransformer {
                machine_model,
                transformer,
            } => {
                write!(
                    f,
                    "Machine model '{}' references transformer '{}' which does not exist",
                    machine_model, transformer
                )
            }
            ConfigError::UnresolvedMember {
                workcell_id,
                member,
            } => {
                write!(
                    f,
                    "Workcell '{}' lists member '{}' which does not exist",
                    workcell_id, member
                )
            }
            ConfigError::InvalidWorkcell {
                workcell_id,
                reason,
            } => {
                write!(f, "Workcell '{}' is invalid: {}", workcell_id, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure to produce a usable `Config` from a file.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration validation failed:\n{}", join_errors(.0))]
    Invalid(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
