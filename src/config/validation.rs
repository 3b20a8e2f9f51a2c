//! Configuration validation for device catalogs and workcells.
//!
//! Runs before any device is registered so that a bad file is rejected as a
//! whole instead of leaving a half-started runtime behind.
//!
//! # Validation Pipeline
//!
//! 1. **Uniqueness**: device ids are unique
//! 2. **Primary**: at most one device is primary
//! 3. **Catalog references**: every device's machine model exists, and every
//!    machine model points at an existing transformer descriptor
//! 4. **Workcells**: members exist, are not the workcell itself, and the list is not empty;
//!    an indicator drives outputs on one of the members
//!
//! All stages run; every error found is returned.
//!
//! # Example
//! ```rust
//! use the_workcell::config::{validate_config, Config, DeviceConfig, RuntimeOptions};
//! use the_workcell::errors::ConfigError;
//!
//! let config = Config {
//!     runtime: RuntimeOptions::default(),
//!     machine_models: vec![],
//!     transformers: vec![],
//!     devices: vec![DeviceConfig::new("robot1", "ur10e")],
//! };
//!
//! let errors = validate_config(&config).unwrap_err();
//! assert!(matches!(errors[0], ConfigError::UnknownMachineModel { .. }));
//! ```

use std::collections::HashSet;
use crate::config::Config;
use crate::errors::ConfigError;

/// Validate a configuration, collecting every problem.
pub fn validate_config(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    for check in [
        validate_unique_device_ids,
        validate_single_primary,
        validate_catalog_references,
        validate_workcells,
    ] {
        if let Err(found) = check(config) {
            errors.extend(found);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_unique_device_ids(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut seen = HashSet::new();
    let errors: Vec<ConfigError> = config
        .devices
        .iter()
        .filter(|device| !seen.insert(device.id.as_str()))
        .map(|device| ConfigError::DuplicateDeviceId {
            device_id: device.id.clone(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_single_primary(config: &Config) -> Result<(), Vec<ConfigError>> {
    let primaries: Vec<String> = config
        .devices
        .iter()
        .filter(|device| device.primary)
        .map(|device| device.id.clone())
        .collect();

    if primaries.len() > 1 {
        Err(vec![ConfigError::MultiplePrimaries {
            device_ids: primaries,
        }])
    } else {
        Ok(())
    }
}

fn validate_catalog_references(config: &Config) -> Result<(), Vec<ConfigError>> {
    let models: HashSet<&str> = config.machine_models.iter().map(|m| m.id.as_str()).collect();
    let descriptors: HashSet<&str> = config.transformers.iter().map(|t| t.id.as_str()).collect();
    let mut errors = Vec::new();

    for model in &config.machine_models {
        if !descriptors.contains(model.transformer.as_str()) {
            errors.push(ConfigError::UnknownTransformer {
                machine_model: model.id.clone(),
                transformer: model.transformer.clone(),
            });
        }
    }

    for device in &config.devices {
        if !models.contains(device.machine_model.as_str()) {
            errors.push(ConfigError::UnknownMachineModel {
                device_id: device.id.clone(),
                machine_model: device.machine_model.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_workcells(config: &Config) -> Result<(), Vec<ConfigError>> {
    let device_ids: HashSet<&str> = config.devices.iter().map(|d| d.id.as_str()).collect();
    let mut errors = Vec::new();

    for device in &config.devices {
        let Some(workcell) = &device.workcell else {
            continue;
        };

        if workcell.members.is_empty() {
            errors.push(ConfigError::InvalidWorkcell {
                workcell_id: device.id.clone(),
                reason: "no members listed".to_string(),
            });
        }

        for member in &workcell.members {
            if member == &device.id {
                errors.push(ConfigError::InvalidWorkcell {
                    workcell_id: device.id.clone(),
                    reason: "a workcell cannot be its own member".to_string(),
                });
            } else if !device_ids.contains(member.as_str()) {
                errors.push(ConfigError::UnresolvedMember {
                    workcell_id: device.id.clone(),
                    member: member.clone(),
                });
            }
        }

        if let Some(indicator) = &workcell.indicator {
            if !workcell.members.contains(&indicator.device) {
                errors.push(ConfigError::InvalidWorkcell {
                    workcell_id: device.id.clone(),
                    reason: format!("indicator device '{}' is not a member", indicator.device),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
