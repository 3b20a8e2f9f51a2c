// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod catalog;
mod loader;
mod runtime;
mod validation;

#[cfg(test)]
mod integration_tests;
pub mod consts;

pub use catalog::{MachineCatalog, Unresolved};
pub use loader::{
    load_and_validate_config, load_config, AdapterConfig, Config, DeviceConfig, IndicatorConfig,
    MachineModel, OutputLevel, ReconnectConfig, ReducerConfig, RuntimeOptions,
    TransformerDescriptor, WorkcellConfig,
};
pub use runtime::{Runtime, RuntimeBuilder};
pub use validation::validate_config;
