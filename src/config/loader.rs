// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::{
    DEFAULT_ADAPTER_NAME, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_MAX_RECOVERY_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECONNECT_BASE_DELAY_MS,
    DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_RECONNECT_MAX_DELAY_MS, DEFAULT_TEARDOWN_TIMEOUT_MS,
};
use crate::errors::ConfigLoadError;
use crate::model::Health;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the transformer runtime.
///
/// Holds the static machine-model catalog, the transformer descriptors it
/// points at, and the devices to register at startup.
///
/// # Example
/// ```yaml
/// runtime:
///   poll_interval_ms: 500
/// machine_models:
///   - id: ur10e
///     oem: Universal Robots
///     equipment_model: UR10e
///     controller: CB5
///     transformer: robot
/// transformers:
///   - id: robot
///     module: transformers::robot
///     entry_point: RobotTransformer
/// devices:
///   - id: robot1
///     machine_model: ur10e
///     adapters:
///       - protocol: memory
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeOptions,
    #[serde(default)]
    pub machine_models: Vec<MachineModel>,
    #[serde(default)]
    pub transformers: Vec<TransformerDescriptor>,
    pub devices: Vec<DeviceConfig>,
}

/// Timeouts and retry policy shared by every device.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeOptions {
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            teardown_timeout_ms: DEFAULT_TEARDOWN_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RuntimeOptions {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bounded exponential backoff for reconnection.
///
/// # Example
/// ```yaml
/// reconnect:
///   base_delay_ms: 100   # first wait
///   max_delay_ms: 5000   # ceiling per wait
///   max_attempts: 5      # then give up
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

/// A machine-model record: which transformer drives this kind of equipment.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MachineModel {
    pub id: String,
    #[serde(default)]
    pub oem: String,
    #[serde(default)]
    pub equipment_model: String,
    #[serde(default)]
    pub controller: String,
    /// Id of a `TransformerDescriptor`
    pub transformer: String,
}

/// Where a transformer implementation lives.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TransformerDescriptor {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub module: String,
    /// Name of the implementation in the transformer catalog
    pub entry_point: String,
}

/// One device to register.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub machine_model: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
    #[serde(default)]
    pub options: HashMap<String, Value>, // transformer-specific options
    #[serde(default)]
    pub workcell: Option<WorkcellConfig>,
}

impl DeviceConfig {
    pub fn new(id: &str, machine_model: &str) -> Self {
        Self {
            id: id.to_string(),
            machine_model: machine_model.to_string(),
            primary: false,
            adapters: Vec::new(),
            options: HashMap::new(),
            workcell: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn with_adapter(mut self, adapter: AdapterConfig) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn with_workcell(mut self, workcell: WorkcellConfig) -> Self {
        self.workcell = Some(workcell);
        self
    }
}

/// One transport connection owned by a device.
///
/// # Example
/// ```yaml
/// adapters:
///   - name: main
///     protocol: tcp
///     address: 10.0.0.12
///     port: 29999
///     timeout_ms: 1500
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_adapter_name")]
    pub name: String,
    pub protocol: String,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
    /// Seed registers for the in-memory protocol
    #[serde(default)]
    pub initial: HashMap<String, String>,
}

impl AdapterConfig {
    pub fn memory() -> Self {
        Self {
            name: default_adapter_name(),
            protocol: "memory".to_string(),
            address: None,
            port: None,
            timeout_ms: None,
            initial: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_register(mut self, key: &str, value: &str) -> Self {
        self.initial.insert(key.to_string(), value.to_string());
        self
    }
}

/// Turns a device into a workcell that reconciles its members.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkcellConfig {
    pub members: Vec<String>,
    /// `worst_wins`, or a one-key map such as `{priority: [plc1, robot1]}`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub reducer: ReducerConfig,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    /// Overrides `runtime.poll_interval_ms` when this workcell is primary
    pub poll_interval_ms: Option<u64>,
    pub indicator: Option<IndicatorConfig>,
    /// Send `CLEAR_ALARMS` to every member when the workcell returns to OK
    #[serde(default)]
    pub auto_clear_alarms: bool,
}

impl WorkcellConfig {
    pub fn new(members: &[&str]) -> Self {
        Self {
            members: members.iter().map(|m| m.to_string()).collect(),
            reducer: ReducerConfig::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            poll_interval_ms: None,
            indicator: None,
            auto_clear_alarms: false,
        }
    }
}

/// Digital outputs on a member device that follow the workcell's status,
/// such as a stack light.
///
/// # Example
/// ```yaml
/// indicator:
///   device: plc1
///   outputs:
///     OK:       [{index: 9, value: true},  {index: 11, value: false}, {index: 13, value: false}]
///     DEGRADED: [{index: 9, value: false}, {index: 11, value: true},  {index: 13, value: false}]
///     FAULT:    [{index: 9, value: false}, {index: 11, value: false}, {index: 13, value: true}]
/// ```
///
/// A status with no entry leaves the outputs as they are.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IndicatorConfig {
    pub device: String,
    #[serde(default)]
    pub outputs: BTreeMap<Health, Vec<OutputLevel>>,
}

impl IndicatorConfig {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_outputs(mut self, status: Health, levels: &[(u16, bool)]) -> Self {
        let levels = levels
            .iter()
            .map(|&(index, value)| OutputLevel { index, value })
            .collect();
        self.outputs.insert(status, levels);
        self
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct OutputLevel {
    pub index: u16,
    pub value: bool,
}

/// Built-in combination rules.
///
/// # Example
/// ```yaml
/// reducer: worst_wins
/// # or
/// reducer:
///   priority: [plc1, robot1]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReducerConfig {
    #[default]
    WorstWins,
    Priority(Vec<String>),
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_teardown_timeout_ms() -> u64 {
    DEFAULT_TEARDOWN_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_DELAY_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_RECONNECT_MAX_ATTEMPTS
}

fn default_adapter_name() -> String {
    DEFAULT_ADAPTER_NAME.to_string()
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_max_recovery_attempts() -> u32 {
    DEFAULT_MAX_RECOVERY_ATTEMPTS
}

/// Load a config from a YAML file, or TOML when the extension is `.toml`
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigLoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let cfg: Config = if is_toml {
        toml::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    Ok(cfg)
}

/// Load and validate a config file
///
/// Every validation problem is reported, not just the first.
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigLoadError> {
    let cfg = load_config(path)?;
    crate::config::validate_config(&cfg).map_err(ConfigLoadError::Invalid)?;
    Ok(cfg)
}
