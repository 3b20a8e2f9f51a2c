// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Device registry.
//!
//! Owns every transformer instance and is the only place instances are
//! created or destroyed. Lookups hold the read lock only long enough to
//! clone an `Arc`, so slow device I/O never blocks registration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, RwLock};

use super::instance::{InstanceOptions, TransformerInstance};
use super::sinks::FanoutSink;
use crate::adapters::AdapterCatalog;
use crate::config::consts::STATE_CHANGE_CAPACITY;
use crate::config::{DeviceConfig, MachineCatalog, RuntimeOptions, Unresolved};
use crate::errors::{RegistryError, TransformerError, TransformerResult};
use crate::model::{Device, DeviceInfo, DeviceStateChange, StatusSnapshot};
use crate::observability::messages::registry::{
    DeviceRegistered, DeviceUnregistered, RegistrationRejected, TeardownForced,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{StatusEventSink, StatusReducer};
use crate::transformers::{Command, TransformerCatalog, TransformerContext};

#[derive(Default)]
struct Slots {
    by_id: HashMap<String, Arc<TransformerInstance>>,
    /// Registration order, for teardown in reverse.
    order: Vec<String>,
}

pub struct DeviceRegistry {
    slots: RwLock<Slots>,
    catalog: MachineCatalog,
    transformers: TransformerCatalog,
    adapters: AdapterCatalog,
    reducers: HashMap<String, Arc<dyn StatusReducer>>,
    sink: Arc<dyn StatusEventSink>,
    options: RuntimeOptions,
    changes: broadcast::Sender<DeviceStateChange>,
    self_ref: Weak<DeviceRegistry>,
}

pub struct RegistryBuilder {
    catalog: MachineCatalog,
    transformers: TransformerCatalog,
    adapters: AdapterCatalog,
    reducers: HashMap<String, Arc<dyn StatusReducer>>,
    sink: Arc<dyn StatusEventSink>,
    options: RuntimeOptions,
}

impl RegistryBuilder {
    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn transformers(mut self, transformers: TransformerCatalog) -> Self {
        self.transformers = transformers;
        self
    }

    pub fn adapters(mut self, adapters: AdapterCatalog) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn StatusEventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use `reducer` for the workcell registered as `workcell_id`.
    pub fn reducer(mut self, workcell_id: &str, reducer: Arc<dyn StatusReducer>) -> Self {
        self.reducers.insert(workcell_id.to_string(), reducer);
        self
    }

    pub fn build(self) -> Arc<DeviceRegistry> {
        let (changes, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
        Arc::new_cyclic(|self_ref| DeviceRegistry {
            slots: RwLock::new(Slots::default()),
            catalog: self.catalog,
            transformers: self.transformers,
            adapters: self.adapters,
            reducers: self.reducers,
            sink: self.sink,
            options: self.options,
            changes,
            self_ref: self_ref.clone(),
        })
    }
}

impl DeviceRegistry {
    pub fn builder(catalog: MachineCatalog) -> RegistryBuilder {
        RegistryBuilder {
            catalog,
            transformers: TransformerCatalog::with_builtin(),
            adapters: AdapterCatalog::with_builtin(),
            reducers: HashMap::new(),
            sink: Arc::new(FanoutSink::default()),
            options: RuntimeOptions::default(),
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Weak handle for components owned by the registry's own instances.
    pub fn handle(&self) -> RegistryHandle {
        RegistryHandle {
            registry: self.self_ref.clone(),
        }
    }

    /// Create, connect and store an instance for `config`.
    pub async fn register(
        &self,
        config: &DeviceConfig,
    ) -> Result<Arc<TransformerInstance>, RegistryError> {
        let result = self.try_register(config).await;
        if let Err(error) = &result {
            RegistrationRejected {
                device_id: &config.id,
                error,
            }
            .log();
        }
        result
    }

    async fn try_register(
        &self,
        config: &DeviceConfig,
    ) -> Result<Arc<TransformerInstance>, RegistryError> {
        let mut slots = self.slots.write().await;

        if slots.by_id.contains_key(&config.id) {
            return Err(RegistryError::DuplicateDevice(config.id.clone()));
        }
        if config.primary {
            if let Some(existing) = slots.by_id.values().find(|i| i.device().primary) {
                return Err(RegistryError::PrimaryConflict {
                    device_id: config.id.clone(),
                    existing: existing.device_id().to_string(),
                });
            }
        }

        let descriptor = self
            .catalog
            .resolve(&config.machine_model)
            .map_err(|unresolved| match unresolved {
                Unresolved::Model => RegistryError::UnknownMachineModel {
                    device_id: config.id.clone(),
                    machine_model: config.machine_model.clone(),
                },
                Unresolved::Descriptor(reference) => RegistryError::ImplementationUnavailable {
                    device_id: config.id.clone(),
                    reference,
                },
            })?;

        let entry_point = descriptor.entry_point.clone();
        if !self.transformers.is_implementation_available(&entry_point) {
            return Err(RegistryError::ImplementationUnavailable {
                device_id: config.id.clone(),
                reference: entry_point,
            });
        }

        let context = TransformerContext {
            device_id: config.id.clone(),
            options: config.options.clone(),
            workcell: config.workcell.clone(),
            reducer: self.reducers.get(&config.id).cloned(),
            registry: self.handle(),
            sink: self.sink.clone(),
            member_read_timeout: self.options.call_timeout(),
        };
        let transformer = self
            .transformers
            .create_transformer(&entry_point, &context)
            .map_err(|reason| RegistryError::ImplementationUnavailable {
                device_id: config.id.clone(),
                reference: format!("{} ({})", entry_point, reason),
            })?;

        let mut adapters = Vec::with_capacity(config.adapters.len());
        for adapter in &config.adapters {
            let built = self
                .adapters
                .create_adapter(adapter, self.options.call_timeout())
                .map_err(|reason| RegistryError::AdapterUnavailable {
                    device_id: config.id.clone(),
                    adapter: adapter.name.clone(),
                    reason,
                })?;
            adapters.push(built);
        }

        let device = Device {
            device_id: config.id.clone(),
            machine_model: config.machine_model.clone(),
            transformer: entry_point,
            primary: config.primary,
        };
        let instance = TransformerInstance::spawn(
            device,
            transformer,
            adapters,
            InstanceOptions::from_runtime(&self.options),
            self.changes.clone(),
        );

        slots.by_id.insert(config.id.clone(), instance.clone());
        slots.order.push(config.id.clone());

        DeviceRegistered {
            device_id: &config.id,
            machine_model: &config.machine_model,
            transformer: &instance.device().transformer,
            primary: config.primary,
        }
        .log();
        Ok(instance)
    }

    /// Remove a device and wait for its teardown.
    ///
    /// The id is free again as soon as this returns, even when teardown
    /// overran and the error is `TeardownTimedOut`.
    pub async fn unregister(&self, device_id: &str) -> Result<(), RegistryError> {
        let instance = {
            let mut slots = self.slots.write().await;
            let instance = slots
                .by_id
                .remove(device_id)
                .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))?;
            slots.order.retain(|id| id != device_id);
            instance
        };

        let limit = self.options.teardown_timeout();
        if instance.shutdown(limit).await {
            DeviceUnregistered { device_id }.log();
            Ok(())
        } else {
            TeardownForced {
                device_id,
                timeout: limit,
            }
            .log();
            Err(RegistryError::TeardownTimedOut {
                device_id: device_id.to_string(),
                after: limit,
            })
        }
    }

    /// Unregister everything, newest first. Returns the teardowns that overran.
    pub async fn unregister_all(&self) -> Vec<RegistryError> {
        let order = self.slots.read().await.order.clone();
        let mut errors = Vec::new();
        for device_id in order.iter().rev() {
            match self.unregister(device_id).await {
                Ok(()) | Err(RegistryError::NotFound(_)) => {}
                Err(error) => errors.push(error),
            }
        }
        errors
    }

    pub async fn lookup(&self, device_id: &str) -> Result<Arc<TransformerInstance>, RegistryError> {
        self.slots
            .read()
            .await
            .by_id
            .get(device_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))
    }

    pub async fn primary(&self) -> Option<Arc<TransformerInstance>> {
        self.slots
            .read()
            .await
            .by_id
            .values()
            .find(|i| i.device().primary)
            .cloned()
    }

    /// Every registered device with its cached status, ordered by id.
    pub async fn list(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = self
            .slots
            .read()
            .await
            .by_id
            .values()
            .map(|instance| {
                let last_status = instance.snapshot();
                DeviceInfo {
                    device: instance.device().clone(),
                    state: last_status.state,
                    last_status,
                }
            })
            .collect();
        devices.sort_by(|a, b| a.device.device_id.cmp(&b.device.device_id));
        devices
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every lifecycle transition of every device, as it happens.
    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<DeviceStateChange> {
        self.changes.subscribe()
    }

    pub async fn snapshot(&self, device_id: &str) -> TransformerResult<StatusSnapshot> {
        self.instance(device_id).await.map(|i| i.snapshot())
    }

    pub async fn read_status(&self, device_id: &str) -> TransformerResult<StatusSnapshot> {
        self.instance(device_id).await?.read_status().await
    }

    pub async fn recover(&self, device_id: &str, max_attempts: u32) -> TransformerResult<u32> {
        self.instance(device_id).await?.recover(Some(max_attempts)).await
    }

    pub async fn clear_fault(&self, device_id: &str) -> TransformerResult<()> {
        self.instance(device_id).await?.clear_fault().await
    }

    pub async fn execute(&self, device_id: &str, command: Command) -> TransformerResult<Value> {
        self.instance(device_id).await?.execute(command).await
    }

    async fn instance(&self, device_id: &str) -> TransformerResult<Arc<TransformerInstance>> {
        self.lookup(device_id)
            .await
            .map_err(|_| TransformerError::NotFound {
                device_id: device_id.to_string(),
            })
    }
}

/// Non-owning view of the registry.
///
/// Held by components that live inside the registry's own instances, such as
/// a workcell engine, so they never keep the registry alive. Every call fails
/// with `NotFound` once the registry is gone.
#[derive(Clone, Default)]
pub struct RegistryHandle {
    registry: Weak<DeviceRegistry>,
}

impl RegistryHandle {
    /// A handle attached to no registry.
    pub fn detached() -> Self {
        Self::default()
    }

    fn gone(device_id: &str) -> TransformerError {
        TransformerError::NotFound {
            device_id: device_id.to_string(),
        }
    }

    pub async fn snapshot(&self, device_id: &str) -> TransformerResult<StatusSnapshot> {
        match self.registry.upgrade() {
            Some(registry) => registry.snapshot(device_id).await,
            None => Err(Self::gone(device_id)),
        }
    }

    pub async fn read_status(&self, device_id: &str) -> TransformerResult<StatusSnapshot> {
        match self.registry.upgrade() {
            Some(registry) => registry.read_status(device_id).await,
            None => Err(Self::gone(device_id)),
        }
    }

    pub async fn recover(&self, device_id: &str, max_attempts: u32) -> TransformerResult<u32> {
        match self.registry.upgrade() {
            Some(registry) => registry.recover(device_id, max_attempts).await,
            None => Err(Self::gone(device_id)),
        }
    }

    pub async fn clear_fault(&self, device_id: &str) -> TransformerResult<()> {
        match self.registry.upgrade() {
            Some(registry) => registry.clear_fault(device_id).await,
            None => Err(Self::gone(device_id)),
        }
    }

    pub async fn execute(&self, device_id: &str, command: Command) -> TransformerResult<Value> {
        match self.registry.upgrade() {
            Some(registry) => registry.execute(device_id, command).await,
            None => Err(Self::gone(device_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::HangingAdapter;
    use crate::config::AdapterConfig;
    use crate::model::DeviceState;
    use crate::traits::ProtocolAdapter;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn catalog() -> MachineCatalog {
        MachineCatalog::new()
            .with_model("ur10e", "RobotTransformer")
            .with_model("s7-1500", "PlcTransformer")
    }

    fn registry() -> Arc<DeviceRegistry> {
        DeviceRegistry::builder(catalog()).build()
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = registry();
        registry
            .register(&DeviceConfig::new("robot1", "ur10e").with_adapter(AdapterConfig::memory()))
            .await
            .unwrap();
        registry
            .register(&DeviceConfig::new("plc1", "s7-1500").with_adapter(AdapterConfig::memory()))
            .await
            .unwrap();

        let listed: Vec<String> = registry
            .list()
            .await
            .into_iter()
            .map(|d| d.device.device_id)
            .collect();
        assert_eq!(listed, vec!["plc1", "robot1"]);
        assert_eq!(
            registry.lookup("robot1").await.unwrap().device().transformer,
            "RobotTransformer"
        );
    }

    #[tokio::test]
    async fn test_registration_rejections() {
        let registry = registry();
        registry
            .register(&DeviceConfig::new("robot1", "ur10e").primary())
            .await
            .unwrap();

        let cases = vec![
            (
                DeviceConfig::new("robot1", "ur10e"),
                RegistryError::DuplicateDevice("robot1".into()),
            ),
            (
                DeviceConfig::new("robot2", "ur10e").primary(),
                RegistryError::PrimaryConflict {
                    device_id: "robot2".into(),
                    existing: "robot1".into(),
                },
            ),
            (
                DeviceConfig::new("cnc1", "haas-vf2"),
                RegistryError::UnknownMachineModel {
                    device_id: "cnc1".into(),
                    machine_model: "haas-vf2".into(),
                },
            ),
        ];

        for (config, expected) in cases {
            let err = registry.register(&config).await.err().unwrap();
            assert_eq!(err, expected);
        }
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_implementation_and_protocol() {
        let registry = DeviceRegistry::builder(
            catalog().with_model("haas-vf2", "CncTransformer"),
        )
        .build();

        let err = registry
            .register(&DeviceConfig::new("cnc1", "haas-vf2"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::ImplementationUnavailable { .. }));

        let mut modbus = AdapterConfig::memory();
        modbus.protocol = "modbus".into();
        let err = registry
            .register(&DeviceConfig::new("plc1", "s7-1500").with_adapter(modbus))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::AdapterUnavailable { .. }));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_frees_the_id() {
        let registry = registry();
        let config = DeviceConfig::new("robot1", "ur10e").with_adapter(AdapterConfig::memory());
        let instance = registry.register(&config).await.unwrap();

        registry.unregister("robot1").await.unwrap();
        assert_eq!(instance.state(), DeviceState::Destroyed);
        assert!(matches!(
            registry.lookup("robot1").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.unregister("robot1").await,
            Err(RegistryError::NotFound(_))
        ));

        registry.register(&config).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_cancels_hanging_call() {
        let released = Arc::new(AtomicBool::new(false));
        let mut adapters = AdapterCatalog::with_builtin();
        let flag = released.clone();
        adapters.register(
            "hanging",
            Arc::new(move |_: &AdapterConfig, _| {
                Ok(Box::new(HangingAdapter::new(flag.clone())) as Box<dyn ProtocolAdapter>)
            }),
        );
        let registry = DeviceRegistry::builder(catalog()).adapters(adapters).build();

        let mut hanging = AdapterConfig::memory();
        hanging.protocol = "hanging".into();
        let instance = registry
            .register(&DeviceConfig::new("robot1", "ur10e").with_adapter(hanging))
            .await
            .unwrap();

        let pending = tokio::spawn(async move { instance.read_variable("speed").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        registry.unregister("robot1").await.unwrap();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransformerError::Cancelled { .. })));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handle_outlives_registry() {
        let registry = registry();
        let handle = registry.handle();
        drop(registry);

        let err = handle.snapshot("robot1").await.unwrap_err();
        assert!(matches!(err, TransformerError::NotFound { .. }));
    }
}
