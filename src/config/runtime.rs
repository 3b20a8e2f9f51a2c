// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::adapters::{AdapterCatalog, AdapterConstructor};
use crate::config::{Config, MachineCatalog};
use crate::dispatch::{Bridge, CommandDispatcher};
use crate::engine::{
    ChannelSink, DeviceRegistry, FanoutSink, PollCounts, PollingScheduler, SchedulerHandle,
};
use crate::errors::RegistryError;
use crate::model::StatusEvent;
use crate::traits::{StatusEventSink, StatusReducer};
use crate::transformers::{TransformerCatalog, TransformerConstructor};

/// Workcell runtime builder - wires registry, scheduler and dispatcher from configuration.
///
/// # Examples
///
/// ```
/// use the_workcell::config::{AdapterConfig, Config, DeviceConfig, MachineModel, RuntimeBuilder, TransformerDescriptor};
///
/// # tokio_test_block(async {
/// let config = Config {
///     runtime: Default::default(),
///     machine_models: vec![MachineModel {
///         id: "ur10e".into(),
///         oem: "Universal Robots".into(),
///         equipment_model: "UR10e".into(),
///         controller: "CB5".into(),
///         transformer: "robot".into(),
///     }],
///     transformers: vec![TransformerDescriptor {
///         id: "robot".into(),
///         metadata: Default::default(),
///         module: "transformers::robot".into(),
///         entry_point: "RobotTransformer".into(),
///     }],
///     devices: vec![DeviceConfig::new("robot1", "ur10e")
///         .primary()
///         .with_adapter(AdapterConfig::memory().with_register("robot.mode", "1"))],
/// };
///
/// let runtime = RuntimeBuilder::from_config(config).start().await.unwrap();
/// assert_eq!(runtime.registry().list().await.len(), 1);
/// runtime.shutdown().await;
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct RuntimeBuilder {
    config: Config,
    adapters: AdapterCatalog,
    transformers: TransformerCatalog,
    reducers: HashMap<String, Arc<dyn StatusReducer>>,
    sinks: Vec<Arc<dyn StatusEventSink>>,
}

impl RuntimeBuilder {
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            adapters: AdapterCatalog::with_builtin(),
            transformers: TransformerCatalog::with_builtin(),
            reducers: HashMap::new(),
            sinks: Vec::new(),
        }
    }

    /// Add or replace an adapter protocol.
    pub fn with_adapter_protocol(mut self, protocol: &str, constructor: AdapterConstructor) -> Self {
        self.adapters.register(protocol, constructor);
        self
    }

    /// Add or replace a transformer entry point.
    pub fn with_transformer(mut self, entry_point: &str, constructor: TransformerConstructor) -> Self {
        self.transformers.register(entry_point, constructor);
        self
    }

    /// Use a custom reducer for one workcell instead of the configured one.
    pub fn with_reducer(mut self, workcell_id: &str, reducer: Arc<dyn StatusReducer>) -> Self {
        self.reducers.insert(workcell_id.to_string(), reducer);
        self
    }

    /// Also deliver status events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn StatusEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Register every device, workcells last, and start polling the primary.
    ///
    /// On a registration failure everything registered so far is torn down
    /// again before the error is returned.
    pub async fn start(self) -> Result<Runtime, RegistryError> {
        let (channel, events) = ChannelSink::new();
        let mut sinks = self.sinks;
        sinks.insert(0, Arc::new(channel));

        let mut builder = DeviceRegistry::builder(MachineCatalog::from_config(&self.config))
            .options(self.config.runtime.clone())
            .adapters(self.adapters)
            .transformers(self.transformers)
            .sink(Arc::new(FanoutSink::new(sinks)));
        for (workcell_id, reducer) in self.reducers {
            builder = builder.reducer(&workcell_id, reducer);
        }
        let registry = builder.build();

        // Members before the workcells that watch them
        let mut devices = self.config.devices.clone();
        devices.sort_by_key(|d| d.workcell.is_some());
        for device in &devices {
            if let Err(error) = registry.register(device).await {
                registry.unregister_all().await;
                return Err(error);
            }
        }

        // The primary first; a primary workcell also gets its members polled
        // so the snapshots it reconciles stay fresh
        let mut schedulers = Vec::new();
        match registry.primary().await {
            Some(primary) => {
                let primary_config = devices.iter().find(|d| d.id == primary.device_id());
                let workcell = primary_config.and_then(|d| d.workcell.as_ref());
                let period = workcell
                    .and_then(|w| w.poll_interval_ms)
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.runtime.poll_interval());

                schedulers.push(
                    PollingScheduler::new(registry.clone(), primary.device_id(), period).start(),
                );
                for member in workcell.map(|w| w.members.as_slice()).unwrap_or_default() {
                    schedulers.push(PollingScheduler::new(registry.clone(), member, period).start());
                }
            }
            None => tracing::info!("no primary device configured; polling disabled"),
        }

        Ok(Runtime {
            dispatcher: CommandDispatcher::new(registry.clone()),
            registry,
            schedulers,
            events: Some(events),
        })
    }
}

/// A started runtime.
pub struct Runtime {
    registry: Arc<DeviceRegistry>,
    dispatcher: CommandDispatcher,
    /// Primary first, then its workcell members
    schedulers: Vec<SchedulerHandle>,
    events: Option<mpsc::Receiver<StatusEvent>>,
}

impl Runtime {
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn bridge(&self) -> Bridge {
        Bridge::new(self.dispatcher.clone())
    }

    /// The status-event stream. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<StatusEvent>> {
        self.events.take()
    }

    /// Poll counters of the primary device.
    pub fn poll_counts(&self) -> Option<PollCounts> {
        self.schedulers.first().map(|s| s.counts())
    }

    /// Ids of every device being polled, primary first.
    pub fn polled_devices(&self) -> Vec<String> {
        self.schedulers.iter().map(|s| s.device_id().to_string()).collect()
    }

    /// Stop polling and unregister every device, newest first.
    ///
    /// Returns the teardowns that overran their deadline.
    pub async fn shutdown(self) -> Vec<RegistryError> {
        for scheduler in self.schedulers {
            scheduler.stop().await;
        }
        self.registry.unregister_all().await
    }
}
