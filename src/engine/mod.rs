// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backoff;
pub mod instance;
pub mod io;
pub mod reducers;
pub mod registry;
pub mod scheduler;
pub mod sinks;
pub mod workcell;

pub use backoff::ReconnectPolicy;
pub use instance::{InstanceOptions, PollGuard, TransformerInstance};
pub use io::{DeviceIo, LinkHealth, Retry};
pub use reducers::{reducer_from_config, FnReducer, PriorityReducer, WorstStatusWins};
pub use registry::{DeviceRegistry, RegistryBuilder, RegistryHandle};
pub use scheduler::{PollCounts, PollingScheduler, SchedulerHandle};
pub use sinks::{ChannelSink, FanoutSink};
pub use workcell::{ReconcileReport, WorkcellEngine, WorkcellPhase, WorkcellSettings};
