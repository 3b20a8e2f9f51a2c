// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Fixed-interval polling of one device.
//!
//! Each tick tries to claim the device's poll slot. If the previous poll is
//! still running the tick is skipped and counted; polls never overlap and
//! never queue up behind each other.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::DeviceRegistry;
use crate::errors::TransformerError;
use crate::observability::messages::scheduler::{
    PollFailed, PollTickSkipped, PollingStarted, PollingStopped,
};
use crate::observability::messages::StructuredLog;

#[derive(Default)]
struct PollStats {
    ticks: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl PollStats {
    fn counts(&self) -> PollCounts {
        PollCounts {
            ticks: self.ticks.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollCounts {
    pub ticks: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct PollingScheduler {
    registry: Arc<DeviceRegistry>,
    device_id: String,
    period: Duration,
}

impl PollingScheduler {
    pub fn new(registry: Arc<DeviceRegistry>, device_id: &str, period: Duration) -> Self {
        Self {
            registry,
            device_id: device_id.to_string(),
            period,
        }
    }

    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let stats = Arc::new(PollStats::default());
        let device_id = self.device_id.clone();
        let task = tokio::spawn(self.run(cancel.clone(), stats.clone()));
        SchedulerHandle {
            device_id,
            cancel,
            stats,
            task,
        }
    }

    async fn run(self, cancel: CancellationToken, stats: Arc<PollStats>) {
        let mut ticker = interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut polls = JoinSet::new();

        PollingStarted {
            device_id: &self.device_id,
            interval: self.period,
        }
        .log();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(_) = polls.join_next(), if !polls.is_empty() => {}
                _ = ticker.tick() => self.tick(&mut polls, &stats).await,
            }
        }

        // Drops any poll still in flight
        polls.abort_all();
        let counts = stats.counts();
        PollingStopped {
            device_id: &self.device_id,
            ticks: counts.ticks,
            completed: counts.completed,
            skipped: counts.skipped,
            failed: counts.failed,
        }
        .log();
    }

    async fn tick(&self, polls: &mut JoinSet<()>, stats: &Arc<PollStats>) {
        stats.ticks.fetch_add(1, Ordering::Relaxed);

        let instance = match self.registry.lookup(&self.device_id).await {
            Ok(instance) => instance,
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                PollFailed {
                    device_id: &self.device_id,
                    error: &TransformerError::NotFound {
                        device_id: self.device_id.clone(),
                    },
                }
                .log();
                return;
            }
        };

        let Some(guard) = instance.try_begin_poll() else {
            let skipped_total = stats.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            PollTickSkipped {
                device_id: &self.device_id,
                skipped_total,
            }
            .log();
            return;
        };

        let stats = stats.clone();
        polls.spawn(async move {
            let _guard = guard;
            match instance.poll().await {
                Ok(_) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    PollFailed {
                        device_id: instance.device_id(),
                        error: &error,
                    }
                    .log();
                }
            }
        });
    }
}

/// Controls a running scheduler.
pub struct SchedulerHandle {
    device_id: String,
    cancel: CancellationToken,
    stats: Arc<PollStats>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn counts(&self) -> PollCounts {
        self.stats.counts()
    }

    /// Stop ticking and drop any poll in flight.
    pub async fn stop(self) -> PollCounts {
        self.cancel.cancel();
        let _ = self.task.await;
        self.stats.counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::RecordingAdapter;
    use crate::adapters::AdapterCatalog;
    use crate::config::{AdapterConfig, DeviceConfig, MachineCatalog};
    use crate::traits::ProtocolAdapter;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_slow_polls_skip_ticks_without_overlap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut adapters = AdapterCatalog::with_builtin();
        let shared = log.clone();
        adapters.register(
            "recording",
            Arc::new(move |_: &AdapterConfig, _| {
                Ok(Box::new(RecordingAdapter::new(shared.clone(), Duration::from_millis(250)))
                    as Box<dyn ProtocolAdapter>)
            }),
        );
        let registry = DeviceRegistry::builder(
            MachineCatalog::new().with_model("ur10e", "RobotTransformer"),
        )
        .adapters(adapters)
        .build();

        let mut recording = AdapterConfig::memory();
        recording.protocol = "recording".into();
        registry
            .register(&DeviceConfig::new("robot1", "ur10e").primary().with_adapter(recording))
            .await
            .unwrap();

        let handle = PollingScheduler::new(registry.clone(), "robot1", Duration::from_millis(100)).start();
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        let counts = handle.stop().await;

        assert!(counts.completed >= 1, "{:?}", counts);
        assert!(counts.skipped > 0, "{:?}", counts);
        assert_eq!(counts.failed, 0, "{:?}", counts);
        assert!(counts.completed + counts.skipped <= counts.ticks, "{:?}", counts);

        let entries = log.lock().unwrap().clone();
        let complete = entries.len() - entries.len() % 2;
        for pair in entries[..complete].chunks(2) {
            assert!(pair[0].starts_with("begin "), "overlap: {:?}", entries);
            assert_eq!(pair[0]["begin ".len()..], pair[1]["end ".len()..], "overlap: {:?}", entries);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_device_counts_failures() {
        let registry = DeviceRegistry::builder(MachineCatalog::new()).build();
        let handle = PollingScheduler::new(registry, "ghost", Duration::from_millis(100)).start();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let counts = handle.stop().await;
        assert!(counts.failed >= 3, "{:?}", counts);
        assert_eq!(counts.completed, 0);
    }
}
