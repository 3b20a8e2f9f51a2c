// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the polling scheduler.

use crate::errors::TransformerError;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// Scheduler started polling a device.
///
/// # Log Level
/// `info!`
pub struct PollingStarted<'a> {
    pub device_id: &'a str,
    pub interval: Duration,
}

impl Display for PollingStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Polling device '{}' every {:?}",
            self.device_id, self.interval
        )
    }
}

impl StructuredLog for PollingStarted<'_> {
    fn log(&self) {
        tracing::info!(
            device_id = self.device_id,
            interval_ms = self.interval.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("polling", span_name = name, device_id = self.device_id)
    }
}

/// A tick arrived while the previous poll was still running.
///
/// # Log Level
/// `warn!`
///
/// # Example
/// ```
/// use the_workcell::observability::messages::scheduler::PollTickSkipped;
///
/// let msg = PollTickSkipped { device_id: "cell1", skipped_total: 3 };
/// assert!(msg.to_string().contains("still running"));
/// ```
pub struct PollTickSkipped<'a> {
    pub device_id: &'a str,
    pub skipped_total: u64,
}

impl Display for PollTickSkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Skipped poll of '{}': previous poll still running ({} skipped so far)",
            self.device_id, self.skipped_total
        )
    }
}

impl StructuredLog for PollTickSkipped<'_> {
    fn log(&self) {
        tracing::warn!(
            device_id = self.device_id,
            skipped_total = self.skipped_total,
            "{}", self
        );
    }
}

/// A poll returned an error. Polling continues.
///
/// # Log Level
/// `warn!`
pub struct PollFailed<'a> {
    pub device_id: &'a str,
    pub error: &'a TransformerError,
}

impl Display for PollFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Poll of '{}' failed: {}", self.device_id, self.error)
    }
}

impl StructuredLog for PollFailed<'_> {
    fn log(&self) {
        tracing::warn!(device_id = self.device_id, kind = ?self.error.kind(), "{}", self);
    }
}

/// Scheduler stopped; final counters.
///
/// # Log Level
/// `info!`
pub struct PollingStopped<'a> {
    pub device_id: &'a str,
    pub ticks: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl Display for PollingStopped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Stopped polling '{}': ticks={}, completed={}, skipped={}, failed={}",
            self.device_id, self.ticks, self.completed, self.skipped, self.failed
        )
    }
}

impl StructuredLog for PollingStopped<'_> {
    fn log(&self) {
        tracing::info!(
            device_id = self.device_id,
            ticks = self.ticks,
            completed = self.completed,
            skipped = self.skipped,
            failed = self.failed,
            "{}", self
        );
    }
}
