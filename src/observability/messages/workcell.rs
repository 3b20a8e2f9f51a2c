// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for workcell reconciliation and recovery.
//!
//! This module contains message types for logging events related to:
//! * Status events (aggregate status changes)
//! * Members that could not be read during a pass
//! * Recovery tasks started, completed and exhausted
//! * Escalation being cleared by an operator
//! * Indicator outputs and alarm clears that follow a status change
//! * Status events dropped because a consumer fell behind

use crate::errors::TransformerError;
use crate::model::Health;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// The workcell's computed status changed.
///
/// # Log Level
/// `info!`
///
/// # Example
/// ```
/// use the_workcell::model::Health;
/// use the_workcell::observability::messages::workcell::StatusChanged;
///
/// let contributing = vec!["robot1".to_string()];
/// let msg = StatusChanged {
///     workcell_id: "cell1",
///     status: Health::Degraded,
///     contributing: &contributing,
/// };
///
/// assert_eq!(msg.to_string(), "Workcell 'cell1' is now DEGRADED (robot1)");
/// ```
pub struct StatusChanged<'a> {
    pub workcell_id: &'a str,
    pub status: Health,
    pub contributing: &'a [String],
}

impl Display for StatusChanged<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' is now {} ({})",
            self.workcell_id,
            self.status,
            self.contributing.join(", ")
        )
    }
}

impl StructuredLog for StatusChanged<'_> {
    fn log(&self) {
        tracing::info!(
            workcell_id = self.workcell_id,
            status = %self.status,
            contributing = ?self.contributing,
            "{}", self
        );
    }
}

/// A member's snapshot could not be read; counted as unknown.
///
/// # Log Level
/// `debug!`
pub struct MemberUnreadable<'a> {
    pub workcell_id: &'a str,
    pub device_id: &'a str,
    pub reason: &'a str,
}

impl Display for MemberUnreadable<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' could not read member '{}': {}",
            self.workcell_id, self.device_id, self.reason
        )
    }
}

impl StructuredLog for MemberUnreadable<'_> {
    fn log(&self) {
        tracing::debug!(
            workcell_id = self.workcell_id,
            device_id = self.device_id,
            "{}", self
        );
    }
}

/// Recovery task spawned for a degraded member.
///
/// # Log Level
/// `info!`
pub struct RecoveryStarted<'a> {
    pub workcell_id: &'a str,
    pub device_id: &'a str,
    pub consecutive_failures: u32,
}

impl Display for RecoveryStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' recovering '{}' after {} consecutive failures",
            self.workcell_id, self.device_id, self.consecutive_failures
        )
    }
}

impl StructuredLog for RecoveryStarted<'_> {
    fn log(&self) {
        tracing::info!(
            workcell_id = self.workcell_id,
            device_id = self.device_id,
            consecutive_failures = self.consecutive_failures,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "recovery",
            span_name = name,
            workcell_id = self.workcell_id,
            device_id = self.device_id,
        )
    }
}

/// Member reconnected.
///
/// # Log Level
/// `info!`
pub struct RecoveryCompleted<'a> {
    pub workcell_id: &'a str,
    pub device_id: &'a str,
    pub attempts: u32,
}

impl Display for RecoveryCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' recovered '{}' on attempt {}",
            self.workcell_id, self.device_id, self.attempts
        )
    }
}

impl StructuredLog for RecoveryCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            workcell_id = self.workcell_id,
            device_id = self.device_id,
            attempts = self.attempts,
            "{}", self
        );
    }
}

/// Recovery failed for good; the workcell is escalated.
///
/// # Log Level
/// `error!` - Requires operator intervention
pub struct RecoveryFailed<'a> {
    pub workcell_id: &'a str,
    pub device_id: &'a str,
    pub error: &'a TransformerError,
}

impl Display for RecoveryFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' could not recover '{}': {}",
            self.workcell_id, self.device_id, self.error
        )
    }
}

impl StructuredLog for RecoveryFailed<'_> {
    fn log(&self) {
        tracing::error!(
            workcell_id = self.workcell_id,
            device_id = self.device_id,
            kind = ?self.error.kind(),
            "{}", self
        );
    }
}

/// An operator cleared the workcell's latched escalation.
///
/// # Log Level
/// `info!`
pub struct EscalationCleared<'a> {
    pub workcell_id: &'a str,
    pub devices_reset: usize,
}

impl Display for EscalationCleared<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' alarms cleared; {} device(s) reset",
            self.workcell_id, self.devices_reset
        )
    }
}

impl StructuredLog for EscalationCleared<'_> {
    fn log(&self) {
        tracing::info!(
            workcell_id = self.workcell_id,
            devices_reset = self.devices_reset,
            "{}", self
        );
    }
}

/// The indicator outputs were set for a new workcell status.
///
/// # Log Level
/// `debug!`
pub struct IndicatorUpdated<'a> {
    pub workcell_id: &'a str,
    pub device_id: &'a str,
    pub status: Health,
    pub outputs: usize,
}

impl Display for IndicatorUpdated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' set {} indicator output(s) on '{}' for {}",
            self.workcell_id, self.outputs, self.device_id, self.status
        )
    }
}

impl StructuredLog for IndicatorUpdated<'_> {
    fn log(&self) {
        tracing::debug!(
            workcell_id = self.workcell_id,
            device_id = self.device_id,
            status = %self.status,
            outputs = self.outputs,
            "{}", self
        );
    }
}

/// Member alarms were cleared because the workcell returned to OK.
///
/// # Log Level
/// `info!`
pub struct AlarmsAutoCleared<'a> {
    pub workcell_id: &'a str,
    pub devices: &'a [String],
}

impl Display for AlarmsAutoCleared<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' is OK again; cleared alarms on [{}]",
            self.workcell_id,
            self.devices.join(", ")
        )
    }
}

impl StructuredLog for AlarmsAutoCleared<'_> {
    fn log(&self) {
        tracing::info!(
            workcell_id = self.workcell_id,
            devices = ?self.devices,
            "{}", self
        );
    }
}

/// A command sent on a status change did not go through.
///
/// # Log Level
/// `warn!`
pub struct FollowUpFailed<'a> {
    pub workcell_id: &'a str,
    pub device_id: &'a str,
    pub command: &'a str,
    pub error: &'a TransformerError,
}

impl Display for FollowUpFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workcell '{}' could not send {} to '{}': {}",
            self.workcell_id, self.command, self.device_id, self.error
        )
    }
}

impl StructuredLog for FollowUpFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            workcell_id = self.workcell_id,
            device_id = self.device_id,
            command = self.command,
            kind = ?self.error.kind(),
            "{}", self
        );
    }
}

/// A status event was dropped because its consumer's buffer was full.
///
/// # Log Level
/// `warn!`
pub struct EventDropped<'a> {
    pub workcell_id: &'a str,
    pub status: Health,
    pub capacity: usize,
}

impl Display for EventDropped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Dropped {} event for workcell '{}': consumer is {} events behind",
            self.status, self.workcell_id, self.capacity
        )
    }
}

impl StructuredLog for EventDropped<'_> {
    fn log(&self) {
        tracing::warn!(
            workcell_id = self.workcell_id,
            status = %self.status,
            capacity = self.capacity,
            "{}", self
        );
    }
}
