// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Health;

/// Health of one workcell member as read for a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberStatus {
    pub device_id: String,
    pub health: Health,
}

impl MemberStatus {
    pub fn new(device_id: impl Into<String>, health: Health) -> Self {
        Self {
            device_id: device_id.into(),
            health,
        }
    }
}

/// Result of combining member statuses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub status: Health,
    pub contributing_device_ids: Vec<String>,
}

impl Aggregate {
    /// Aggregate whose contributors are every member at exactly `status`.
    pub fn at(status: Health, members: &[MemberStatus]) -> Self {
        let mut contributing_device_ids: Vec<String> = members
            .iter()
            .filter(|m| m.health == status)
            .map(|m| m.device_id.clone())
            .collect();
        contributing_device_ids.sort();
        Self {
            status,
            contributing_device_ids,
        }
    }
}

/// Emitted once whenever a workcell's computed status changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub workcell_id: String,
    pub computed_status: Health,
    pub contributing_device_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(workcell_id: &str, aggregate: &Aggregate) -> Self {
        Self {
            workcell_id: workcell_id.to_string(),
            computed_status: aggregate.status,
            contributing_device_ids: aggregate.contributing_device_ids.clone(),
            timestamp: Utc::now(),
        }
    }
}
