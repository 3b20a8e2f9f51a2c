// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use crate::config::ReducerConfig;
use crate::model::{Aggregate, Health, MemberStatus};
use crate::traits::StatusReducer;

/// The most severe member health decides; an empty workcell is `Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorstStatusWins;

impl StatusReducer for WorstStatusWins {
    fn reduce(&self, members: &[MemberStatus]) -> Aggregate {
        let worst = members
            .iter()
            .map(|m| m.health)
            .max()
            .unwrap_or(Health::Unknown);
        Aggregate::at(worst, members)
    }

    fn name(&self) -> &str {
        "worst_wins"
    }
}

/// Walks members in priority order; the first one that is not `Ok` decides.
///
/// Members missing from the order are consulted after it, by id. If every
/// member is `Ok`, so is the workcell.
#[derive(Debug, Clone)]
pub struct PriorityReducer {
    order: Vec<String>,
}

impl PriorityReducer {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    fn rank(&self, device_id: &str) -> usize {
        self.order
            .iter()
            .position(|id| id == device_id)
            .unwrap_or(self.order.len())
    }
}

impl StatusReducer for PriorityReducer {
    fn reduce(&self, members: &[MemberStatus]) -> Aggregate {
        if members.is_empty() {
            return Aggregate::at(Health::Unknown, members);
        }

        let mut ranked: Vec<&MemberStatus> = members.iter().collect();
        ranked.sort_by(|a, b| {
            self.rank(&a.device_id)
                .cmp(&self.rank(&b.device_id))
                .then_with(|| a.device_id.cmp(&b.device_id))
        });

        match ranked.iter().find(|m| m.health != Health::Ok) {
            Some(decider) => Aggregate {
                status: decider.health,
                contributing_device_ids: vec![decider.device_id.clone()],
            },
            None => Aggregate::at(Health::Ok, members),
        }
    }

    fn name(&self) -> &str {
        "priority"
    }
}

/// Adapts a closure into a reducer.
pub struct FnReducer<F> {
    name: String,
    reduce: F,
}

impl<F> FnReducer<F>
where
    F: Fn(&[MemberStatus]) -> Aggregate + Send + Sync,
{
    pub fn new(name: &str, reduce: F) -> Self {
        Self {
            name: name.to_string(),
            reduce,
        }
    }
}

impl<F> StatusReducer for FnReducer<F>
where
    F: Fn(&[MemberStatus]) -> Aggregate + Send + Sync,
{
    fn reduce(&self, members: &[MemberStatus]) -> Aggregate {
        (self.reduce)(members)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build the reducer a workcell config asks for.
pub fn reducer_from_config(config: &ReducerConfig) -> Arc<dyn StatusReducer> {
    match config {
        ReducerConfig::WorstWins => Arc::new(WorstStatusWins),
        ReducerConfig::Priority(order) => Arc::new(PriorityReducer::new(order.clone())),
    }
}
