// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Workcell reconciliation.
//!
//! A pass reads every member's cached status, reduces them to one workcell
//! status, and emits a `StatusEvent` only when that status differs from the
//! previous pass. Members that stay degraded past the failure threshold get
//! a recovery task; a recovery that runs out of attempts latches the
//! workcell into escalation until alarms are cleared.
//!
//! Passes are serialized on the engine's pass lock. Recovery tasks run
//! outside it and start a fresh pass when they finish.
//!
//! Status changes can also drive an indicator (digital outputs on a member,
//! such as a stack light) and clear member alarms when the cell is OK again.
//! Those commands go out from a follower task that only ever acts on the
//! latest status, so a pass never waits on them.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::Instrument;

use super::registry::RegistryHandle;
use crate::config::IndicatorConfig;
use crate::errors::{ErrorKind, TransformerError};
use crate::model::{Aggregate, DeviceState, Health, MemberStatus, StatusEvent};
use crate::observability::messages::workcell::{
    AlarmsAutoCleared, EscalationCleared, FollowUpFailed, IndicatorUpdated, MemberUnreadable,
    RecoveryCompleted, RecoveryFailed, RecoveryStarted, StatusChanged,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{StatusEventSink, StatusReducer};
use crate::transformers::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkcellPhase {
    Initializing,
    Steady,
    Degraded,
    Recovering,
}

impl fmt::Display for WorkcellPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkcellPhase::Initializing => "initializing",
            WorkcellPhase::Steady => "steady",
            WorkcellPhase::Degraded => "degraded",
            WorkcellPhase::Recovering => "recovering",
        };
        f.write_str(name)
    }
}

pub struct WorkcellSettings {
    pub workcell_id: String,
    pub members: Vec<String>,
    pub reducer: Arc<dyn StatusReducer>,
    pub failure_threshold: u32,
    pub max_recovery_attempts: u32,
    /// Bound on reading one member's snapshot.
    pub member_read_timeout: Duration,
    pub indicator: Option<IndicatorConfig>,
    pub auto_clear_alarms: bool,
}

/// What one pass saw and did.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub aggregate: Aggregate,
    pub members: Vec<MemberStatus>,
    pub phase: WorkcellPhase,
    pub event: Option<StatusEvent>,
    pub recoveries_started: Vec<String>,
}

struct PassState {
    phase: WorkcellPhase,
    last: Option<Aggregate>,
}

#[derive(Default)]
struct RecoveryBook {
    in_flight: HashMap<String, JoinHandle<()>>,
    /// Members whose recovery ran out of attempts.
    escalated: BTreeSet<String>,
}

pub struct WorkcellEngine {
    workcell_id: String,
    members: Vec<String>,
    reducer: Arc<dyn StatusReducer>,
    registry: RegistryHandle,
    sink: Arc<dyn StatusEventSink>,
    failure_threshold: AtomicU32,
    max_recovery_attempts: AtomicU32,
    member_read_timeout: Duration,
    indicator: Option<IndicatorConfig>,
    auto_clear_alarms: AtomicBool,
    pass: Mutex<PassState>,
    recoveries: StdMutex<RecoveryBook>,
    /// Latest status for the follower task.
    edges: watch::Sender<Option<Health>>,
    follower: StdMutex<Option<JoinHandle<()>>>,
    self_ref: Weak<WorkcellEngine>,
}

impl WorkcellEngine {
    pub fn new(
        settings: WorkcellSettings,
        registry: RegistryHandle,
        sink: Arc<dyn StatusEventSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            workcell_id: settings.workcell_id,
            members: settings.members,
            reducer: settings.reducer,
            registry,
            sink,
            failure_threshold: AtomicU32::new(settings.failure_threshold.max(1)),
            max_recovery_attempts: AtomicU32::new(settings.max_recovery_attempts.max(1)),
            member_read_timeout: settings.member_read_timeout,
            indicator: settings.indicator,
            auto_clear_alarms: AtomicBool::new(settings.auto_clear_alarms),
            pass: Mutex::new(PassState {
                phase: WorkcellPhase::Initializing,
                last: None,
            }),
            recoveries: StdMutex::new(RecoveryBook::default()),
            edges: watch::channel(None).0,
            follower: StdMutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    pub fn workcell_id(&self) -> &str {
        &self.workcell_id
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn reducer_name(&self) -> &str {
        self.reducer.name()
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.load(Ordering::Relaxed)
    }

    pub fn set_failure_threshold(&self, threshold: u32) {
        self.failure_threshold.store(threshold.max(1), Ordering::Relaxed);
    }

    pub fn max_recovery_attempts(&self) -> u32 {
        self.max_recovery_attempts.load(Ordering::Relaxed)
    }

    pub fn set_max_recovery_attempts(&self, attempts: u32) {
        self.max_recovery_attempts.store(attempts.max(1), Ordering::Relaxed);
    }

    pub fn auto_clear_alarms(&self) -> bool {
        self.auto_clear_alarms.load(Ordering::Relaxed)
    }

    pub fn set_auto_clear_alarms(&self, enabled: bool) {
        self.auto_clear_alarms.store(enabled, Ordering::Relaxed);
    }

    pub fn indicator_device(&self) -> Option<&str> {
        self.indicator.as_ref().map(|i| i.device.as_str())
    }

    pub async fn phase(&self) -> WorkcellPhase {
        self.pass.lock().await.phase
    }

    /// Aggregate from the most recent pass, if any has run.
    pub async fn last_aggregate(&self) -> Option<Aggregate> {
        self.pass.lock().await.last.clone()
    }

    pub fn escalated(&self) -> Vec<String> {
        self.book().escalated.iter().cloned().collect()
    }

    pub fn recoveries_in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.book().in_flight.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run one reconciliation pass.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut pass = self.pass.lock().await;
        let threshold = self.failure_threshold();

        let mut members = Vec::with_capacity(self.members.len());
        let mut needs_recovery = Vec::new();
        for device_id in &self.members {
            let read = timeout(self.member_read_timeout, self.registry.snapshot(device_id)).await;
            let health = match read {
                Ok(Ok(snapshot)) => {
                    if snapshot.state == DeviceState::Degraded
                        && !snapshot.recovery_exhausted
                        && snapshot.consecutive_failures >= threshold
                    {
                        needs_recovery.push((device_id.clone(), snapshot.consecutive_failures));
                    }
                    snapshot.health()
                }
                Ok(Err(error)) => {
                    MemberUnreadable {
                        workcell_id: &self.workcell_id,
                        device_id,
                        reason: &error.to_string(),
                    }
                    .log();
                    Health::Unknown
                }
                Err(_) => {
                    MemberUnreadable {
                        workcell_id: &self.workcell_id,
                        device_id,
                        reason: "snapshot read timed out",
                    }
                    .log();
                    Health::Unknown
                }
            };
            members.push(MemberStatus::new(device_id, health));
        }

        let aggregate = self.reducer.reduce(&members);

        let changed = pass.last.as_ref().map(|last| last.status) != Some(aggregate.status);
        let event = if changed {
            let event = StatusEvent::new(&self.workcell_id, &aggregate);
            StatusChanged {
                workcell_id: &self.workcell_id,
                status: aggregate.status,
                contributing: &aggregate.contributing_device_ids,
            }
            .log();
            self.sink.emit(&event);
            self.follow(aggregate.status);
            Some(event)
        } else {
            None
        };
        pass.last = Some(aggregate.clone());

        let recoveries_started: Vec<String> = needs_recovery
            .into_iter()
            .filter(|(device_id, failures)| self.start_recovery(device_id, *failures))
            .map(|(device_id, _)| device_id)
            .collect();

        pass.phase = self.next_phase(pass.phase, aggregate.status);

        ReconcileReport {
            aggregate,
            members,
            phase: pass.phase,
            event,
            recoveries_started,
        }
    }

    /// Start recovery for every degraded member regardless of the threshold.
    pub async fn recover_degraded(&self) -> Vec<String> {
        let mut started = Vec::new();
        for device_id in &self.members {
            let Ok(snapshot) = self.registry.snapshot(device_id).await else {
                continue;
            };
            if snapshot.state == DeviceState::Degraded
                && !snapshot.recovery_exhausted
                && self.start_recovery(device_id, snapshot.consecutive_failures)
            {
                started.push(device_id.clone());
            }
        }
        started
    }

    /// Lift the escalation latch and the members' exhaustion latches, then
    /// reconcile. Returns the members that were reset.
    pub async fn clear_escalation(&self) -> Vec<String> {
        let escalated: Vec<String> = std::mem::take(&mut self.book().escalated)
            .into_iter()
            .collect();

        // Members may also have been exhausted by a direct recover call
        let mut reset = Vec::new();
        for device_id in &self.members {
            let exhausted = match self.registry.snapshot(device_id).await {
                Ok(snapshot) => snapshot.recovery_exhausted,
                Err(_) => false,
            };
            if (exhausted || escalated.contains(device_id))
                && self.registry.clear_fault(device_id).await.is_ok()
            {
                reset.push(device_id.clone());
            }
        }

        EscalationCleared {
            workcell_id: &self.workcell_id,
            devices_reset: reset.len(),
        }
        .log();
        self.reconcile().await;
        reset
    }

    /// Abort in-flight recovery tasks and the follower.
    pub fn shutdown(&self) {
        {
            let mut book = self.book();
            for (_, handle) in book.in_flight.drain() {
                handle.abort();
            }
        }
        if let Some(handle) = lock(&self.follower).take() {
            handle.abort();
        }
    }

    /// Hand a new status to the follower task, starting it on first use.
    fn follow(&self, status: Health) {
        if self.indicator.is_none() && !self.auto_clear_alarms() {
            return;
        }
        self.edges.send_replace(Some(status));

        let mut follower = lock(&self.follower);
        if follower.is_none() {
            let edges = self.edges.subscribe();
            let engine = self.self_ref.clone();
            *follower = Some(tokio::spawn(follow_edges(engine, edges)));
        }
    }

    async fn apply_edge(&self, status: Health) {
        if let Some(indicator) = &self.indicator {
            let levels = indicator.outputs.get(&status).map(Vec::as_slice).unwrap_or_default();
            let mut set = 0;
            for level in levels {
                let command = Command::SetDigitalOutput {
                    index: level.index,
                    value: level.value,
                };
                match self.registry.execute(&indicator.device, command).await {
                    Ok(_) => set += 1,
                    Err(error) => self.follow_up_failed(&indicator.device, "SET_DIGITAL_OUTPUT", &error),
                }
            }
            if !levels.is_empty() {
                IndicatorUpdated {
                    workcell_id: &self.workcell_id,
                    device_id: &indicator.device,
                    status,
                    outputs: set,
                }
                .log();
            }
        }

        if status == Health::Ok && self.auto_clear_alarms() {
            let mut cleared = Vec::new();
            for device_id in &self.members {
                match self.registry.execute(device_id, Command::ClearAlarms).await {
                    Ok(_) => cleared.push(device_id.clone()),
                    Err(TransformerError::UnsupportedCommand { .. }) => {}
                    Err(error) => self.follow_up_failed(device_id, "CLEAR_ALARMS", &error),
                }
            }
            AlarmsAutoCleared {
                workcell_id: &self.workcell_id,
                devices: &cleared,
            }
            .log();
        }
    }

    fn follow_up_failed(&self, device_id: &str, command: &str, error: &TransformerError) {
        FollowUpFailed {
            workcell_id: &self.workcell_id,
            device_id,
            command,
            error,
        }
        .log();
    }

    fn start_recovery(&self, device_id: &str, consecutive_failures: u32) -> bool {
        let mut book = self.book();
        if book.in_flight.contains_key(device_id) || book.escalated.contains(device_id) {
            return false;
        }
        let Some(engine) = self.self_ref.upgrade() else {
            return false;
        };

        let started = RecoveryStarted {
            workcell_id: &self.workcell_id,
            device_id,
            consecutive_failures,
        };
        started.log();
        let span = started.span("recover_member");

        let id = device_id.to_string();
        // The task removes itself from the book, which it cannot lock until
        // this insert is done
        let handle = tokio::spawn(async move { engine.run_recovery(id).await }.instrument(span));
        book.in_flight.insert(device_id.to_string(), handle);
        true
    }

    async fn run_recovery(self: Arc<Self>, device_id: String) {
        let attempts = self.max_recovery_attempts();
        let result = self.registry.recover(&device_id, attempts).await;

        {
            let mut book = self.book();
            book.in_flight.remove(&device_id);
            match &result {
                Ok(attempt) => RecoveryCompleted {
                    workcell_id: &self.workcell_id,
                    device_id: &device_id,
                    attempts: *attempt,
                }
                .log(),
                Err(error) => {
                    RecoveryFailed {
                        workcell_id: &self.workcell_id,
                        device_id: &device_id,
                        error,
                    }
                    .log();
                    if error.kind() == ErrorKind::RecoveryExhausted {
                        book.escalated.insert(device_id.clone());
                    }
                }
            }
        }

        // Through the workcell's own instance when registered, so its
        // snapshot follows the pass
        if self.registry.read_status(&self.workcell_id).await.is_err() {
            self.reconcile().await;
        }
    }

    fn next_phase(&self, current: WorkcellPhase, status: Health) -> WorkcellPhase {
        let book = self.book();
        if !book.escalated.is_empty() {
            WorkcellPhase::Degraded
        } else if !book.in_flight.is_empty() {
            WorkcellPhase::Recovering
        } else {
            match status {
                Health::Ok => WorkcellPhase::Steady,
                Health::Unknown if current == WorkcellPhase::Initializing => {
                    WorkcellPhase::Initializing
                }
                _ => WorkcellPhase::Degraded,
            }
        }
    }

    fn book(&self) -> StdMutexGuard<'_, RecoveryBook> {
        lock(&self.recoveries)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Act on each status the engine publishes. Statuses that arrive while a
/// previous one is still being applied collapse into the newest.
async fn follow_edges(engine: Weak<WorkcellEngine>, mut edges: watch::Receiver<Option<Health>>) {
    loop {
        let status = *edges.borrow_and_update();
        if let Some(status) = status {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            engine.apply_edge(status).await;
        }
        if edges.changed().await.is_err() {
            return;
        }
    }
}

impl Drop for WorkcellEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
