// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Transformer instance: one device's connector.
//!
//! Each instance runs a single I/O task that owns the device's adapters and
//! is the only writer of its status snapshot. Callers talk to the task over
//! a bounded request queue and get their answer on a oneshot channel, so
//! requests to one device are handled strictly one at a time while other
//! devices proceed independently.
//!
//! ```text
//!   callers ──► mpsc<Request> ──► I/O task ──► DeviceIo ──► adapters
//!                                    │
//!   snapshot() ◄── watch<StatusSnapshot> (single writer)
//!   registry   ◄── broadcast<DeviceStateChange>
//! ```
//!
//! Teardown cancels the task's token. Whatever request is in flight is
//! dropped mid-await, its caller receives `Cancelled`, and the task then
//! closes its adapters before exiting.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectPolicy;
use super::io::DeviceIo;
use crate::config::consts::INSTANCE_QUEUE_DEPTH;
use crate::config::RuntimeOptions;
use crate::errors::{TransformerError, TransformerResult};
use crate::model::{Device, DeviceState, DeviceStateChange, DeviceStatus, StatusSnapshot};
use crate::observability::messages::device::{
    DeviceStateChanged, OperationFailed, RequestAbandoned,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{ProtocolAdapter, Transformer};
use crate::transformers::{CapabilityTable, Command};

/// Per-instance timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceOptions {
    pub call_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl InstanceOptions {
    pub fn from_runtime(options: &RuntimeOptions) -> Self {
        Self {
            call_timeout: options.call_timeout(),
            reconnect: ReconnectPolicy::from_config(&options.reconnect),
        }
    }

    /// Caller-side bound on one queued operation: connect, send, and one
    /// reconnect-and-resend, plus the time spent waiting in the queue.
    fn operation_deadline(&self) -> Duration {
        self.call_timeout * 6
    }

    fn recovery_deadline(&self, attempts: u32, adapters: usize) -> Duration {
        let waits: Duration = (1..attempts).map(|a| self.reconnect.delay_for(a)).sum();
        let calls = (attempts as usize + 1) * adapters.max(1) + 1;
        waits + self.call_timeout * calls as u32 + self.operation_deadline()
    }
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self::from_runtime(&RuntimeOptions::default())
    }
}

#[derive(Debug)]
enum Operation {
    Poll,
    ReadIntervalData,
    ReadStatus,
    ReadVariable(String),
    WriteVariable(String, Value),
    ReadParameter(String),
    WriteParameter(String, Value),
    Execute(Command),
    Recover(u32),
    ClearFault,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Poll => "poll",
            Operation::ReadIntervalData => "read_interval_data",
            Operation::ReadStatus => "read_status",
            Operation::ReadVariable(_) => "read_variable",
            Operation::WriteVariable(..) => "write_variable",
            Operation::ReadParameter(_) => "read_parameter",
            Operation::WriteParameter(..) => "write_parameter",
            Operation::Execute(_) => "execute_command",
            Operation::Recover(_) => "recover",
            Operation::ClearFault => "clear_fault",
        }
    }
}

enum Outcome {
    Snapshot(StatusSnapshot),
    Value(Value),
    Data(BTreeMap<String, Value>),
    Recovered(u32),
    Done,
}

struct Request {
    op: Operation,
    reply: oneshot::Sender<TransformerResult<Outcome>>,
    /// The caller stops waiting at this instant
    expires: Instant,
}

impl Request {
    /// A request nobody is waiting for must not reach the equipment.
    fn abandoned(&self) -> bool {
        self.reply.is_closed() || Instant::now() >= self.expires
    }
}

/// Marks a poll as in flight until dropped.
pub struct PollGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct TransformerInstance {
    device: Device,
    capabilities: CapabilityTable,
    adapter_count: usize,
    options: InstanceOptions,
    requests: mpsc::Sender<Request>,
    status: Arc<watch::Sender<StatusSnapshot>>,
    changes: broadcast::Sender<DeviceStateChange>,
    mutations: Mutex<()>,
    polling: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl TransformerInstance {
    /// Start the I/O task for `device` and return a handle to it.
    pub(crate) fn spawn(
        device: Device,
        transformer: Arc<dyn Transformer>,
        adapters: Vec<Box<dyn ProtocolAdapter>>,
        options: InstanceOptions,
        changes: broadcast::Sender<DeviceStateChange>,
    ) -> Arc<Self> {
        let (requests, inbox) = mpsc::channel(INSTANCE_QUEUE_DEPTH);
        let (status, _) = watch::channel(StatusSnapshot::new(&device.device_id));
        let status = Arc::new(status);
        let cancel = CancellationToken::new();

        let watched: HashSet<String> = transformer.watched_devices().into_iter().collect();
        let watch_rx = if watched.is_empty() {
            None
        } else {
            Some(changes.subscribe())
        };

        let task = IoTask {
            device_id: device.device_id.clone(),
            capabilities: transformer.capabilities().clone(),
            adapter_count: adapters.len(),
            io: DeviceIo::new(&device.device_id, adapters, options.call_timeout, options.reconnect),
            transformer,
            status: status.clone(),
            changes: changes.clone(),
            watched,
            exhausted_after: None,
        };

        let instance = Arc::new(Self {
            capabilities: task.capabilities.clone(),
            adapter_count: task.adapter_count,
            device,
            options,
            requests,
            status,
            changes,
            mutations: Mutex::new(()),
            polling: Arc::new(AtomicBool::new(false)),
            cancel: cancel.clone(),
            task: StdMutex::new(None),
        });

        let handle = tokio::spawn(task.run(inbox, cancel, watch_rx));
        if let Ok(mut slot) = instance.task.lock() {
            *slot = Some(handle);
        }
        instance
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_id(&self) -> &str {
        &self.device.device_id
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Copy of the cached status.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> DeviceState {
        self.status.borrow().state
    }

    /// Receiver notified on every snapshot write.
    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Interval-data read followed by status read, as one queued operation.
    pub async fn poll(&self) -> TransformerResult<StatusSnapshot> {
        let deadline = self.options.operation_deadline() * 2;
        match self.call(Operation::Poll, deadline).await? {
            Outcome::Snapshot(snapshot) => Ok(snapshot),
            _ => Err(self.unexpected("poll")),
        }
    }

    pub async fn read_interval_data(&self) -> TransformerResult<BTreeMap<String, Value>> {
        match self.call(Operation::ReadIntervalData, self.options.operation_deadline()).await? {
            Outcome::Data(data) => Ok(data),
            _ => Err(self.unexpected("read_interval_data")),
        }
    }

    pub async fn read_status(&self) -> TransformerResult<StatusSnapshot> {
        match self.call(Operation::ReadStatus, self.options.operation_deadline()).await? {
            Outcome::Snapshot(snapshot) => Ok(snapshot),
            _ => Err(self.unexpected("read_status")),
        }
    }

    pub async fn read_variable(&self, name: &str) -> TransformerResult<Value> {
        self.value_call(Operation::ReadVariable(name.to_string())).await
    }

    pub async fn write_variable(&self, name: &str, value: Value) -> TransformerResult<Value> {
        self.value_call(Operation::WriteVariable(name.to_string(), value)).await
    }

    pub async fn read_parameter(&self, name: &str) -> TransformerResult<Value> {
        self.value_call(Operation::ReadParameter(name.to_string())).await
    }

    pub async fn write_parameter(&self, name: &str, value: Value) -> TransformerResult<Value> {
        self.value_call(Operation::WriteParameter(name.to_string(), value)).await
    }

    /// Parse, capability-check, then run a named command.
    pub async fn execute_command(&self, name: &str, args: &Value) -> TransformerResult<Value> {
        let command =
            Command::parse(name, args).map_err(|reason| TransformerError::validation(self.device_id(), reason))?;
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> TransformerResult<Value> {
        if !self.capabilities.supports(&command) {
            return Err(TransformerError::UnsupportedCommand {
                device_id: self.device_id().to_string(),
                command: command.name().to_string(),
            });
        }
        self.value_call(Operation::Execute(command)).await
    }

    /// Disconnect and reconnect every adapter with backoff.
    ///
    /// On exhaustion the device stays degraded and refuses I/O until
    /// `clear_fault` is called.
    pub async fn recover(&self, max_attempts: Option<u32>) -> TransformerResult<u32> {
        let attempts = max_attempts.unwrap_or(self.options.reconnect.max_attempts).max(1);
        let deadline = self.options.recovery_deadline(attempts, self.adapter_count);
        match self.call(Operation::Recover(attempts), deadline).await? {
            Outcome::Recovered(attempt) => Ok(attempt),
            _ => Err(self.unexpected("recover")),
        }
    }

    /// Lift a recovery-exhausted latch so the device may reconnect again.
    pub async fn clear_fault(&self) -> TransformerResult<()> {
        match self.call(Operation::ClearFault, self.options.operation_deadline()).await? {
            Outcome::Done => Ok(()),
            _ => Err(self.unexpected("clear_fault")),
        }
    }

    /// Claim the poll slot, or `None` if a poll is already running.
    pub fn try_begin_poll(&self) -> Option<PollGuard> {
        self.polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PollGuard {
                flag: self.polling.clone(),
            })
    }

    /// Held across a mutating call so only one runs per device.
    pub async fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutations.lock().await
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel the I/O task and wait for it to release its adapters.
    ///
    /// Returns `false` if the task overran `limit` and had to be aborted.
    /// Either way the device ends up `Destroyed`.
    pub(crate) async fn shutdown(&self, limit: Duration) -> bool {
        self.cancel.cancel();
        let handle = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        let mut clean = true;
        if let Some(mut handle) = handle {
            if timeout(limit, &mut handle).await.is_err() {
                handle.abort();
                clean = false;
            }
        }

        self.mark_destroyed();
        clean
    }

    fn mark_destroyed(&self) {
        let mut from = DeviceState::Destroyed;
        self.status.send_modify(|snapshot| {
            from = snapshot.state;
            snapshot.state = DeviceState::Destroyed;
            snapshot.timestamp = Utc::now();
        });
        if from != DeviceState::Destroyed {
            publish_change(&self.changes, self.device_id(), from, DeviceState::Destroyed);
        }
    }

    async fn value_call(&self, op: Operation) -> TransformerResult<Value> {
        let name = op.name();
        match self.call(op, self.options.operation_deadline()).await? {
            Outcome::Value(value) => Ok(value),
            _ => Err(self.unexpected(name)),
        }
    }

    async fn call(&self, op: Operation, deadline: Duration) -> TransformerResult<Outcome> {
        let device_id = self.device_id();
        let cancelled = || TransformerError::Cancelled {
            device_id: device_id.to_string(),
        };
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let operation = op.name();
        let (reply, answer) = oneshot::channel();
        let expires = Instant::now() + deadline;
        let exchange = async {
            self.requests
                .send(Request { op, reply, expires })
                .await
                .map_err(|_| cancelled())?;
            answer.await.map_err(|_| cancelled())?
        };

        let result = match timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransformerError::Timeout {
                device_id: device_id.to_string(),
                operation: operation.to_string(),
                after: deadline,
            }),
        };

        if let Err(error) = &result {
            OperationFailed {
                device_id,
                operation,
                error,
            }
            .log();
        }
        result
    }

    fn unexpected(&self, operation: &str) -> TransformerError {
        TransformerError::protocol(
            self.device_id(),
            format!("instance returned the wrong outcome for {}", operation),
        )
    }
}

fn publish_change(
    changes: &broadcast::Sender<DeviceStateChange>,
    device_id: &str,
    from: DeviceState,
    to: DeviceState,
) {
    DeviceStateChanged { device_id, from, to }.log();
    // No subscribers is fine
    let _ = changes.send(DeviceStateChange {
        device_id: device_id.to_string(),
        from,
        to,
    });
}

enum Watched {
    Changed(DeviceStateChange),
    Lagged,
    Closed,
}

async fn next_change(rx: &mut Option<broadcast::Receiver<DeviceStateChange>>) -> Watched {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    match receiver.recv().await {
        Ok(change) => Watched::Changed(change),
        Err(broadcast::error::RecvError::Lagged(_)) => Watched::Lagged,
        Err(broadcast::error::RecvError::Closed) => Watched::Closed,
    }
}

/// The I/O task. Owns the adapters and is the only writer of the snapshot
/// while it runs.
struct IoTask {
    device_id: String,
    capabilities: CapabilityTable,
    adapter_count: usize,
    transformer: Arc<dyn Transformer>,
    io: DeviceIo,
    status: Arc<watch::Sender<StatusSnapshot>>,
    changes: broadcast::Sender<DeviceStateChange>,
    watched: HashSet<String>,
    exhausted_after: Option<u32>,
}

impl IoTask {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Request>,
        cancel: CancellationToken,
        mut watch_rx: Option<broadcast::Receiver<DeviceStateChange>>,
    ) {
        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.io.connect_all() => Some(result),
        };
        match connected {
            None => {
                self.teardown().await;
                return;
            }
            Some(Ok(())) => self.set_state(DeviceState::Connected),
            Some(Err(_)) => {
                self.sync_link();
                self.set_state(DeviceState::Degraded);
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = inbox.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    if request.abandoned() {
                        RequestAbandoned {
                            device_id: &self.device_id,
                            operation: request.op.name(),
                        }
                        .log();
                        continue;
                    }
                    let Request { op, reply, .. } = request;
                    let finished = tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = reply.send(Err(TransformerError::Cancelled {
                                device_id: self.device_id.clone(),
                            }));
                            false
                        }
                        outcome = self.handle(op) => {
                            let _ = reply.send(outcome);
                            true
                        }
                    };
                    if !finished {
                        break;
                    }
                }
                change = next_change(&mut watch_rx) => {
                    match change {
                        Watched::Changed(change) if !self.watched.contains(&change.device_id) => continue,
                        Watched::Closed => {
                            watch_rx = None;
                            continue;
                        }
                        Watched::Changed(_) | Watched::Lagged => {}
                    }
                    let finished = tokio::select! {
                        _ = cancel.cancelled() => false,
                        _ = self.handle(Operation::ReadStatus) => true,
                    };
                    if !finished {
                        break;
                    }
                }
            }
        }

        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.transformer.shutdown().await;
        self.io.disconnect_all().await;
        self.set_state(DeviceState::Disconnected);
    }

    async fn handle(&mut self, op: Operation) -> TransformerResult<Outcome> {
        if let Some(attempts) = self.exhausted_after {
            if !matches!(op, Operation::ClearFault) && self.adapter_count > 0 {
                return Err(TransformerError::RecoveryExhausted {
                    device_id: self.device_id.clone(),
                    attempts,
                });
            }
        }

        let transformer = self.transformer.clone();
        match op {
            Operation::Poll => {
                let data = transformer.read_interval_data(&mut self.io).await;
                let data = self.observe(data)?;
                self.store_interval_data(data);
                let status = transformer.read_status(&mut self.io).await;
                let status = self.observe(status)?;
                Ok(Outcome::Snapshot(self.store_status(status)))
            }
            Operation::ReadIntervalData => {
                let data = transformer.read_interval_data(&mut self.io).await;
                let data = self.observe(data)?;
                self.store_interval_data(data.clone());
                Ok(Outcome::Data(data))
            }
            Operation::ReadStatus => {
                let status = transformer.read_status(&mut self.io).await;
                let status = self.observe(status)?;
                Ok(Outcome::Snapshot(self.store_status(status)))
            }
            Operation::ReadVariable(name) => {
                let result = transformer.read_variable(&mut self.io, &name).await;
                self.observe(result).map(Outcome::Value)
            }
            Operation::WriteVariable(name, value) => {
                let result = transformer.write_variable(&mut self.io, &name, value).await;
                self.observe(result).map(Outcome::Value)
            }
            Operation::ReadParameter(name) => {
                let result = transformer.read_parameter(&mut self.io, &name).await;
                self.observe(result).map(Outcome::Value)
            }
            Operation::WriteParameter(name, value) => {
                let result = transformer.write_parameter(&mut self.io, &name, value).await;
                self.observe(result).map(Outcome::Value)
            }
            Operation::Execute(command) => {
                if !self.capabilities.supports(&command) {
                    return Err(TransformerError::UnsupportedCommand {
                        device_id: self.device_id.clone(),
                        command: command.name().to_string(),
                    });
                }
                let result = transformer.execute_command(&mut self.io, &command).await;
                self.observe(result).map(Outcome::Value)
            }
            Operation::Recover(attempts) => {
                let result = self.io.recover(attempts).await;
                self.sync_link();
                match result {
                    Ok(attempt) => {
                        self.set_state(DeviceState::Connected);
                        Ok(Outcome::Recovered(attempt))
                    }
                    Err(error) => {
                        if let TransformerError::RecoveryExhausted { attempts, .. } = &error {
                            self.exhausted_after = Some(*attempts);
                            self.status.send_modify(|s| s.recovery_exhausted = true);
                        }
                        self.set_state(DeviceState::Degraded);
                        Err(error)
                    }
                }
            }
            Operation::ClearFault => {
                self.exhausted_after = None;
                self.status.send_modify(|s| s.recovery_exhausted = false);
                Ok(Outcome::Done)
            }
        }
    }

    /// Fold an operation's result into link health and device state.
    fn observe<T>(&mut self, result: TransformerResult<T>) -> TransformerResult<T> {
        self.sync_link();
        match &result {
            Err(error) if error.is_link_failure() => self.set_state(DeviceState::Degraded),
            Ok(_) if self.io.link().consecutive_failures == 0 => {
                self.set_state(DeviceState::Connected)
            }
            _ => {}
        }
        result
    }

    fn sync_link(&mut self) {
        let link = self.io.link().clone();
        self.status.send_if_modified(|snapshot| {
            let changed = snapshot.consecutive_failures != link.consecutive_failures
                || (link.last_error.is_some() && snapshot.last_error != link.last_error);
            snapshot.consecutive_failures = link.consecutive_failures;
            if link.last_error.is_some() {
                snapshot.last_error = link.last_error.clone();
            }
            changed
        });
    }

    fn store_interval_data(&mut self, data: BTreeMap<String, Value>) {
        self.status.send_modify(|snapshot| {
            snapshot.values.extend(data);
            snapshot.timestamp = Utc::now();
        });
    }

    fn store_status(&mut self, status: DeviceStatus) -> StatusSnapshot {
        self.status.send_modify(|snapshot| {
            snapshot.code = Some(status.code);
            snapshot.reported = status.health;
            snapshot.values.extend(status.values);
            snapshot.timestamp = Utc::now();
        });
        self.status.borrow().clone()
    }

    fn set_state(&mut self, to: DeviceState) {
        let mut from = to;
        self.status.send_if_modified(|snapshot| {
            from = snapshot.state;
            if from == to || from.is_terminal() {
                return false;
            }
            snapshot.state = to;
            snapshot.timestamp = Utc::now();
            true
        });
        if from != to && !from.is_terminal() {
            publish_change(&self.changes, &self.device_id, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::{FailingConnectAdapter, HangingAdapter, RecordingAdapter};
    use crate::adapters::{MemoryAdapter, RegisterBank};
    use crate::model::Health;
    use crate::transformers::RobotTransformer;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    fn options() -> InstanceOptions {
        InstanceOptions {
            call_timeout: Duration::from_millis(500),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(1_000),
                max_attempts: 3,
            },
        }
    }

    fn robot(adapter: Box<dyn ProtocolAdapter>) -> (Arc<TransformerInstance>, broadcast::Receiver<DeviceStateChange>) {
        let (changes, rx) = broadcast::channel(64);
        let device = Device {
            device_id: "robot1".into(),
            machine_model: "ur10e".into(),
            transformer: "RobotTransformer".into(),
            primary: false,
        };
        let transformer = Arc::new(RobotTransformer::new(&Default::default()));
        let instance = TransformerInstance::spawn(device, transformer, vec![adapter], options(), changes);
        (instance, rx)
    }

    async fn wait_for_state(instance: &TransformerInstance, state: DeviceState) {
        let mut rx = instance.subscribe_status();
        let _ = timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state)).await;
        assert_eq!(instance.state(), state);
    }

    #[tokio::test]
    async fn test_variable_round_trip_through_memory_registers() {
        let bank = RegisterBank::new();
        let (instance, _) = robot(Box::new(MemoryAdapter::new("main", bank.clone())));
        wait_for_state(&instance, DeviceState::Connected).await;

        instance.write_variable("part_count", json!(17)).await.unwrap();
        assert_eq!(instance.read_variable("part_count").await.unwrap(), json!(17));

        instance.write_variable("label", json!("lot 4")).await.unwrap();
        assert_eq!(instance.read_variable("label").await.unwrap(), json!("lot 4"));

        assert!(instance.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_status_read_updates_snapshot() {
        let bank = RegisterBank::new();
        bank.set("robot.mode", "1");
        let (instance, _) = robot(Box::new(MemoryAdapter::new("main", bank)));

        let snapshot = instance.read_status().await.unwrap();
        assert_eq!(snapshot.code.as_deref(), Some("RUNNING"));
        assert_eq!(snapshot.health(), Health::Ok);
        assert_eq!(instance.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_connection_loss_degrades_and_read_recovers() {
        let bank = RegisterBank::new();
        bank.set("robot.mode", "0");
        let (instance, mut changes) = robot(Box::new(MemoryAdapter::new("main", bank.clone())));
        wait_for_state(&instance, DeviceState::Connected).await;

        bank.set_online(false);
        let err = instance.read_status().await.unwrap_err();
        assert!(err.is_link_failure(), "{:?}", err);
        assert_eq!(instance.state(), DeviceState::Degraded);
        assert!(instance.snapshot().consecutive_failures >= 1);

        let mut seen = Vec::new();
        while let Ok(change) = changes.try_recv() {
            seen.push(change.to);
        }
        assert_eq!(seen, vec![DeviceState::Connected, DeviceState::Degraded]);

        bank.set_online(true);
        assert_eq!(instance.recover(None).await.unwrap(), 1);
        assert_eq!(instance.state(), DeviceState::Connected);
        assert_eq!(instance.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_unsupported_and_malformed_commands() {
        let (instance, _) = robot(Box::new(MemoryAdapter::new("main", RegisterBank::new())));

        let err = instance.execute_command("SELF_DESTRUCT", &json!({})).await.unwrap_err();
        assert!(matches!(err, TransformerError::UnsupportedCommand { .. }));

        let err = instance.execute_command("LOAD_PROGRAM", &json!([1])).await.unwrap_err();
        assert!(matches!(err, TransformerError::Validation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_exhaustion_latches_until_cleared() {
        let attempts = Arc::new(AtomicU32::new(0));
        let (instance, _) = robot(Box::new(FailingConnectAdapter::new(attempts.clone())));
        wait_for_state(&instance, DeviceState::Degraded).await;
        let before = attempts.load(Ordering::SeqCst);

        let err = instance.recover(Some(4)).await.unwrap_err();
        assert_eq!(
            err,
            TransformerError::RecoveryExhausted {
                device_id: "robot1".into(),
                attempts: 4
            }
        );
        assert_eq!(attempts.load(Ordering::SeqCst) - before, 4);

        let snapshot = instance.snapshot();
        assert!(snapshot.recovery_exhausted);
        assert_eq!(snapshot.health(), Health::Fault);

        // No more automatic retries while latched
        let err = instance.read_status().await.unwrap_err();
        assert!(matches!(err, TransformerError::RecoveryExhausted { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst) - before, 4);

        instance.clear_fault().await.unwrap();
        assert!(!instance.snapshot().recovery_exhausted);
    }

    #[tokio::test]
    async fn test_queued_calls_never_interleave() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let (instance, _) = robot(Box::new(RecordingAdapter::new(log.clone(), Duration::from_millis(20))));

        let a = instance.clone();
        let b = instance.clone();
        let (ra, rb) = tokio::join!(
            async move { a.write_variable("x", json!(1)).await },
            async move { b.write_variable("x", json!(2)).await },
        );
        ra.unwrap();
        rb.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries.len(), 4);
        for pair in entries.chunks(2) {
            let begin = pair[0].strip_prefix("begin ").unwrap();
            let end = pair[1].strip_prefix("end ").unwrap();
            assert_eq!(begin, end, "interleaved: {:?}", entries);
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_hanging_send() {
        let released = Arc::new(AtomicBool::new(false));
        let (instance, _) = robot(Box::new(HangingAdapter::new(released.clone())));
        wait_for_state(&instance, DeviceState::Connected).await;

        let pending = {
            let instance = instance.clone();
            tokio::spawn(async move { instance.read_variable("anything").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        assert!(instance.shutdown(Duration::from_secs(1)).await);
        assert!(started.elapsed() < Duration::from_secs(1));

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransformerError::Cancelled { .. })));
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(instance.state(), DeviceState::Destroyed);

        let err = instance.read_variable("anything").await.unwrap_err();
        assert!(matches!(err, TransformerError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_poll_guard_is_exclusive() {
        let (instance, _) = robot(Box::new(MemoryAdapter::new("main", RegisterBank::new())));
        let guard = instance.try_begin_poll();
        assert!(guard.is_some());
        assert!(instance.try_begin_poll().is_none());
        drop(guard);
        assert!(instance.try_begin_poll().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_write_never_reaches_device() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let (instance, _) = robot(Box::new(RecordingAdapter::new(log.clone(), Duration::from_millis(400))));
        wait_for_state(&instance, DeviceState::Connected).await;

        // Ten slow reads keep the queue busy past the write's deadline
        let reads: Vec<_> = (0..10)
            .map(|_| {
                let instance = instance.clone();
                tokio::spawn(async move { instance.read_variable("x").await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = instance.write_variable("x", json!(7)).await.unwrap_err();
        assert!(matches!(err, TransformerError::Timeout { .. }), "{:?}", err);
        for read in reads {
            let _ = read.await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        let entries = log.lock().unwrap().clone();
        assert!(
            !entries.iter().any(|e| e.contains("WRITE")),
            "write reached the device after its caller gave up: {:?}",
            entries
        );

        // The queue still serves callers that are waiting
        instance.write_variable("x", json!(8)).await.unwrap();
        assert!(log.lock().unwrap().iter().any(|e| e == "end WRITE var.x 8"));
    }
}
