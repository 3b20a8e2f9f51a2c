// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::consts::EVENT_CHANNEL_CAPACITY;
use crate::model::StatusEvent;
use crate::observability::messages::workcell::EventDropped;
use crate::observability::messages::StructuredLog;
use crate::traits::StatusEventSink;

/// Forwards events into a bounded channel.
///
/// `emit` never waits: when the consumer is `capacity` events behind, the
/// new event is dropped and logged. Once the receiver is gone events are
/// discarded.
pub struct ChannelSink {
    tx: mpsc::Sender<StatusEvent>,
    capacity: usize,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<StatusEvent>) {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, capacity }, rx)
    }
}

impl StatusEventSink for ChannelSink {
    fn emit(&self, event: &StatusEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => EventDropped {
                workcell_id: &event.workcell_id,
                status: event.computed_status,
                capacity: self.capacity,
            }
            .log(),
        }
    }
}

/// Sends every event to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn StatusEventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn StatusEventSink>>) -> Self {
        Self { sinks }
    }
}

impl StatusEventSink for FanoutSink {
    fn emit(&self, event: &StatusEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aggregate, Health};

    #[test]
    fn test_fanout_reaches_every_sink() {
        let (first, mut first_rx) = ChannelSink::new();
        let (second, mut second_rx) = ChannelSink::new();
        let fanout = FanoutSink::new(vec![Arc::new(first), Arc::new(second)]);

        let event = StatusEvent::new(
            "cell1",
            &Aggregate {
                status: Health::Ok,
                contributing_device_ids: vec!["robot1".into()],
            },
        );
        fanout.emit(&event);

        assert_eq!(first_rx.try_recv().unwrap(), event);
        assert_eq!(second_rx.try_recv().unwrap(), event);
    }

    fn event(status: Health) -> StatusEvent {
        StatusEvent::new(
            "cell1",
            &Aggregate {
                status,
                contributing_device_ids: vec!["plc1".into()],
            },
        )
    }

    #[test]
    fn test_full_channel_drops_newest_without_blocking() {
        let (sink, mut rx) = ChannelSink::with_capacity(2);

        sink.emit(&event(Health::Ok));
        sink.emit(&event(Health::Degraded));
        sink.emit(&event(Health::Fault));

        assert_eq!(rx.try_recv().unwrap().computed_status, Health::Ok);
        assert_eq!(rx.try_recv().unwrap().computed_status, Health::Degraded);
        assert!(rx.try_recv().is_err());

        // Room again once the consumer catches up
        sink.emit(&event(Health::Unknown));
        assert_eq!(rx.try_recv().unwrap().computed_status, Health::Unknown);
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = ChannelSink::with_capacity(1);
        drop(rx);
        sink.emit(&event(Health::Ok));
        sink.emit(&event(Health::Fault));
        assert!(sink.tx.is_closed());
    }
}
