// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::model::StatusEvent;

/// Destination for workcell status events.
pub trait StatusEventSink: Send + Sync {
    fn emit(&self, event: &StatusEvent);
}
