// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging.
//!
//! Every diagnostic and operational log line in the runtime comes from a
//! message type in `messages`. Each type implements `Display` for the human
//! readable line and `StructuredLog` to emit it through `tracing` with its
//! fields attached, so log pipelines can filter on `device_id` or
//! `workcell_id` without parsing text.
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::device` - adapter connections, device state, reconnection
//! * `messages::registry` - registration and teardown
//! * `messages::scheduler` - polling ticks
//! * `messages::workcell` - status events and recovery
//!
//! # Usage
//!
//! ```rust
//! use the_workcell::observability::messages::registry::DeviceUnregistered;
//! use the_workcell::observability::messages::StructuredLog;
//!
//! DeviceUnregistered { device_id: "robot1" }.log();
//! ```

pub mod messages;
