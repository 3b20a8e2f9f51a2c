// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Deadline for a single adapter call (connect, send or disconnect)
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 2_000;
/// Deadline for tearing down one device on unregister
pub const DEFAULT_TEARDOWN_TIMEOUT_MS: u64 = 3_000;
/// Polling period for the primary device
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// First reconnect delay; doubled per attempt
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 100;
/// Ceiling on any single reconnect delay
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 5_000;
/// Reconnect attempts per recovery before giving up
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Consecutive failures before a workcell starts recovering a member
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Recovery attempts a workcell grants each member before escalating
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 5;

/// Adapter slot name used when a device config leaves it out
pub const DEFAULT_ADAPTER_NAME: &str = "main";

/// Capacity of an instance's request queue
pub const INSTANCE_QUEUE_DEPTH: usize = 64;
/// Capacity of the device state-change broadcast
pub const STATE_CHANGE_CAPACITY: usize = 256;
/// Status events buffered for a slow consumer before new ones are dropped
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
