// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Runtime data model shared across the engine, dispatcher and transformers.

mod device;
mod event;
mod status;

pub use device::{Device, DeviceInfo, DeviceState, DeviceStateChange};
pub use event::{Aggregate, MemberStatus, StatusEvent};
pub use status::{DeviceStatus, Health, StatusSnapshot};
