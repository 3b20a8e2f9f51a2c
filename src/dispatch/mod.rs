// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod bridge;
pub mod dispatcher;

pub use bridge::{Bridge, BridgeMessage, BridgeMethod, BridgeReply};
pub use dispatcher::{CommandDispatcher, CommandRequest, DeviceOperation};
