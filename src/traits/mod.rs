// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod adapter;
pub mod reducer;
pub mod sink;
pub mod transformer;

pub use adapter::{ConnectionState, ProtocolAdapter, Response};
pub use reducer::StatusReducer;
pub use sink::StatusEventSink;
pub use transformer::Transformer;
