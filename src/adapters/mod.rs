// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod factory;
pub mod line;
pub mod memory;
pub mod tcp;

#[cfg(test)]
pub mod stub;

pub use factory::{AdapterCatalog, AdapterConstructor};
pub use line::{LineReply, LineRequest};
pub use memory::{MemoryAdapter, RegisterBank};
pub use tcp::TcpAdapter;
