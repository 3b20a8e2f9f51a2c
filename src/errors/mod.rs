// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod connection;
mod registry;
mod transformer;

pub use config::{ConfigError, ConfigLoadError};
pub use connection::ConnectionError;
pub use registry::RegistryError;
pub use transformer::{ErrorKind, TransformerError, TransformerResult};
