// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod adapters;   // transports to equipment
pub mod config;     // config, catalog + runtime wiring
pub mod dispatch;   // external request routing
pub mod engine;     // instances, registry, polling, reconciliation
pub mod errors;     // error handling
pub mod model;
pub mod observability;
pub mod traits;     // unified abstractions
pub mod transformers; // equipment families
