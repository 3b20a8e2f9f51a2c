// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Equipment families.
//!
//! A transformer translates runtime operations into one vendor's register
//! map. Families are looked up by entry point in a `TransformerCatalog`.

pub mod capabilities;
pub mod command;
pub mod factory;
pub mod plc;
pub mod robot;
pub mod values;
pub mod workcell;

pub use capabilities::{CapabilityTable, GENERIC_COMMANDS_OPTION};
pub use command::{Command, CommandKind};
pub use factory::{TransformerCatalog, TransformerConstructor, TransformerContext};
pub use plc::PlcTransformer;
pub use robot::RobotTransformer;
pub use workcell::WorkcellTransformer;
