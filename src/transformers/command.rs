// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Typed commands.
//!
//! External callers send a command name and a JSON argument object. Both are
//! parsed into a `Command` before any device sees them, so argument errors
//! are reported as validation failures and transformers match on variants
//! instead of strings. Names no family knows become `Command::Generic`.

use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Restart,
    ClearAlarms,
    StartCycle,
    StopCycle,
    LoadProgram,
    ReadDigitalInput,
    SetDigitalOutput,
    Generic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Restart,
    ClearAlarms,
    StartCycle,
    StopCycle,
    LoadProgram { program: String },
    ReadDigitalInput { index: u16 },
    SetDigitalOutput { index: u16, value: bool },
    /// Any other name, passed through with its raw arguments
    Generic { name: String, args: Value },
}

impl Command {
    /// Parse a command name and argument payload.
    ///
    /// `args` must be a JSON object or null. Names are case-insensitive.
    pub fn parse(name: &str, args: &Value) -> Result<Self, String> {
        let name = normalize_name(name)?;
        let args = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(format!(
                    "arguments for '{}' must be an object, got {}",
                    name,
                    type_name(other)
                ))
            }
        };

        let command = match name.as_str() {
            "RESTART" | "RESTART_ROBOT" => Command::Restart,
            "CLEAR_ALARMS" | "RESOLVE_ALL_ALARMS" => Command::ClearAlarms,
            "START_CYCLE" => Command::StartCycle,
            "STOP_CYCLE" => Command::StopCycle,
            "LOAD_PROGRAM" => Command::LoadProgram {
                program: required_string(&args, "program")?,
            },
            "READ_DIGITAL_INPUT" => Command::ReadDigitalInput {
                index: required_index(&args)?,
            },
            "SET_DIGITAL_OUTPUT" => Command::SetDigitalOutput {
                index: required_index(&args)?,
                value: required_bool(&args, "value")?,
            },
            _ => Command::Generic {
                name,
                args: Value::Object(args),
            },
        };
        Ok(command)
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Restart => CommandKind::Restart,
            Command::ClearAlarms => CommandKind::ClearAlarms,
            Command::StartCycle => CommandKind::StartCycle,
            Command::StopCycle => CommandKind::StopCycle,
            Command::LoadProgram { .. } => CommandKind::LoadProgram,
            Command::ReadDigitalInput { .. } => CommandKind::ReadDigitalInput,
            Command::SetDigitalOutput { .. } => CommandKind::SetDigitalOutput,
            Command::Generic { .. } => CommandKind::Generic,
        }
    }

    /// Canonical upper-case name.
    pub fn name(&self) -> &str {
        match self {
            Command::Generic { name, .. } => name,
            other => other.kind().canonical_name(),
        }
    }
}

impl CommandKind {
    pub fn canonical_name(self) -> &'static str {
        match self {
            CommandKind::Restart => "RESTART",
            CommandKind::ClearAlarms => "CLEAR_ALARMS",
            CommandKind::StartCycle => "START_CYCLE",
            CommandKind::StopCycle => "STOP_CYCLE",
            CommandKind::LoadProgram => "LOAD_PROGRAM",
            CommandKind::ReadDigitalInput => "READ_DIGITAL_INPUT",
            CommandKind::SetDigitalOutput => "SET_DIGITAL_OUTPUT",
            CommandKind::Generic => "GENERIC",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trim, upper-case, and check the name is a plain identifier.
pub fn normalize_name(name: &str) -> Result<String, String> {
    let name = name.trim().to_ascii_uppercase();
    if name.is_empty() {
        return Err("command name is empty".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("command name '{}' contains invalid characters", name));
    }
    Ok(name)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(other) => Err(format!("'{}' must be a non-empty string, got {}", key, type_name(other))),
        None => Err(format!("missing required argument '{}'", key)),
    }
}

fn required_index(args: &Map<String, Value>) -> Result<u16, String> {
    let raw = args
        .get("index")
        .ok_or_else(|| "missing required argument 'index'".to_string())?;
    raw.as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| format!("'index' must be an integer between 0 and {}", u16::MAX))
}

fn required_bool(args: &Map<String, Value>, key: &str) -> Result<bool, String> {
    match args.get(key) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) if n.as_u64() == Some(0) => Ok(false),
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(true),
        Some(other) => Err(format!("'{}' must be a boolean, got {}", key, type_name(other))),
        None => Err(format!("missing required argument '{}'", key)),
    }
}
