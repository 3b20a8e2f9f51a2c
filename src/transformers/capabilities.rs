// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::command::{normalize_name, Command, CommandKind};

/// Option key listing generic command names a device accepts.
pub const GENERIC_COMMANDS_OPTION: &str = "generic_commands";

/// Commands one device accepts.
///
/// Typed variants are enabled per kind; generic commands per name.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    kinds: HashSet<CommandKind>,
    generic: HashSet<String>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: CommandKind) -> Self {
        if kind != CommandKind::Generic {
            self.kinds.insert(kind);
        }
        self
    }

    pub fn with_generic(mut self, name: &str) -> Self {
        if let Ok(name) = normalize_name(name) {
            self.generic.insert(name);
        }
        self
    }

    /// Add the generic names listed under `generic_commands` in device options.
    pub fn with_generic_from_options(self, options: &HashMap<String, Value>) -> Self {
        let names: Vec<String> = options
            .get(GENERIC_COMMANDS_OPTION)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        names.iter().fold(self, |table, name| table.with_generic(name))
    }

    pub fn supports(&self, command: &Command) -> bool {
        match command {
            Command::Generic { name, .. } => self.generic.contains(name),
            other => self.kinds.contains(&other.kind()),
        }
    }

    /// Every accepted command name, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .kinds
            .iter()
            .map(|k| k.canonical_name().to_string())
            .chain(self.generic.iter().cloned())
            .collect();
        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_supports() {
        let options = HashMap::from([(
            GENERIC_COMMANDS_OPTION.to_string(),
            json!(["open_gripper", 5]),
        )]);
        let table = CapabilityTable::new()
            .with(CommandKind::Restart)
            .with_generic_from_options(&options);

        assert!(table.supports(&Command::Restart));
        assert!(!table.supports(&Command::ClearAlarms));
        assert!(table.supports(&Command::parse("OPEN_GRIPPER", &json!({})).unwrap()));
        assert!(!table.supports(&Command::parse("CLOSE_GRIPPER", &json!({})).unwrap()));
        assert_eq!(table.command_names(), vec!["OPEN_GRIPPER", "RESTART"]);
    }
}
