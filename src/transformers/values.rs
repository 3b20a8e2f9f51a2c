// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Register value encoding shared by the equipment families.
//!
//! Registers hold text. Values go out as compact JSON and come back parsed
//! as JSON, falling back to a plain string for anything the device wrote
//! itself.

use serde_json::Value;

use crate::engine::DeviceIo;
use crate::errors::{TransformerError, TransformerResult};

pub fn encode(value: &Value) -> String {
    match value {
        // Bare strings keep the register human-readable, unless they would
        // read back as some other JSON value
        Value::String(text)
            if !text.is_empty()
                && !text.contains(char::is_whitespace)
                && serde_json::from_str::<Value>(text).is_err() =>
        {
            text.clone()
        }
        other => other.to_string(),
    }
}

pub fn decode(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Names become register key suffixes, so they must be single tokens.
pub fn check_name(device_id: &str, what: &str, name: &str) -> TransformerResult<()> {
    if name.is_empty() {
        return Err(TransformerError::validation(
            device_id,
            format!("{} name cannot be empty", what),
        ));
    }
    if name.contains(char::is_whitespace) {
        return Err(TransformerError::validation(
            device_id,
            format!("{} name '{}' contains whitespace", what, name),
        ));
    }
    Ok(())
}

/// Read `prefix.name`; a missing register is a validation error.
pub async fn read_named(
    io: &mut DeviceIo,
    prefix: &str,
    what: &str,
    name: &str,
) -> TransformerResult<Value> {
    check_name(io.device_id(), what, name)?;
    let key = format!("{}.{}", prefix, name);
    match io.read_register(&key).await? {
        Some(raw) => Ok(decode(&raw)),
        None => Err(TransformerError::validation(
            io.device_id(),
            format!("unknown {} '{}'", what, name),
        )),
    }
}

/// Write `prefix.name` and echo the stored value.
pub async fn write_named(
    io: &mut DeviceIo,
    prefix: &str,
    what: &str,
    name: &str,
    value: Value,
) -> TransformerResult<Value> {
    check_name(io.device_id(), what, name)?;
    if value.is_null() {
        return Err(TransformerError::validation(
            io.device_id(),
            format!("{} '{}' cannot be set to null", what, name),
        ));
    }
    let key = format!("{}.{}", prefix, name);
    io.write_register(&key, &encode(&value)).await?;
    Ok(value)
}

/// Digital level as the devices spell it.
pub fn parse_level(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "high" => Some(true),
        "0" | "false" | "off" | "low" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let cases = vec![
            (json!(17), "17"),
            (json!(2.5), "2.5"),
            (json!(true), "true"),
            (json!("PICK_A"), "PICK_A"),
            (json!("lot 4"), "\"lot 4\""),
            (json!("17"), "\"17\""),
            (json!({"x": 1}), "{\"x\":1}"),
        ];
        for (value, raw) in cases {
            assert_eq!(encode(&value), raw);
            assert_eq!(decode(raw), value);
        }
        assert_eq!(decode("not json"), json!("not json"));
    }

    #[test]
    fn test_levels() {
        assert_eq!(parse_level("1"), Some(true));
        assert_eq!(parse_level(" OFF "), Some(false));
        assert_eq!(parse_level("2"), None);
    }

    #[test]
    fn test_names_must_be_single_tokens() {
        assert!(check_name("robot1", "variable", "speed").is_ok());
        assert!(check_name("robot1", "variable", "").is_err());
        assert!(check_name("robot1", "variable", "tool speed").is_err());
    }
}
