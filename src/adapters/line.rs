// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! ASCII request/reply lines spoken to register-style equipment.
//!
//! Requests: `READ <key>`, `WRITE <key> <value>`, `PING`.
//! Replies: `VAL <value>`, `OK`, `PONG`, `ERR <reason>`.
//! Keys never contain whitespace; a written value is the rest of the line.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRequest {
    Read(String),
    Write(String, String),
    Ping,
}

impl LineRequest {
    pub fn read(key: impl Into<String>) -> Self {
        LineRequest::Read(key.into())
    }

    pub fn write(key: impl Into<String>, value: impl Into<String>) -> Self {
        LineRequest::Write(key.into(), value.into())
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("request is not UTF-8: {}", e))?;
        let text = text.trim_end_matches(['\r', '\n']);
        let mut parts = text.splitn(3, ' ');

        match (parts.next(), parts.next(), parts.next()) {
            (Some("PING"), None, None) => Ok(LineRequest::Ping),
            (Some("READ"), Some(key), None) if !key.is_empty() => Ok(LineRequest::read(key)),
            (Some("WRITE"), Some(key), Some(value)) if !key.is_empty() => {
                Ok(LineRequest::write(key, value))
            }
            _ => Err(format!("malformed request '{}'", text)),
        }
    }
}

impl fmt::Display for LineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineRequest::Read(key) => write!(f, "READ {}", key),
            LineRequest::Write(key, value) => write!(f, "WRITE {} {}", key, value),
            LineRequest::Ping => f.write_str("PING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineReply {
    Value(String),
    Ok,
    Pong,
    Err(String),
}

impl LineReply {
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a reply whose framing has already been removed.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text == "OK" {
            return Ok(LineReply::Ok);
        }
        if text == "PONG" {
            return Ok(LineReply::Pong);
        }
        if let Some(value) = text.strip_prefix("VAL ") {
            return Ok(LineReply::Value(value.to_string()));
        }
        if text == "VAL" {
            return Ok(LineReply::Value(String::new()));
        }
        if let Some(reason) = text.strip_prefix("ERR") {
            return Ok(LineReply::Err(reason.trim().to_string()));
        }
        Err(format!("unrecognised reply '{}'", text))
    }
}

impl fmt::Display for LineReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineReply::Value(value) => write!(f, "VAL {}", value),
            LineReply::Ok => f.write_str("OK"),
            LineReply::Pong => f.write_str("PONG"),
            LineReply::Err(reason) => write!(f, "ERR {}", reason),
        }
    }
}
