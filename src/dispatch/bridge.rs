// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Bridge messages from transports that cannot speak REST.
//!
//! A bridge message is `{type, endpoint, body}` with a REST-like verb and
//! path. It is translated into a `CommandRequest` (or a device listing) and
//! answered with `{status, body}` using HTTP status conventions.
//!
//! | verb  | endpoint                          | operation          |
//! |-------|-----------------------------------|--------------------|
//! | GET   | `/devices`                        | device listing     |
//! | GET   | `/devices/{id}/status`            | `read_status`      |
//! | GET   | `/devices/{id}/variables/{name}`  | `read_variable`    |
//! | PATCH | `/devices/{id}/variables/{name}`  | `write_variable`   |
//! | GET   | `/devices/{id}/parameters/{name}` | `read_parameter`   |
//! | PATCH | `/devices/{id}/parameters/{name}` | `write_parameter`  |
//! | POST  | `/devices/{id}/commands/{name}`   | `execute_command`  |
//! | POST  | `/devices/{id}/commands`          | `execute_command`  |
//!
//! Anything before `/devices` in the endpoint (an API prefix) is ignored.
//! PATCH bodies are either `{"value": v}` or the bare value.
//!
//! A message may carry an `id`, which is echoed on its reply. [`Bridge::serve`]
//! answers messages concurrently, so replies on a stream can arrive in a
//! different order than the messages that caused them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::dispatcher::{CommandDispatcher, CommandRequest, DeviceOperation};
use crate::errors::{ErrorKind, TransformerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BridgeMethod {
    Get,
    Patch,
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    /// Caller correlation token, returned unchanged on the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(rename = "type")]
    pub method: BridgeMethod,
    pub endpoint: String,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub status: u16,
    pub body: Value,
}

impl BridgeReply {
    fn ok(body: Value) -> Self {
        Self {
            id: None,
            status: 200,
            body,
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            id: None,
            status,
            body: json!({ "error": message.into() }),
        }
    }

    fn from_error(error: &TransformerError) -> Self {
        let status = match (error, error.kind()) {
            (TransformerError::NotFound { .. }, _) => 404,
            (_, ErrorKind::Validation) => 400,
            (_, ErrorKind::UnsupportedCommand) => 501,
            (_, ErrorKind::RecoveryExhausted) => 409,
            (_, ErrorKind::Connection) => 503,
            (_, ErrorKind::Internal) => 500,
        };
        Self {
            id: None,
            status,
            body: json!({ "error": error.to_string(), "device_id": error.device_id() }),
        }
    }
}

enum Route {
    List,
    Device(CommandRequest),
}

#[derive(Clone)]
pub struct Bridge {
    dispatcher: CommandDispatcher,
}

impl Bridge {
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn handle(&self, message: &BridgeMessage) -> BridgeReply {
        BridgeReply {
            id: message.id.clone(),
            ..self.answer(message).await
        }
    }

    async fn answer(&self, message: &BridgeMessage) -> BridgeReply {
        let route = match route(message) {
            Ok(route) => route,
            Err(reply) => return reply,
        };

        match route {
            Route::List => match serde_json::to_value(self.dispatcher.list_devices().await) {
                Ok(devices) => BridgeReply::ok(devices),
                Err(e) => BridgeReply::error(500, e.to_string()),
            },
            Route::Device(request) => match self.dispatcher.dispatch(&request).await {
                Ok(body) => BridgeReply::ok(body),
                Err(error) => BridgeReply::from_error(&error),
            },
        }
    }

    /// Parse a JSON bridge message, handle it, and serialize the reply.
    pub async fn handle_json(&self, text: &str) -> String {
        let reply = match serde_json::from_str::<BridgeMessage>(text) {
            Ok(message) => self.handle(&message).await,
            Err(e) => BridgeReply::error(400, format!("malformed bridge message: {}", e)),
        };
        serde_json::to_string(&reply)
            .unwrap_or_else(|_| r#"{"status":500,"body":null}"#.to_string())
    }

    /// Answer one JSON message per input line until the input closes and
    /// every reply has been written.
    ///
    /// Each message runs in its own task, so a device that is slow to answer
    /// does not hold up messages for other devices. Replies are written one
    /// per line as they complete, in completion order; callers match them up
    /// by `id`.
    pub async fn serve<R, W>(self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (replies, mut outbox) = mpsc::unbounded_channel::<String>();
        let mut lines = input.lines();
        let mut reading = true;
        let mut in_flight = JoinSet::new();

        loop {
            if !reading && in_flight.is_empty() {
                break;
            }
            tokio::select! {
                line = lines.next_line(), if reading => match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let bridge = self.clone();
                        let replies = replies.clone();
                        in_flight.spawn(async move {
                            let _ = replies.send(bridge.handle_json(&line).await);
                        });
                    }
                    None => reading = false,
                },
                Some(reply) = outbox.recv() => write_line(&mut output, &reply).await?,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // Every task has finished, so its reply is already queued
        while let Ok(reply) = outbox.try_recv() {
            write_line(&mut output, &reply).await?;
        }
        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> std::io::Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

fn route(message: &BridgeMessage) -> Result<Route, BridgeReply> {
    let path = match message.endpoint.find("/devices") {
        Some(start) => &message.endpoint[start..],
        None => return Err(not_found(&message.endpoint)),
    };
    let segments: Vec<&str> = path
        .split('?')
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    use BridgeMethod::*;
    let operation = match (message.method, segments.as_slice()) {
        (Get, ["devices"]) => return Ok(Route::List),
        (Get, ["devices", _, "status"]) => DeviceOperation::ReadStatus,
        (Get, ["devices", _, "variables", name]) => DeviceOperation::ReadVariable {
            name: name.to_string(),
        },
        (Patch, ["devices", _, "variables", name]) => DeviceOperation::WriteVariable {
            name: name.to_string(),
            value: patch_value(&message.body),
        },
        (Get, ["devices", _, "parameters", name]) => DeviceOperation::ReadParameter {
            name: name.to_string(),
        },
        (Patch, ["devices", _, "parameters", name]) => DeviceOperation::WriteParameter {
            name: name.to_string(),
            value: patch_value(&message.body),
        },
        (Post, ["devices", _, "commands", name]) => DeviceOperation::ExecuteCommand {
            name: name.to_string(),
            args: message.body.clone(),
        },
        (Post, ["devices", _, "commands"]) => {
            let name = message
                .body
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| BridgeReply::error(400, "body must name a 'command'"))?;
            DeviceOperation::ExecuteCommand {
                name: name.to_string(),
                args: message.body.get("args").cloned().unwrap_or(Value::Null),
            }
        }
        (_, ["devices", ..]) => {
            return Err(BridgeReply::error(
                405,
                format!("{:?} is not allowed on {}", message.method, message.endpoint),
            ))
        }
        _ => return Err(not_found(&message.endpoint)),
    };

    Ok(Route::Device(CommandRequest::new(segments[1], operation)))
}

fn patch_value(body: &Value) -> Value {
    match body {
        Value::Object(map) if map.len() == 1 && map.contains_key("value") => map["value"].clone(),
        other => other.clone(),
    }
}

fn not_found(endpoint: &str) -> BridgeReply {
    BridgeReply::error(404, format!("no route for '{}'", endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::HangingAdapter;
    use crate::adapters::AdapterCatalog;
    use crate::config::{AdapterConfig, DeviceConfig, MachineCatalog, RuntimeOptions};
    use crate::engine::DeviceRegistry;
    use crate::traits::ProtocolAdapter;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, split, BufReader};
    use tokio::time::timeout;

    async fn bridge() -> Bridge {
        let registry = DeviceRegistry::builder(
            MachineCatalog::new()
                .with_model("ur10e", "RobotTransformer")
                .with_model("s7-1500", "PlcTransformer"),
        )
        .build();
        registry
            .register(
                &DeviceConfig::new("robot1", "ur10e")
                    .with_adapter(AdapterConfig::memory().with_register("robot.mode", "0")),
            )
            .await
            .unwrap();
        registry
            .register(
                &DeviceConfig::new("plc1", "s7-1500")
                    .with_adapter(AdapterConfig::memory().with_register("di.0", "1")),
            )
            .await
            .unwrap();
        Bridge::new(CommandDispatcher::new(registry))
    }

    fn message(method: BridgeMethod, endpoint: &str, body: Value) -> BridgeMessage {
        BridgeMessage {
            id: None,
            method,
            endpoint: endpoint.to_string(),
            body,
        }
    }

    #[tokio::test]
    async fn test_routes_and_statuses() {
        let bridge = bridge().await;

        let cases = vec![
            (message(BridgeMethod::Get, "/devices", Value::Null), 200),
            (message(BridgeMethod::Get, "/api/v1/devices/robot1/status", Value::Null), 200),
            (
                message(BridgeMethod::Patch, "/devices/robot1/variables/speed", json!({ "value": 80 })),
                200,
            ),
            (message(BridgeMethod::Get, "/devices/robot1/variables/speed", Value::Null), 200),
            (message(BridgeMethod::Get, "/devices/robot1/variables/unset", Value::Null), 400),
            (message(BridgeMethod::Get, "/devices/ghost/status", Value::Null), 404),
            (message(BridgeMethod::Post, "/devices/plc1/commands/RESTART", json!({})), 501),
            (
                message(
                    BridgeMethod::Post,
                    "/devices/plc1/commands",
                    json!({ "command": "READ_DIGITAL_INPUT", "args": { "index": 0 } }),
                ),
                200,
            ),
            (message(BridgeMethod::Post, "/devices/plc1/commands", json!({})), 400),
            (message(BridgeMethod::Post, "/devices/plc1/status", Value::Null), 405),
            (message(BridgeMethod::Get, "/machines", Value::Null), 404),
        ];

        for (msg, status) in cases {
            let reply = bridge.handle(&msg).await;
            assert_eq!(reply.status, status, "{:?} -> {:?}", msg, reply);
        }
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let bridge = bridge().await;

        let reply = bridge
            .handle_json(r#"{"type":"GET","endpoint":"/devices/robot1/status"}"#)
            .await;
        let reply: BridgeReply = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["code"], json!("IDLE"));

        let reply = bridge.handle_json(r#"{"type":"DELETE","endpoint":"/devices"}"#).await;
        let reply: BridgeReply = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply.status, 400);
    }

    #[tokio::test]
    async fn test_listing_shape() {
        let bridge = bridge().await;
        let reply = bridge.handle(&message(BridgeMethod::Get, "/devices", Value::Null)).await;

        let devices = reply.body.as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["device_id"], json!("plc1"));
        assert_eq!(devices[0]["transformer"], json!("PlcTransformer"));
        assert_eq!(devices[1]["device_id"], json!("robot1"));
    }

    #[tokio::test]
    async fn test_reply_echoes_message_id() {
        let bridge = bridge().await;

        let reply = bridge
            .handle_json(r#"{"id":"req-7","type":"GET","endpoint":"/devices/ghost/status"}"#)
            .await;
        let reply: BridgeReply = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply.id, Some(json!("req-7")));
        assert_eq!(reply.status, 404);

        let reply = bridge
            .handle_json(r#"{"type":"GET","endpoint":"/devices"}"#)
            .await;
        assert!(!reply.contains(r#""id""#), "{}", reply);
    }

    #[tokio::test]
    async fn test_serve_does_not_queue_behind_a_stalled_device() {
        let mut adapters = AdapterCatalog::with_builtin();
        adapters.register(
            "hanging",
            Arc::new(|_: &AdapterConfig, _| {
                Ok(Box::new(HangingAdapter::new(Arc::new(AtomicBool::new(false))))
                    as Box<dyn ProtocolAdapter>)
            }),
        );
        let registry = DeviceRegistry::builder(
            MachineCatalog::new().with_model("ur10e", "RobotTransformer"),
        )
        .options(RuntimeOptions {
            call_timeout_ms: 100,
            ..RuntimeOptions::default()
        })
        .adapters(adapters)
        .build();
        let mut hanging = AdapterConfig::memory();
        hanging.protocol = "hanging".into();
        registry
            .register(&DeviceConfig::new("stalled", "ur10e").with_adapter(hanging))
            .await
            .unwrap();
        registry
            .register(
                &DeviceConfig::new("robot1", "ur10e")
                    .with_adapter(AdapterConfig::memory().with_register("robot.mode", "0")),
            )
            .await
            .unwrap();
        let bridge = Bridge::new(CommandDispatcher::new(registry.clone()));

        let (client, server) = duplex(4096);
        let (server_read, server_write) = split(server);
        let serving = tokio::spawn(bridge.serve(BufReader::new(server_read), server_write));

        let (client_read, mut client_write) = split(client);
        let mut replies = BufReader::new(client_read).lines();
        client_write
            .write_all(
                concat!(
                    r#"{"id":1,"type":"GET","endpoint":"/devices/stalled/status"}"#,
                    "\n\n",
                    r#"{"id":2,"type":"GET","endpoint":"/devices/robot1/status"}"#,
                    "\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        // The stalled call holds on until its deadline; robot1 answers first
        let first = timeout(Duration::from_millis(400), replies.next_line())
            .await
            .expect("robot1 reply waited on the stalled device")
            .unwrap()
            .unwrap();
        let first: BridgeReply = serde_json::from_str(&first).unwrap();
        assert_eq!(first.id, Some(json!(2)));
        assert_eq!(first.status, 200);

        client_write.shutdown().await.unwrap();
        let second = timeout(Duration::from_secs(5), replies.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let second: BridgeReply = serde_json::from_str(&second).unwrap();
        assert_eq!(second.id, Some(json!(1)));
        assert_eq!(second.status, 503);

        timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        registry.unregister_all().await;
    }
}
