// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Routes external requests to device operations.
//!
//! Requests are validated before the registry is consulted, so a malformed
//! request never reaches an instance. Mutating operations take the target
//! device's mutation lock: one write or command per device at a time, any
//! number across devices.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::engine::{DeviceRegistry, TransformerInstance};
use crate::errors::{TransformerError, TransformerResult};
use crate::model::DeviceInfo;
use crate::transformers::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum DeviceOperation {
    ReadStatus,
    ReadVariable {
        name: String,
    },
    WriteVariable {
        name: String,
        value: Value,
    },
    ReadParameter {
        name: String,
    },
    WriteParameter {
        name: String,
        value: Value,
    },
    ExecuteCommand {
        name: String,
        #[serde(default)]
        args: Value,
    },
}

impl DeviceOperation {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceOperation::ReadStatus => "read_status",
            DeviceOperation::ReadVariable { .. } => "read_variable",
            DeviceOperation::WriteVariable { .. } => "write_variable",
            DeviceOperation::ReadParameter { .. } => "read_parameter",
            DeviceOperation::WriteParameter { .. } => "write_parameter",
            DeviceOperation::ExecuteCommand { .. } => "execute_command",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            DeviceOperation::WriteVariable { .. }
                | DeviceOperation::WriteParameter { .. }
                | DeviceOperation::ExecuteCommand { .. }
        )
    }
}

/// One inbound request. Transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub device_id: String,
    #[serde(flatten)]
    pub operation: DeviceOperation,
}

impl CommandRequest {
    pub fn new(device_id: &str, operation: DeviceOperation) -> Self {
        Self {
            device_id: device_id.to_string(),
            operation,
        }
    }
}

/// A request that passed validation.
enum Checked<'a> {
    ReadStatus,
    ReadVariable(&'a str),
    WriteVariable(&'a str, &'a Value),
    ReadParameter(&'a str),
    WriteParameter(&'a str, &'a Value),
    Execute(Command),
}

#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub async fn list_devices(&self) -> Vec<DeviceInfo> {
        self.registry.list().await
    }

    pub async fn dispatch(&self, request: &CommandRequest) -> TransformerResult<Value> {
        let checked = check(request)?;
        let instance = self.registry.lookup(&request.device_id).await.map_err(|_| {
            TransformerError::NotFound {
                device_id: request.device_id.clone(),
            }
        })?;

        tracing::debug!(
            device_id = %request.device_id,
            operation = request.operation.name(),
            "dispatching request"
        );

        if request.operation.is_mutating() {
            let _guard = instance.lock_mutations().await;
            run(&instance, checked).await
        } else {
            run(&instance, checked).await
        }
    }
}

async fn run(instance: &TransformerInstance, checked: Checked<'_>) -> TransformerResult<Value> {
    match checked {
        Checked::ReadStatus => {
            let snapshot = instance.read_status().await?;
            serde_json::to_value(&snapshot)
                .map_err(|e| TransformerError::protocol(instance.device_id(), e.to_string()))
        }
        Checked::ReadVariable(name) => instance.read_variable(name).await,
        Checked::WriteVariable(name, value) => instance.write_variable(name, value.clone()).await,
        Checked::ReadParameter(name) => instance.read_parameter(name).await,
        Checked::WriteParameter(name, value) => {
            instance.write_parameter(name, value.clone()).await
        }
        Checked::Execute(command) => instance.execute(command).await,
    }
}

fn check(request: &CommandRequest) -> TransformerResult<Checked<'_>> {
    let device_id = &request.device_id;
    check_token(device_id, "device id", device_id)?;

    let checked = match &request.operation {
        DeviceOperation::ReadStatus => Checked::ReadStatus,
        DeviceOperation::ReadVariable { name } => {
            check_token(device_id, "variable name", name)?;
            Checked::ReadVariable(name)
        }
        DeviceOperation::WriteVariable { name, value } => {
            check_token(device_id, "variable name", name)?;
            check_value(device_id, name, value)?;
            Checked::WriteVariable(name, value)
        }
        DeviceOperation::ReadParameter { name } => {
            check_token(device_id, "parameter name", name)?;
            Checked::ReadParameter(name)
        }
        DeviceOperation::WriteParameter { name, value } => {
            check_token(device_id, "parameter name", name)?;
            check_value(device_id, name, value)?;
            Checked::WriteParameter(name, value)
        }
        DeviceOperation::ExecuteCommand { name, args } => {
            let command = Command::parse(name, args)
                .map_err(|reason| TransformerError::validation(device_id, reason))?;
            Checked::Execute(command)
        }
    };
    Ok(checked)
}

fn check_token(device_id: &str, what: &str, token: &str) -> TransformerResult<()> {
    if token.is_empty() {
        return Err(TransformerError::validation(
            device_id,
            format!("{} cannot be empty", what),
        ));
    }
    if token.contains(char::is_whitespace) {
        return Err(TransformerError::validation(
            device_id,
            format!("{} '{}' contains whitespace", what, token),
        ));
    }
    Ok(())
}

fn check_value(device_id: &str, name: &str, value: &Value) -> TransformerResult<()> {
    if value.is_null() {
        return Err(TransformerError::validation(
            device_id,
            format!("value for '{}' is missing", name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::RecordingAdapter;
    use crate::adapters::AdapterCatalog;
    use crate::config::{AdapterConfig, DeviceConfig, MachineCatalog};
    use crate::errors::ErrorKind;
    use crate::traits::ProtocolAdapter;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn dispatcher_with_memory_robot() -> CommandDispatcher {
        let registry = DeviceRegistry::builder(
            MachineCatalog::new().with_model("ur10e", "RobotTransformer"),
        )
        .build();
        registry
            .register(
                &DeviceConfig::new("robot1", "ur10e")
                    .with_adapter(AdapterConfig::memory().with_register("robot.mode", "1")),
            )
            .await
            .unwrap();
        CommandDispatcher::new(registry)
    }

    #[tokio::test]
    async fn test_validation_happens_before_lookup() {
        let dispatcher = dispatcher_with_memory_robot().await;

        let cases = vec![
            CommandRequest::new("", DeviceOperation::ReadStatus),
            CommandRequest::new("ghost", DeviceOperation::ReadVariable { name: "".into() }),
            CommandRequest::new(
                "ghost",
                DeviceOperation::WriteVariable {
                    name: "speed".into(),
                    value: Value::Null,
                },
            ),
            CommandRequest::new(
                "ghost",
                DeviceOperation::WriteParameter {
                    name: "tool offset".into(),
                    value: json!(1),
                },
            ),
            CommandRequest::new(
                "ghost",
                DeviceOperation::ExecuteCommand {
                    name: "LOAD_PROGRAM".into(),
                    args: json!("PICK_A"),
                },
            ),
            CommandRequest::new(
                "ghost",
                DeviceOperation::ExecuteCommand {
                    name: "SET_DIGITAL_OUTPUT".into(),
                    args: json!({ "index": 1 }),
                },
            ),
        ];

        for request in cases {
            let err = dispatcher.dispatch(&request).await.unwrap_err();
            assert!(
                matches!(err, TransformerError::Validation { .. }),
                "{:?} gave {:?}",
                request,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let dispatcher = dispatcher_with_memory_robot().await;
        let err = dispatcher
            .dispatch(&CommandRequest::new("ghost", DeviceOperation::ReadStatus))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransformerError::NotFound {
                device_id: "ghost".into()
            }
        );
        assert_eq!(dispatcher.list_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_routes_each_operation() {
        let dispatcher = dispatcher_with_memory_robot().await;

        let status = dispatcher
            .dispatch(&CommandRequest::new("robot1", DeviceOperation::ReadStatus))
            .await
            .unwrap();
        assert_eq!(status["code"], json!("RUNNING"));

        dispatcher
            .dispatch(&CommandRequest::new(
                "robot1",
                DeviceOperation::WriteParameter {
                    name: "payload_kg".into(),
                    value: json!(4.5),
                },
            ))
            .await
            .unwrap();
        let value = dispatcher
            .dispatch(&CommandRequest::new(
                "robot1",
                DeviceOperation::ReadParameter {
                    name: "payload_kg".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(value, json!(4.5));

        let err = dispatcher
            .dispatch(&CommandRequest::new(
                "robot1",
                DeviceOperation::ExecuteCommand {
                    name: "OPEN_GRIPPER".into(),
                    args: json!({}),
                },
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCommand);
    }

    #[test]
    fn test_request_wire_shape() {
        let request: CommandRequest = serde_json::from_value(json!({
            "device_id": "plc1",
            "operation": "execute_command",
            "name": "SET_DIGITAL_OUTPUT",
            "args": { "index": 2, "value": true }
        }))
        .unwrap();
        assert_eq!(request.device_id, "plc1");
        assert!(request.operation.is_mutating());

        let request: CommandRequest =
            serde_json::from_value(json!({ "device_id": "plc1", "operation": "read_status" }))
                .unwrap();
        assert_eq!(request.operation, DeviceOperation::ReadStatus);
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_serialized() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut adapters = AdapterCatalog::with_builtin();
        let shared = log.clone();
        adapters.register(
            "recording",
            Arc::new(move |_: &AdapterConfig, _| {
                Ok(Box::new(RecordingAdapter::new(shared.clone(), Duration::from_millis(10)))
                    as Box<dyn ProtocolAdapter>)
            }),
        );
        let registry = DeviceRegistry::builder(
            MachineCatalog::new().with_model("ur10e", "RobotTransformer"),
        )
        .adapters(adapters)
        .build();
        let mut recording = AdapterConfig::memory();
        recording.protocol = "recording".into();
        registry
            .register(&DeviceConfig::new("robot1", "ur10e").with_adapter(recording))
            .await
            .unwrap();
        let dispatcher = CommandDispatcher::new(registry);

        let writes = (0..5).map(|n| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(&CommandRequest::new(
                        "robot1",
                        DeviceOperation::WriteVariable {
                            name: "target".into(),
                            value: json!(n),
                        },
                    ))
                    .await
            })
        });
        for write in writes.collect::<Vec<_>>() {
            write.await.unwrap().unwrap();
        }

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries.len(), 10);
        for pair in entries.chunks(2) {
            assert_eq!(
                pair[0].strip_prefix("begin "),
                pair[1].strip_prefix("end "),
                "interleaved: {:?}",
                entries
            );
        }
    }
}
