// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

#[cfg(test)]
mod integration_tests {
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::Builder;
    use tokio::time::timeout;

    use crate::config::{
        load_and_validate_config, load_config, AdapterConfig, DeviceConfig, ReducerConfig,
        RuntimeBuilder,
    };
    use crate::dispatch::{CommandRequest, DeviceOperation};
    use crate::engine::FnReducer;
    use crate::errors::{ConfigError, ConfigLoadError, RegistryError};
    use crate::model::{Aggregate, Health, MemberStatus};

    const PACKAGING_CELL: &str = "configs/packaging-cell.yaml";
    const SINGLE_ROBOT: &str = "configs/single-robot.toml";

    /// Test that the packaging cell YAML loads with every section populated
    #[test]
    fn test_packaging_cell_yaml_loading() {
        let config = load_and_validate_config(PACKAGING_CELL).unwrap();

        assert_eq!(config.runtime.call_timeout_ms, 1000);
        assert_eq!(config.runtime.reconnect.max_attempts, 4);
        assert_eq!(config.machine_models.len(), 3);
        assert_eq!(config.transformers.len(), 3);
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.devices[0].id, "robot1");
        assert_eq!(config.devices[0].adapters[0].initial["robot.program"], "PICK_A");
        assert_eq!(config.devices[0].options["generic_commands"], json!(["HOME"]));

        let cell = &config.devices[2];
        assert!(cell.primary);
        let workcell = cell.workcell.as_ref().unwrap();
        assert_eq!(workcell.members, vec!["robot1", "plc1"]);
        assert_eq!(
            workcell.reducer,
            ReducerConfig::Priority(vec!["plc1".into(), "robot1".into()])
        );
        assert_eq!(workcell.failure_threshold, 2);
        assert_eq!(workcell.poll_interval_ms, Some(100));
        assert!(workcell.auto_clear_alarms);

        let indicator = workcell.indicator.as_ref().unwrap();
        assert_eq!(indicator.device, "plc1");
        assert_eq!(indicator.outputs.len(), 4);
        let red = &indicator.outputs[&Health::Fault];
        assert_eq!((red[2].index, red[2].value), (13, true));
    }

    /// Test that a TOML document is picked by its extension
    #[test]
    fn test_single_robot_toml_loading() {
        let config = load_and_validate_config(SINGLE_ROBOT).unwrap();

        assert_eq!(config.runtime.poll_interval_ms, 100);
        assert_eq!(config.devices.len(), 1);
        assert!(config.devices[0].primary);
        assert_eq!(config.devices[0].adapters[0].protocol, "memory");
        assert_eq!(config.devices[0].adapters[0].initial["robot.mode"], "IDLE");
    }

    /// Test that validation reports every problem in one pass
    #[test]
    fn test_invalid_document_reports_all_errors() {
        let yaml = r#"
machine_models:
  - id: ur10e
    transformer: robot
transformers:
  - id: robot
    entry_point: RobotTransformer
devices:
  - id: robot1
    machine_model: ur10e
    primary: true
  - id: robot1
    machine_model: ur10e
  - id: robot2
    machine_model: kr16
    primary: true
"#;
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        assert!(load_config(file.path()).is_ok());
        match load_and_validate_config(file.path()) {
            Err(ConfigLoadError::Invalid(errors)) => {
                assert_eq!(errors.len(), 3, "{:?}", errors);
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ConfigError::DuplicateDeviceId { .. })));
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ConfigError::MultiplePrimaries { .. })));
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ConfigError::UnknownMachineModel { .. })));
            }
            other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
        }
    }

    /// Test the packaging cell end to end: polling, events, dispatch, shutdown
    #[tokio::test]
    async fn test_packaging_cell_runtime() {
        let config = load_and_validate_config(PACKAGING_CELL).unwrap();
        let mut runtime = RuntimeBuilder::from_config(config).start().await.unwrap();
        let mut events = runtime.take_events().unwrap();
        assert!(runtime.take_events().is_none());
        assert_eq!(runtime.polled_devices(), vec!["cell1", "robot1", "plc1"]);

        // Members start Unknown until their first poll lands
        let settled = timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if event.computed_status == Health::Ok {
                    return event;
                }
            }
            panic!("event stream closed");
        })
        .await
        .expect("workcell never reported OK");
        assert_eq!(settled.workcell_id, "cell1");

        let listing = runtime.dispatcher().list_devices().await;
        let ids: Vec<&str> = listing.iter().map(|d| d.device.device_id.as_str()).collect();
        assert_eq!(ids, vec!["cell1", "plc1", "robot1"]);

        let program = runtime
            .dispatcher()
            .dispatch(&CommandRequest::new(
                "robot1",
                DeviceOperation::ExecuteCommand {
                    name: "LOAD_PROGRAM".into(),
                    args: json!({ "program": "PLACE_B" }),
                },
            ))
            .await
            .unwrap();
        assert_eq!(program["program"], json!("PLACE_B"));

        let reply = runtime
            .bridge()
            .handle_json(r#"{"type":"GET","endpoint":"/devices/cell1/variables/phase"}"#)
            .await;
        assert!(reply.contains(r#""status":200"#), "{}", reply);

        assert!(runtime.poll_counts().unwrap().ticks >= 1);
        assert!(runtime.shutdown().await.is_empty());
    }

    /// Test that a failed registration tears down what was already started
    #[tokio::test]
    async fn test_start_failure_unwinds_registrations() {
        let mut config = load_and_validate_config(SINGLE_ROBOT).unwrap();
        let mut modbus = AdapterConfig::memory();
        modbus.protocol = "modbus".into();
        config
            .devices
            .push(DeviceConfig::new("robot2", "ur10e").with_adapter(modbus));

        match RuntimeBuilder::from_config(config).start().await {
            Err(RegistryError::AdapterUnavailable { device_id, .. }) => {
                assert_eq!(device_id, "robot2")
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("runtime started with an unknown protocol"),
        }
    }

    /// Test that a caller-supplied reducer replaces the configured one
    #[tokio::test]
    async fn test_custom_reducer_override() {
        let config = load_and_validate_config(PACKAGING_CELL).unwrap();
        let any_ok = FnReducer::new("any_ok", |members: &[MemberStatus]| {
            if members.iter().any(|m| m.health == Health::Ok) {
                Aggregate::at(Health::Ok, members)
            } else {
                Aggregate::at(Health::Fault, &[])
            }
        });

        let runtime = RuntimeBuilder::from_config(config)
            .with_reducer("cell1", Arc::new(any_ok))
            .start()
            .await
            .unwrap();

        let reducer = runtime
            .dispatcher()
            .dispatch(&CommandRequest::new(
                "cell1",
                DeviceOperation::ReadParameter {
                    name: "reducer".into(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(reducer, json!("any_ok"));

        assert!(runtime.shutdown().await.is_empty());
    }
}
