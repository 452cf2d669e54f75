//! End-to-end scenario tests wiring the orchestrator, a protocol manager,
//! and the port manager together.
//!
//! Wire-level and single-module scenarios live beside the code they
//! exercise instead of here: Modbus register encoding and fault-code purity
//! are covered by `test_encode_temperature_sensor` /
//! `test_encode_motor_drive_fault_code` in `src/protocol/modbus.rs`, and
//! OPC-UA address-space node naming by `test_parameter_nodes_cnc` /
//! `test_field_for_node_mapping` in `src/protocol/opcua.rs` — both need no
//! live protocol client to verify the behavior they target. This file
//! covers the two scenarios that only make sense once several collaborators
//! are wired together: port-plan validation against a shared pool, and
//! orchestrator-level health bucketing across a device fleet.

use std::collections::HashMap;

use protocol_sim_engine::config::{
    DeviceGroupConfig, FacilityConfig, IndustrialProtocolsConfig, ModbusTcpConfig, NetworkConfig,
    PortRange, SimulationConfig, SimulationOptions,
};
use protocol_sim_engine::orchestrator::Orchestrator;
use protocol_sim_engine::types::HealthBucket;

fn config_with_devices(port_start: u16, port_end: u16, count: u32) -> SimulationConfig {
    let mut port_ranges = HashMap::new();
    port_ranges.insert("modbus".to_string(), PortRange { start: port_start, end: port_end });

    let mut devices = HashMap::new();
    devices.insert(
        "temperature_sensors".to_string(),
        DeviceGroupConfig {
            template: "temperature_sensor".into(),
            count,
            update_interval: 0.05,
            port_start: None,
            base_topic: None,
            qos: 0,
            retain: false,
            data: HashMap::new(),
        },
    );

    SimulationConfig {
        facility: FacilityConfig {
            name: "Test Facility".into(),
            description: None,
            location: None,
            shift_schedule: None,
        },
        simulation: SimulationOptions::default(),
        network: NetworkConfig {
            base_ip: "127.0.0.1".into(),
            port_ranges,
        },
        industrial_protocols: IndustrialProtocolsConfig {
            modbus_tcp: Some(ModbusTcpConfig {
                enabled: true,
                devices,
            }),
            mqtt: None,
            opcua: None,
        },
    }
}

/// S3: a pool with 5 ports rejects a plan asking for 6 total ports without
/// mutating state, and accepts (and then successfully allocates) a plan
/// asking for exactly 5.
#[tokio::test]
async fn scenario_port_plan_validation() {
    let pm = protocol_sim_engine::port_manager::PortManager::from_network_config(&NetworkConfig {
        base_ip: "0.0.0.0".into(),
        port_ranges: HashMap::new(),
    });
    let mut pools = HashMap::new();
    pools.insert("modbus".to_string(), (5020u16, 5024u16));
    pm.init_pools(pools).await;

    let mut too_big = HashMap::new();
    too_big.insert("a".to_string(), ("modbus".to_string(), 1u16));
    too_big.insert("b".to_string(), ("modbus".to_string(), 2u16));
    too_big.insert("c".to_string(), ("modbus".to_string(), 3u16));
    assert!(!pm.validate_plan(&too_big).await);
    assert_eq!(pm.utilization().await["modbus"].used, 0);

    let mut fits = HashMap::new();
    fits.insert("a".to_string(), ("modbus".to_string(), 1u16));
    fits.insert("b".to_string(), ("modbus".to_string(), 2u16));
    fits.insert("c".to_string(), ("modbus".to_string(), 2u16));
    assert!(pm.validate_plan(&fits).await);

    for (id, (_, count)) in &fits {
        pm.allocate("modbus", id, *count, None).await.unwrap();
    }
    assert_eq!(pm.utilization().await["modbus"].used, 5);
}

/// S6: orchestrator-level health bucketing across a 20-device fleet.
/// 19/20 running is healthy (95%), 18/20 is degraded (90%), and 16/20 is
/// still degraded at the 80% boundary while 15/20 crosses into unhealthy.
#[tokio::test]
async fn scenario_orchestrator_health_bucketing() {
    let config = config_with_devices(15_100, 15_200, 20);
    let mut orchestrator = Orchestrator::new(config);
    orchestrator.init().await.expect("orchestrator init");
    let started = orchestrator.start_all().await.expect("start_all");
    assert!(started);

    assert_eq!(orchestrator.device_count().await, 20);
    assert_eq!(orchestrator.health_status().await.status, HealthBucket::Healthy);

    let mut ids: Vec<String> = orchestrator
        .all_devices()
        .await
        .into_iter()
        .map(|d| d.device_id)
        .collect();
    ids.sort();
    assert_eq!(ids.len(), 20);

    // Kill one device: 19/20 = 95% -> still healthy.
    orchestrator.stop_device(&ids[0]).await.expect("stop device 0");
    assert_eq!(orchestrator.health_status().await.status, HealthBucket::Healthy);

    // Kill a second: 18/20 = 90% -> degraded.
    orchestrator.stop_device(&ids[1]).await.expect("stop device 1");
    assert_eq!(orchestrator.health_status().await.status, HealthBucket::Degraded);

    // Kill two more: 16/20 = 80%, the boundary -> still degraded.
    orchestrator.stop_device(&ids[2]).await.expect("stop device 2");
    orchestrator.stop_device(&ids[3]).await.expect("stop device 3");
    assert_eq!(orchestrator.health_status().await.status, HealthBucket::Degraded);

    // Kill one more: 15/20 = 75% -> unhealthy.
    orchestrator.stop_device(&ids[4]).await.expect("stop device 4");
    assert_eq!(orchestrator.health_status().await.status, HealthBucket::Unhealthy);

    orchestrator.stop_all().await;
}
