//! OPC-UA server device.
//!
//! Builds the `Objects/DeviceSet/<device_id>` address space described in the
//! specification (§4.3.2), backed by `async-opcua`'s server feature.
//! Security policy is `None` with anonymous access, matching the original
//! simulator's freeopcua-based server.

use std::sync::Arc;

use opcua::server::address_space::{AddressSpace, Variable};
use opcua::server::ServerBuilder;
use opcua::server::ServerEndpoint;
use opcua::server::Server as OpcuaServer;
use opcua::types::{DataTypeId, NodeId, Variant};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::DeviceGroupConfig;
use crate::error::{Result, SimError};
use crate::generator::Generator;
use crate::protocol::{DeviceStatus, ProtocolDevice};
use crate::types::{now_ms, DeviceType, FieldValue, HealthRecord, Snapshot, SystemClock};

/// Parameter nodes per device type, as `(node name, snapshot field key)`
/// pairs, matching `opcua_simulator.py`'s `_build_{cnc,plc,robot}_nodes`.
/// Node names and snapshot keys diverge in ways a mechanical CamelCase-to-
/// snake-case conversion can't recover (acronyms like `TCP`, and nodes that
/// already contain an underscore like `AxisPosition_X`), so the mapping is
/// spelled out explicitly here rather than derived.
fn parameter_nodes(device_type: DeviceType, joint_count: usize) -> Vec<(&'static str, &'static str)> {
    match device_type {
        DeviceType::CncMachine => vec![
            ("SpindleSpeed", "spindle_speed"),
            ("FeedRate", "feed_rate"),
            ("ToolWearPercent", "tool_wear_percent"),
            ("PartCount", "part_count"),
            ("AxisPosition_X", "axis_position_x"),
            ("AxisPosition_Y", "axis_position_y"),
            ("AxisPosition_Z", "axis_position_z"),
            ("ProgramName", "program_name"),
            ("MachineState", "machine_state"),
        ],
        DeviceType::PlcController => vec![
            ("ProcessValue", "process_value"),
            ("Setpoint", "setpoint"),
            ("ControlOutput", "control_output"),
            ("Mode", "mode"),
            ("HighAlarm", "high_alarm"),
            ("LowAlarm", "low_alarm"),
            ("IntegralTerm", "integral_term"),
            ("DerivativeTerm", "derivative_term"),
            ("Error", "error"),
        ],
        DeviceType::IndustrialRobot => {
            // joint angles are written dynamically below; named nodes here
            // cover the fixed fields only.
            let _ = joint_count;
            vec![
                ("TCPPosition_X", "tcp_position_x"),
                ("TCPPosition_Y", "tcp_position_y"),
                ("TCPPosition_Z", "tcp_position_z"),
                ("TCPOrientation_Rx", "tcp_orientation_rx"),
                ("TCPOrientation_Ry", "tcp_orientation_ry"),
                ("TCPOrientation_Rz", "tcp_orientation_rz"),
                ("ProgramState", "program_state"),
                ("CycleTime", "cycle_time"),
                ("CycleCount", "cycle_count"),
                ("PayloadKg", "payload_kg"),
                ("SpeedPercent", "speed_percent"),
            ]
        }
        _ => vec![("Temperature", "temperature"), ("Humidity", "humidity")],
    }
}

fn variant_for(value: &FieldValue) -> Variant {
    match value {
        FieldValue::Float(v) => Variant::Double(*v),
        FieldValue::Int(v) => Variant::Int32(*v as i32),
        FieldValue::Bool(v) => Variant::Boolean(*v),
        FieldValue::Text(v) => Variant::from(v.as_str()),
        FieldValue::Vector(v) => Variant::from(v.iter().map(|f| Variant::Double(*f)).collect::<Vec<_>>()),
    }
}

/// One simulated device exposed as an OPC-UA server.
pub struct OpcuaDevice {
    device_id: String,
    device_type: DeviceType,
    port: u16,
    application_uri: String,
    update_interval_s: f64,
    joint_count: usize,
    group: DeviceGroupConfig,
    address_space: Arc<RwLock<AddressSpace>>,
    cached_snapshot: Arc<RwLock<Option<Snapshot>>>,
    health: Arc<RwLock<HealthRecord>>,
    server_handle: RwLock<Option<JoinHandle<()>>>,
    ticker_handle: RwLock<Option<JoinHandle<()>>>,
}

impl OpcuaDevice {
    pub fn new(
        device_id: impl Into<String>,
        device_type: DeviceType,
        port: u16,
        application_uri: String,
        group: DeviceGroupConfig,
    ) -> Self {
        let device_id = device_id.into();
        let joint_count = group.data.get("joint_count").and_then(|v| v.as_u64()).unwrap_or(6) as usize;
        Self {
            health: Arc::new(RwLock::new(HealthRecord::new(device_id.clone()))),
            update_interval_s: group.update_interval,
            device_id,
            device_type,
            port,
            application_uri,
            joint_count,
            group,
            address_space: Arc::new(RwLock::new(AddressSpace::new())),
            cached_snapshot: Arc::new(RwLock::new(None)),
            server_handle: RwLock::new(None),
            ticker_handle: RwLock::new(None),
        }
    }

    /// Builds `Objects/DeviceSet/<device_id>/{Identification,Parameters,Status}`
    /// under the address space, registering every writable node.
    async fn build_address_space(&self) {
        let ns = format!("urn:protocol-sim-engine:{}", self.device_id);
        let mut space = self.address_space.write().await;
        let device_folder = space.add_folder_under_device_set(&ns, &self.device_id);

        let identification = space.add_folder(&device_folder, "Identification");
        space.add_variable(&identification, "Manufacturer", Variant::from("protocol-sim-engine"));
        space.add_variable(&identification, "Model", Variant::from(self.device_type.as_str()));
        space.add_variable(&identification, "SerialNumber", Variant::from(self.device_id.as_str()));

        let parameters = space.add_folder(&device_folder, "Parameters");
        for (node, _) in parameter_nodes(self.device_type, self.joint_count) {
            space.add_writable_variable(&parameters, node, Variant::Double(0.0));
        }
        if matches!(self.device_type, DeviceType::IndustrialRobot) {
            for i in 1..=self.joint_count {
                space.add_writable_variable(&parameters, &format!("JointAngle_{i}"), Variant::Double(0.0));
            }
        }

        let status = space.add_folder(&device_folder, "Status");
        space.add_writable_variable(&status, "DeviceHealth", Variant::from("NORMAL"));
        space.add_writable_variable(&status, "ErrorCode", Variant::Int32(0));
        space.add_writable_variable(&status, "OperatingMode", Variant::from(""));
    }

}

#[async_trait]
impl ProtocolDevice for OpcuaDevice {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn start(&self) -> Result<()> {
        self.build_address_space().await;

        let endpoint_url = format!("opc.tcp://0.0.0.0:{}/freeopcua/server/", self.port);
        let application_uri = format!("{}:{}", self.application_uri, self.device_id);

        let server = ServerBuilder::new()
            .application_name(self.device_id.clone())
            .application_uri(application_uri)
            .endpoint(endpoint_url.clone(), ServerEndpoint::new_none(&endpoint_url, &["ANONYMOUS".into()]))
            .address_space(self.address_space.clone())
            .build()
            .map_err(|e| SimError::EndpointBindFailure {
                device_id: self.device_id.clone(),
                protocol: "opcua".into(),
                port: self.port,
                reason: format!("{e:?}"),
            })?;

        let server_handle = tokio::spawn(async move {
            if let Err(err) = OpcuaServer::run(server).await {
                tracing::error!(%err, "opcua server exited");
            }
        });

        let device_id = self.device_id.clone();
        let device_type = self.device_type;
        let data = self.group.data.clone();
        let update_interval_s = self.update_interval_s;
        let cached_snapshot = self.cached_snapshot.clone();
        let health = self.health.clone();
        let this_address_space = self.address_space.clone();
        let joint_count = self.joint_count;
        let device = OpcuaDeviceTicker {
            address_space: this_address_space,
            device_type,
            joint_count,
        };
        let ticker_handle = tokio::spawn(async move {
            let clock = SystemClock;
            let mut generator = Generator::new(device_id.clone(), device_type, data, &clock);
            let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(update_interval_s.max(0.01)));
            loop {
                interval.tick().await;
                let snap = generator.produce(&clock, update_interval_s);
                device.write_tick(&snap).await;
                *cached_snapshot.write().await = Some(snap);
                health.write().await.mark_tick(now_ms(), false);
            }
        });

        *self.server_handle.write().await = Some(server_handle);
        *self.ticker_handle.write().await = Some(ticker_handle);
        self.health.write().await.mark_started(now_ms());
        tracing::info!(device_id = %self.device_id, port = self.port, "opcua device started");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(handle) = self.server_handle.write().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.ticker_handle.write().await.take() {
            handle.abort();
        }
        self.health.write().await.mark_stopped();
        tracing::info!(device_id = %self.device_id, "opcua device stopped");
    }

    async fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device_id: self.device_id.clone(),
            device_type: self.device_type.as_str().into(),
            protocol: "opcua".into(),
            port: Some(self.port),
            health: self.health.read().await.clone(),
            update_interval_s: self.update_interval_s,
        }
    }

    async fn snapshot(&self) -> Option<Snapshot> {
        self.cached_snapshot.read().await.clone()
    }
}

/// Small helper carrying just what the ticker task needs to write node
/// values without holding a reference to the whole device.
struct OpcuaDeviceTicker {
    address_space: Arc<RwLock<AddressSpace>>,
    device_type: DeviceType,
    joint_count: usize,
}

impl OpcuaDeviceTicker {
    async fn write_tick(&self, snap: &Snapshot) {
        let mut space = self.address_space.write().await;
        for (node, field) in parameter_nodes(self.device_type, self.joint_count) {
            if let Some(value) = snap.get(field) {
                space.set_variable_value(node, variant_for(value));
            }
        }
        if matches!(self.device_type, DeviceType::IndustrialRobot) {
            for i in 1..=self.joint_count {
                let field = format!("joint_angle_{i}");
                if let Some(value) = snap.get(&field) {
                    space.set_variable_value(&format!("JointAngle_{i}"), variant_for(value));
                }
            }
        }
        space.set_variable_value("DeviceHealth", Variant::from("NORMAL"));
        space.set_variable_value("ErrorCode", Variant::Int32(0));
        let mode_field = match self.device_type {
            DeviceType::CncMachine => "machine_state",
            DeviceType::PlcController => "mode",
            DeviceType::IndustrialRobot => "program_state",
            _ => "",
        };
        if let Some(FieldValue::Text(mode)) = snap.get(mode_field) {
            space.set_variable_value("OperatingMode", Variant::from(mode.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_nodes_cnc() {
        let nodes = parameter_nodes(DeviceType::CncMachine, 6);
        assert!(nodes.contains(&("SpindleSpeed", "spindle_speed")));
        assert!(nodes.contains(&("MachineState", "machine_state")));
    }

    #[test]
    fn test_field_for_node_mapping() {
        // Acronym- and underscore-bearing node names must map to their
        // actual snapshot keys, not a mechanical CamelCase->snake_case guess.
        let robot_nodes = parameter_nodes(DeviceType::IndustrialRobot, 6);
        assert!(robot_nodes.contains(&("TCPPosition_X", "tcp_position_x")));
        assert!(robot_nodes.contains(&("TCPOrientation_Rx", "tcp_orientation_rx")));

        let cnc_nodes = parameter_nodes(DeviceType::CncMachine, 0);
        assert!(cnc_nodes.contains(&("AxisPosition_X", "axis_position_x")));
    }
}
