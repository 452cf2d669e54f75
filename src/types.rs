//! Shared value and status types used across generator, protocol, and
//! orchestrator layers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// =============================================================================
// Device type / template
// =============================================================================

/// The closed set of simulated device behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    TemperatureSensor,
    PressureTransmitter,
    MotorDrive,
    EnvironmentalSensor,
    EnergyMeter,
    AssetTracker,
    GenericSensor,
    CncMachine,
    PlcController,
    IndustrialRobot,
}

impl DeviceType {
    /// Maps a free-form template name to a device type, defaulting to
    /// `GenericSensor` for anything unrecognized.
    pub fn from_template(template: &str) -> Self {
        match template {
            "temperature_sensor" => Self::TemperatureSensor,
            "pressure_transmitter" => Self::PressureTransmitter,
            "motor_drive" => Self::MotorDrive,
            "environmental_sensor" => Self::EnvironmentalSensor,
            "energy_meter" => Self::EnergyMeter,
            "asset_tracker" => Self::AssetTracker,
            "opcua_cnc_machine" | "cnc_machine" => Self::CncMachine,
            "opcua_plc_controller" | "plc_controller" => Self::PlcController,
            "opcua_industrial_robot" | "industrial_robot" => Self::IndustrialRobot,
            _ => Self::GenericSensor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemperatureSensor => "temperature_sensor",
            Self::PressureTransmitter => "pressure_transmitter",
            Self::MotorDrive => "motor_drive",
            Self::EnvironmentalSensor => "environmental_sensor",
            Self::EnergyMeter => "energy_meter",
            Self::AssetTracker => "asset_tracker",
            Self::GenericSensor => "generic_sensor",
            Self::CncMachine => "cnc_machine",
            Self::PlcController => "plc_controller",
            Self::IndustrialRobot => "industrial_robot",
        }
    }
}

// =============================================================================
// Snapshot value model
// =============================================================================

/// A single scalar (or short vector) value emitted by the generator for one
/// named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
    Vector(Vec<f64>),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// One tick's worth of generated values for a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub device_id: String,
    pub device_type: DeviceType,
    pub timestamp_ms: u64,
    /// Ordered to give a stable iteration order for the generic Modbus overflow
    /// mapping (§4.3.1 of the specification).
    pub fields: Vec<(String, FieldValue)>,
}

impl Snapshot {
    pub fn empty(device_id: impl Into<String>, device_type: DeviceType, now_ms: u64) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
            timestamp_ms: now_ms,
            fields: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    pub fn as_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or_default()))
            .collect();
        serde_json::json!({
            "device_id": self.device_id,
            "device_type": self.device_type.as_str(),
            "timestamp": self.timestamp_ms,
            "data": map,
        })
    }
}

// =============================================================================
// Health / status model
// =============================================================================

/// Lifecycle status of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Running,
}

/// Per-device health and lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub device_id: String,
    pub status: RunState,
    pub uptime_start_ms: Option<u64>,
    pub last_update_ms: Option<u64>,
    pub error_count: u64,
    /// Protocol-specific counters: publish_count (MQTT), node_count (OPC-UA).
    pub extra: HashMap<String, u64>,
}

impl HealthRecord {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: RunState::Stopped,
            uptime_start_ms: None,
            last_update_ms: None,
            error_count: 0,
            extra: HashMap::new(),
        }
    }

    pub fn mark_started(&mut self, now_ms: u64) {
        self.status = RunState::Running;
        self.uptime_start_ms = Some(now_ms);
        self.error_count = 0;
    }

    pub fn mark_stopped(&mut self) {
        self.status = RunState::Stopped;
        self.uptime_start_ms = None;
    }

    pub fn mark_tick(&mut self, now_ms: u64, failed: bool) {
        self.last_update_ms = Some(now_ms);
        if failed {
            self.error_count += 1;
        }
    }

    pub fn uptime_seconds(&self, now_ms: u64) -> Option<u64> {
        self.uptime_start_ms.map(|start| (now_ms.saturating_sub(start)) / 1000)
    }
}

/// Overall health bucket, derived from the fraction of running devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBucket {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthBucket {
    /// `running / total` running fraction, bucketed per the specification:
    /// healthy >= 95%, degraded >= 80%, else unhealthy. A facility with zero
    /// devices is trivially healthy.
    pub fn from_fraction(running: usize, total: usize) -> Self {
        if total == 0 {
            return Self::Healthy;
        }
        let pct = running as f64 / total as f64;
        if pct >= 0.95 {
            Self::Healthy
        } else if pct >= 0.80 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

// =============================================================================
// Time utilities
// =============================================================================

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Injectable clock so deterministic tests can drive state machines without
/// sleeping in real time (specification §9 design note).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_from_template() {
        assert_eq!(DeviceType::from_template("motor_drive"), DeviceType::MotorDrive);
        assert_eq!(DeviceType::from_template("bogus"), DeviceType::GenericSensor);
        assert_eq!(
            DeviceType::from_template("opcua_cnc_machine"),
            DeviceType::CncMachine
        );
    }

    #[test]
    fn test_health_bucket_boundaries() {
        assert_eq!(HealthBucket::from_fraction(19, 20), HealthBucket::Healthy);
        assert_eq!(HealthBucket::from_fraction(18, 20), HealthBucket::Degraded);
        assert_eq!(HealthBucket::from_fraction(16, 20), HealthBucket::Degraded);
        assert_eq!(HealthBucket::from_fraction(15, 20), HealthBucket::Unhealthy);
    }

    #[test]
    fn test_snapshot_json_roundtrip_shape() {
        let mut snap = Snapshot::empty("modbus_temperature_sensors_000", DeviceType::TemperatureSensor, 1_000);
        snap.push("temperature", FieldValue::Float(24.5));
        let json = snap.as_json();
        assert_eq!(json["device_id"], "modbus_temperature_sensors_000");
        assert_eq!(json["data"]["temperature"], 24.5);
    }
}
