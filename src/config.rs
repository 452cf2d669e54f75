//! Configuration types for the simulation engine.
//!
//! The config *loader* (reading YAML/JSON from disk, env overlays, CLI flags)
//! is out of scope for this crate; these types are what a loader builds and
//! hands to [`crate::orchestrator::Orchestrator::init`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Top-level simulation configuration
// =============================================================================

/// Complete simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub facility: FacilityConfig,
    #[serde(default)]
    pub simulation: SimulationOptions,
    pub network: NetworkConfig,
    pub industrial_protocols: IndustrialProtocolsConfig,
}

impl SimulationConfig {
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::default()
    }

    /// Validates cross-field invariants the specification assigns to
    /// `ConfigInvalid` (§7).
    pub fn validate(&self) -> crate::Result<()> {
        if self.facility.name.trim().is_empty() {
            return Err(crate::SimError::ConfigInvalid {
                reason: "facility.name must not be empty".into(),
            });
        }
        if self.simulation.time_acceleration <= 0.0 {
            return Err(crate::SimError::ConfigInvalid {
                reason: "simulation.time_acceleration must be > 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.simulation.fault_injection_rate) {
            return Err(crate::SimError::ConfigInvalid {
                reason: "simulation.fault_injection_rate must be in [0, 1]".into(),
            });
        }
        for (protocol, range) in &self.network.port_ranges {
            if range.start > range.end {
                return Err(crate::SimError::ConfigInvalid {
                    reason: format!("port range for {protocol} is empty or inverted"),
                });
            }
        }
        for groups in [
            self.industrial_protocols.modbus_tcp.as_ref().map(|c| &c.devices),
            self.industrial_protocols.mqtt.as_ref().map(|c| &c.devices),
            self.industrial_protocols.opcua.as_ref().map(|c| &c.devices),
        ]
        .into_iter()
        .flatten()
        {
            for (name, group) in groups {
                if !(1..=1000).contains(&group.count) {
                    return Err(crate::SimError::ConfigInvalid {
                        reason: format!("device group {name}: count must be in [1, 1000]"),
                    });
                }
                if group.update_interval <= 0.0 {
                    return Err(crate::SimError::ConfigInvalid {
                        reason: format!("device group {name}: update_interval must be > 0"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`SimulationConfig`], mirroring the fluent style used
/// elsewhere in this crate.
#[derive(Debug, Default)]
pub struct SimulationConfigBuilder {
    facility: Option<FacilityConfig>,
    simulation: Option<SimulationOptions>,
    network: Option<NetworkConfig>,
    industrial_protocols: Option<IndustrialProtocolsConfig>,
}

impl SimulationConfigBuilder {
    pub fn facility(mut self, facility: FacilityConfig) -> Self {
        self.facility = Some(facility);
        self
    }

    pub fn simulation(mut self, simulation: SimulationOptions) -> Self {
        self.simulation = Some(simulation);
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn industrial_protocols(mut self, protocols: IndustrialProtocolsConfig) -> Self {
        self.industrial_protocols = Some(protocols);
        self
    }

    pub fn build(self) -> crate::Result<SimulationConfig> {
        let config = SimulationConfig {
            facility: self.facility.ok_or_else(|| crate::SimError::ConfigInvalid {
                reason: "facility is required".into(),
            })?,
            simulation: self.simulation.unwrap_or_default(),
            network: self.network.unwrap_or_default(),
            industrial_protocols: self.industrial_protocols.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Facility / simulation options
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub shift_schedule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOptions {
    #[serde(default = "default_time_acceleration")]
    pub time_acceleration: f64,
    #[serde(default)]
    pub fault_injection_rate: f64,
    #[serde(default = "default_data_retention")]
    pub data_retention: String,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            time_acceleration: default_time_acceleration(),
            fault_injection_rate: 0.0,
            data_retention: default_data_retention(),
        }
    }
}

fn default_time_acceleration() -> f64 {
    1.0
}

fn default_data_retention() -> String {
    "1h".into()
}

// =============================================================================
// Network configuration
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_base_ip")]
    pub base_ip: String,
    #[serde(default = "default_port_ranges")]
    pub port_ranges: HashMap<String, PortRange>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_ip: default_base_ip(),
            port_ranges: default_port_ranges(),
        }
    }
}

fn default_base_ip() -> String {
    "0.0.0.0".into()
}

fn default_port_ranges() -> HashMap<String, PortRange> {
    let mut ranges = HashMap::new();
    ranges.insert("modbus".into(), PortRange { start: 5020, end: 5500 });
    ranges.insert("opcua".into(), PortRange { start: 4840, end: 4940 });
    ranges
}

// =============================================================================
// Protocol configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndustrialProtocolsConfig {
    #[serde(default)]
    pub modbus_tcp: Option<ModbusTcpConfig>,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub opcua: Option<OpcuaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub devices: HashMap<String, DeviceGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcuaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_application_uri")]
    pub application_uri: String,
    #[serde(default)]
    pub devices: HashMap<String, DeviceGroupConfig>,
}

fn default_application_uri() -> String {
    "urn:protocol-sim-engine".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub use_embedded_broker: bool,
    #[serde(default)]
    pub devices: HashMap<String, DeviceGroupConfig>,
}

fn default_broker_host() -> String {
    "localhost".into()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Per-device-group configuration
// =============================================================================

/// Configuration for one logical group of identical devices (e.g.
/// `temperature_sensors: { count: 10, template: temperature_sensor, ... }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroupConfig {
    pub template: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_update_interval")]
    pub update_interval: f64,
    #[serde(default)]
    pub port_start: Option<u16>,
    #[serde(default)]
    pub base_topic: Option<String>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    /// Per-device-type tuning options (base values, ranges, noise
    /// parameters). Named fields are read out of this map by the generator;
    /// unrecognized keys are tolerated for forward compatibility.
    #[serde(default)]
    pub data: HashMap<String, serde_yaml::Value>,
}

fn default_count() -> u32 {
    1
}

fn default_update_interval() -> f64 {
    1.0
}

fn default_qos() -> u8 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_facility_name() {
        let config = SimulationConfig {
            facility: FacilityConfig {
                name: "".into(),
                description: None,
                location: None,
                shift_schedule: None,
            },
            simulation: SimulationOptions::default(),
            network: NetworkConfig::default(),
            industrial_protocols: IndustrialProtocolsConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = SimulationConfig::builder()
            .facility(FacilityConfig {
                name: "Plant 1".into(),
                description: None,
                location: None,
                shift_schedule: None,
            })
            .build()
            .unwrap();
        assert_eq!(config.simulation.time_acceleration, 1.0);
        assert!(config.network.port_ranges.contains_key("modbus"));
    }
}
