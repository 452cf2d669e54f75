//! # protocol-sim-engine
//!
//! A multi-protocol industrial device simulator: it stands up Modbus TCP,
//! OPC-UA, and MQTT endpoints backed by deterministic-per-device data
//! generators, so downstream SCADA/historian/integration tooling can be
//! exercised against realistic device fleets without real hardware.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      SIMULATION ORCHESTRATOR                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 4: Orchestrator                                            │
//! │   • Orchestrator — lifecycle, health, inspection surface         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 3: Protocol Managers                                       │
//! │   • ModbusManager, OpcuaManager, MqttManager                    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 2: Protocol Devices                                        │
//! │   • ModbusDevice, OpcuaDevice, MqttGateway                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 1: Data Generation & Resources                             │
//! │   • Generator (per-device state machines), PortManager           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use protocol_sim_engine::{config::SimulationConfig, orchestrator::Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> protocol_sim_engine::Result<()> {
//!     let raw = std::fs::read_to_string("facility.yaml").expect("read config");
//!     let config: SimulationConfig = serde_yaml::from_str(&raw).expect("parse config");
//!     let mut orchestrator = Orchestrator::new(config);
//!     orchestrator.init().await?;
//!     let orchestrator = Arc::new(orchestrator);
//!     orchestrator.start_all().await?;
//!     orchestrator.start_monitoring().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `modbus-tcp`: Modbus TCP device servers (default)
//! - `opcua`: OPC-UA device servers (default)
//! - `mqtt`: MQTT gateway and device publication (default)

pub mod config;
pub mod error;
pub mod generator;
pub mod manager;
pub mod orchestrator;
pub mod port_manager;
pub mod protocol;
pub mod types;

pub use config::SimulationConfig;
pub use error::{Result, SimError};
pub use orchestrator::Orchestrator;
pub use types::*;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
