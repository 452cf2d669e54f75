//! Per-protocol device managers (specification §4.4).
//!
//! Each manager enumerates devices from configuration, allocates ports via
//! the shared [`crate::port_manager::PortManager`], and drives bounded-
//! concurrency start/stop across its device instances. MQTT is the
//! exception: it has a single shared client rather than per-device
//! instances, so its manager wraps [`crate::protocol::mqtt::MqttGateway`]
//! directly instead of a device list.

#[cfg(feature = "modbus-tcp")]
pub mod modbus;

#[cfg(feature = "opcua")]
pub mod opcua;

#[cfg(feature = "mqtt")]
pub mod mqtt;

/// Manager-level bounded concurrency for `start_all()` (specification §5).
pub const START_CONCURRENCY: usize = 5;
