//! Protocol devices: Modbus TCP, OPC-UA, and MQTT.
//!
//! Each submodule owns one protocol's wire encoding; all three share the
//! common device lifecycle contract described in the specification (§4.3):
//! `start`/`stop`/`status`/`snapshot`.

#[cfg(feature = "modbus-tcp")]
pub mod modbus;

#[cfg(feature = "opcua")]
pub mod opcua;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "mqtt")]
pub mod mqtt_broker;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::types::{HealthRecord, Snapshot};

/// Status record returned by a protocol device's `status()` operation.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub device_type: String,
    pub protocol: String,
    pub port: Option<u16>,
    pub health: HealthRecord,
    pub update_interval_s: f64,
}

/// Common lifecycle contract shared by every protocol device.
#[async_trait]
pub trait ProtocolDevice: Send + Sync {
    fn device_id(&self) -> &str;

    /// Binds the endpoint and launches the periodic update loop. Returns
    /// `Ok(())` only once the endpoint is ready to accept connections.
    async fn start(&self) -> Result<()>;

    /// Cancels the update loop and tears down the endpoint. Always
    /// completes, even if `start` only partially succeeded.
    async fn stop(&self);

    async fn status(&self) -> DeviceStatus;

    /// Returns the last produced snapshot in plain (decoded) form, or `None`
    /// if no tick has completed yet.
    async fn snapshot(&self) -> Option<Snapshot>;
}
