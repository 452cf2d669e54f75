//! MQTT device manager.
//!
//! Unlike the per-port protocols, MQTT devices share a single gateway
//! connection, so this manager is a thin wrapper around
//! [`crate::protocol::mqtt::MqttGateway`] rather than a per-device pool.

use std::collections::HashMap;

use crate::config::MqttConfig;
use crate::protocol::mqtt::MqttGateway;
use crate::types::DeviceType;

pub struct MqttManager {
    gateway: MqttGateway,
}

impl MqttManager {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            gateway: MqttGateway::new(config),
        }
    }

    pub async fn init(&self, config: &MqttConfig) -> crate::Result<()> {
        for (group_name, group) in &config.devices {
            let device_type = DeviceType::from_template(&group.template);
            self.gateway.register_group("mqtt", group_name, group, device_type).await;
        }
        Ok(())
    }

    pub async fn allocation_requirements(&self) -> HashMap<String, (String, u16)> {
        // MQTT devices share the gateway's TCP connection; they consume no
        // dedicated ports from the shared pools.
        HashMap::new()
    }

    pub async fn start_all(&self) -> crate::Result<()> {
        self.gateway.start().await
    }

    pub async fn stop_all(&self) {
        self.gateway.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.gateway.is_running().await
    }

    pub async fn health(&self) -> HashMap<String, crate::types::HealthRecord> {
        self.gateway.health().await
    }

    pub async fn status(&self, device_id: &str) -> Option<crate::protocol::DeviceStatus> {
        self.gateway.status(device_id).await
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.gateway.device_ids().await
    }

    pub fn gateway(&self) -> &MqttGateway {
        &self.gateway
    }
}
