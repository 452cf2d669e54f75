//! OPC-UA device manager.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};

use crate::config::OpcuaConfig;
use crate::port_manager::PortManager;
use crate::protocol::opcua::OpcuaDevice;
use crate::protocol::{DeviceStatus, ProtocolDevice};
use crate::types::DeviceType;

use super::START_CONCURRENCY;

pub struct OpcuaManager {
    devices: RwLock<HashMap<String, Arc<OpcuaDevice>>>,
    allocation_plan: RwLock<HashMap<String, (String, u16)>>,
}

impl OpcuaManager {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            allocation_plan: RwLock::new(HashMap::new()),
        }
    }

    pub async fn init(&self, config: &OpcuaConfig, port_manager: &PortManager) -> crate::Result<()> {
        let mut plan = HashMap::new();
        for (group_name, group) in &config.devices {
            for i in 0..group.count {
                let device_id = format!("opcua_{group_name}_{i:03}");
                plan.insert(device_id, ("opcua".to_string(), 1u16));
            }
        }
        *self.allocation_plan.write().await = plan;

        let mut devices = self.devices.write().await;
        for (group_name, group) in &config.devices {
            let device_type = DeviceType::from_template(&group.template);
            for i in 0..group.count {
                let device_id = format!("opcua_{group_name}_{i:03}");
                let ports = port_manager
                    .allocate("opcua", &device_id, 1, group.port_start.map(|p| p + i as u16))
                    .await?;
                devices.insert(
                    device_id.clone(),
                    Arc::new(OpcuaDevice::new(
                        device_id,
                        device_type,
                        ports[0],
                        config.application_uri.clone(),
                        group.clone(),
                    )),
                );
            }
        }
        Ok(())
    }

    pub async fn allocation_requirements(&self) -> HashMap<String, (String, u16)> {
        self.allocation_plan.read().await.clone()
    }

    pub async fn start_all(&self) -> Option<HashMap<String, Arc<OpcuaDevice>>> {
        let devices = self.devices.read().await.clone();
        let semaphore = Arc::new(Semaphore::new(START_CONCURRENCY));
        let mut handles = Vec::new();
        for (id, device) in devices.iter() {
            let permit = semaphore.clone();
            let device = device.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let result = device.start().await;
                (id, result)
            }));
        }
        let mut started = HashMap::new();
        for handle in handles {
            match handle.await {
                Ok((id, Ok(()))) => {
                    if let Some(device) = devices.get(&id) {
                        started.insert(id, device.clone());
                    }
                }
                Ok((id, Err(err))) => {
                    tracing::warn!(device_id = %id, %err, "opcua device failed to start");
                }
                Err(err) => tracing::warn!(%err, "opcua start task panicked"),
            }
        }
        if started.is_empty() {
            None
        } else {
            Some(started)
        }
    }

    pub async fn stop_all(&self) {
        let devices = self.devices.read().await.clone();
        let mut handles = Vec::new();
        for device in devices.values() {
            let device = device.clone();
            handles.push(tokio::spawn(async move { device.stop().await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn health(&self) -> HashMap<String, DeviceStatus> {
        let devices = self.devices.read().await;
        let mut out = HashMap::new();
        for (id, device) in devices.iter() {
            out.insert(id.clone(), device.status().await);
        }
        out
    }

    pub async fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        let devices = self.devices.read().await;
        match devices.get(device_id) {
            Some(device) => Some(device.status().await),
            None => None,
        }
    }

    pub async fn restart(&self, device_id: &str) -> crate::Result<()> {
        let device = {
            let devices = self.devices.read().await;
            devices.get(device_id).cloned()
        };
        let device = device.ok_or_else(|| crate::SimError::DeviceNotFound {
            device_id: device_id.to_string(),
        })?;
        device.stop().await;
        device.start().await
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    pub async fn device(&self, device_id: &str) -> Option<Arc<OpcuaDevice>> {
        self.devices.read().await.get(device_id).cloned()
    }
}
