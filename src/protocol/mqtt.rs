//! MQTT gateway device and shared-client publish loop.
//!
//! A single `rumqttc` client is shared across every MQTT-backed device
//! (specification §4.4, §9 design note "shared MQTT client from multiple
//! owners"). [`MqttDevice`] only tracks per-device topic/QoS/health state;
//! [`MqttGateway`] owns the client and the publish loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::{DeviceGroupConfig, MqttConfig};
use crate::error::{Result, SimError};
use crate::generator::Generator;
use crate::types::{now_ms, Clock, DeviceType, HealthRecord, Snapshot, SystemClock};

fn qos_of(value: u8) -> QoS {
    match value {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// One logical device published through the shared gateway client.
struct MqttDeviceEntry {
    device_id: String,
    device_type: DeviceType,
    base_topic: String,
    qos: QoS,
    retain: bool,
    update_interval_s: f64,
    generator: Mutex<Generator>,
    last_publish_ms: AtomicU64,
    health: RwLock<HealthRecord>,
    history: Mutex<Vec<Snapshot>>,
}

/// Owns the single shared MQTT client and the publish loop that services
/// every registered device.
pub struct MqttGateway {
    config: MqttConfig,
    devices: RwLock<Vec<Arc<MqttDeviceEntry>>>,
    client: RwLock<Option<AsyncClient>>,
    publish_handle: RwLock<Option<JoinHandle<()>>>,
    eventloop_handle: RwLock<Option<JoinHandle<()>>>,
    running: RwLock<bool>,
}

impl MqttGateway {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            devices: RwLock::new(Vec::new()),
            client: RwLock::new(None),
            publish_handle: RwLock::new(None),
            eventloop_handle: RwLock::new(None),
            running: RwLock::new(false),
        }
    }

    /// Registers one device group's devices for publication; called during
    /// manager `init()`, before `start()`.
    pub async fn register_group(&self, prefix: &str, group_name: &str, group: &DeviceGroupConfig, device_type: DeviceType) {
        let clock = SystemClock;
        let mut devices = self.devices.write().await;
        for i in 0..group.count {
            let device_id = format!("{prefix}_{group_name}_{i:03}");
            let base_topic = group
                .base_topic
                .clone()
                .unwrap_or_else(|| format!("devices/{}/{}", device_type.as_str(), device_id));
            let generator = Generator::new(device_id.clone(), device_type, group.data.clone(), &clock);
            devices.push(Arc::new(MqttDeviceEntry {
                health: RwLock::new(HealthRecord::new(device_id.clone())),
                device_id,
                device_type,
                base_topic,
                qos: qos_of(group.qos),
                retain: group.retain,
                update_interval_s: group.update_interval,
                generator: Mutex::new(generator),
                last_publish_ms: AtomicU64::new(0),
                history: Mutex::new(Vec::new()),
            }));
        }
    }

    /// Connects the shared client and waits (best-effort, up to 10s) for
    /// connection confirmation, then publishes a retained online status per
    /// device and starts the 100ms publish loop.
    pub async fn start(&self) -> Result<()> {
        let client_id = format!("mqtt_gateway_{}", now_ms());
        let mut opts = MqttOptions::new(client_id, self.config.broker_host.clone(), self.config.broker_port);
        opts.set_keep_alive(Duration::from_secs(60));
        opts.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(opts, 256);

        let connected = Arc::new(tokio::sync::Notify::new());
        let connected_task = connected.clone();
        let eventloop_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => connected_task.notify_waiters(),
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, "mqtt eventloop error");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });

        let confirmed = tokio::time::timeout(Duration::from_secs(10), connected.notified()).await;
        if confirmed.is_err() {
            eventloop_handle.abort();
            return Err(SimError::BrokerUnreachable {
                host: self.config.broker_host.clone(),
                port: self.config.broker_port,
            });
        }

        {
            let devices = self.devices.read().await;
            for device in devices.iter() {
                let payload = serde_json::json!({
                    "device_id": device.device_id,
                    "status": "online",
                    "timestamp": now_ms(),
                })
                .to_string();
                let _ = client
                    .publish(format!("{}/status", device.base_topic), QoS::AtLeastOnce, true, payload)
                    .await;
                device.health.write().await.mark_started(now_ms());
            }
        }

        *self.running.write().await = true;
        *self.client.write().await = Some(client.clone());
        *self.eventloop_handle.write().await = Some(eventloop_handle);

        let devices_for_loop = self.devices.read().await.clone();
        let client_for_loop = client.clone();
        let publish_handle = tokio::spawn(Self::publish_loop(client_for_loop, devices_for_loop));
        *self.publish_handle.write().await = Some(publish_handle);

        tracing::info!(broker = %self.config.broker_host, port = self.config.broker_port, "mqtt gateway started");
        Ok(())
    }

    async fn publish_loop(client: AsyncClient, devices: Vec<Arc<MqttDeviceEntry>>) {
        let clock = SystemClock;
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        loop {
            tick.tick().await;
            let now = clock.now_ms();
            for device in &devices {
                let last = device.last_publish_ms.load(Ordering::Relaxed);
                let due_ms = (device.update_interval_s * 1000.0) as u64;
                if now.saturating_sub(last) < due_ms {
                    continue;
                }
                let snap = {
                    let mut gen = device.generator.lock().await;
                    gen.produce(&clock, device.update_interval_s)
                };
                let payload = snap.as_json().to_string();
                match client
                    .publish(format!("{}/data", device.base_topic), device.qos, device.retain, payload)
                    .await
                {
                    Ok(()) => {
                        device.last_publish_ms.store(now, Ordering::Relaxed);
                        {
                            let mut health = device.health.write().await;
                            health.mark_tick(now, false);
                            *health.extra.entry("publish_count".into()).or_insert(0) += 1;
                        }
                        let mut history = device.history.lock().await;
                        history.push(snap);
                        if history.len() > 100 {
                            history.remove(0);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(device_id = %device.device_id, %err, "mqtt publish failed");
                        device.health.write().await.mark_tick(now, true);
                    }
                }
            }
        }
    }

    /// Publishes retained offline status for every device, then stops the
    /// client loop and disconnects. Best-effort: the offline message is not
    /// guaranteed to reach the broker before disconnect.
    pub async fn stop(&self) {
        if let Some(handle) = self.publish_handle.write().await.take() {
            handle.abort();
        }
        if let Some(client) = self.client.read().await.clone() {
            let devices = self.devices.read().await;
            for device in devices.iter() {
                let payload = serde_json::json!({
                    "device_id": device.device_id,
                    "status": "offline",
                    "timestamp": now_ms(),
                })
                .to_string();
                let _ = client
                    .publish(format!("{}/status", device.base_topic), QoS::AtLeastOnce, true, payload)
                    .await;
                device.health.write().await.mark_stopped();
            }
            let _ = client.disconnect().await;
        }
        if let Some(handle) = self.eventloop_handle.write().await.take() {
            handle.abort();
        }
        *self.running.write().await = false;
        *self.client.write().await = None;
        tracing::info!("mqtt gateway stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.devices.read().await.iter().map(|d| d.device_id.clone()).collect()
    }

    pub async fn health(&self) -> HashMap<String, HealthRecord> {
        let devices = self.devices.read().await;
        let mut out = HashMap::new();
        for device in devices.iter() {
            out.insert(device.device_id.clone(), device.health.read().await.clone());
        }
        out
    }

    pub async fn last_snapshot(&self, device_id: &str) -> Option<Snapshot> {
        let devices = self.devices.read().await;
        for device in devices.iter() {
            if device.device_id == device_id {
                return device.history.lock().await.last().cloned();
            }
        }
        None
    }

    pub async fn status(&self, device_id: &str) -> Option<crate::protocol::DeviceStatus> {
        let devices = self.devices.read().await;
        for device in devices.iter() {
            if device.device_id == device_id {
                return Some(crate::protocol::DeviceStatus {
                    device_id: device.device_id.clone(),
                    device_type: device.device_type.as_str().into(),
                    protocol: "mqtt".into(),
                    port: None,
                    health: device.health.read().await.clone(),
                    update_interval_s: device.update_interval_s,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_of(0), QoS::AtMostOnce);
        assert_eq!(qos_of(1), QoS::AtLeastOnce);
        assert_eq!(qos_of(2), QoS::ExactlyOnce);
        assert_eq!(qos_of(9), QoS::AtMostOnce);
    }
}
