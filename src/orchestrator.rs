//! Simulation orchestrator.
//!
//! Coordinates port allocation, per-protocol device managers, and the
//! facility-wide health view (specification §4.4, §10.5). Grounded on
//! `original_source/src/orchestrator.py`'s `SimulationOrchestrator`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::port_manager::{AllocationReport, PortManager, PoolUtilization};
use crate::protocol::{DeviceStatus, ProtocolDevice};
use crate::types::HealthBucket;

#[cfg(feature = "modbus-tcp")]
use crate::manager::modbus::ModbusManager;
#[cfg(feature = "mqtt")]
use crate::manager::mqtt::MqttManager;
#[cfg(feature = "opcua")]
use crate::manager::opcua::OpcuaManager;
#[cfg(feature = "mqtt")]
use crate::protocol::mqtt_broker::EmbeddedMqttBroker;

/// Facility-wide health snapshot, refreshed after every start/stop/restart
/// and by the background monitoring loop.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: HealthBucket,
    pub devices: HashMap<String, HashMap<String, DeviceStatus>>,
    pub total_devices: usize,
    pub healthy_devices: usize,
    pub health_percentage: f64,
    pub port_utilization: HashMap<String, PoolUtilization>,
}

impl HealthStatus {
    fn stopped() -> Self {
        Self {
            status: HealthBucket::Healthy,
            devices: HashMap::new(),
            total_devices: 0,
            healthy_devices: 0,
            health_percentage: 0.0,
            port_utilization: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolSummary {
    pub device_count: usize,
    pub status: &'static str,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_devices: usize,
    pub active_protocols: Vec<String>,
    pub port_utilization: HashMap<String, PoolUtilization>,
    pub health_status: HealthBucket,
    pub healthy_device_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedDeviceData {
    pub format: String,
    pub timestamp_ms: u64,
    pub device_count: usize,
    pub data: Vec<DeviceStatus>,
}

/// Coordinates every enabled protocol manager against one shared
/// [`PortManager`] and tracks facility-wide run state and health.
pub struct Orchestrator {
    config: SimulationConfig,
    port_manager: Arc<PortManager>,

    #[cfg(feature = "modbus-tcp")]
    modbus: Option<ModbusManager>,
    #[cfg(feature = "opcua")]
    opcua: Option<OpcuaManager>,
    #[cfg(feature = "mqtt")]
    mqtt: Option<MqttManager>,
    #[cfg(feature = "mqtt")]
    embedded_broker: RwLock<Option<EmbeddedMqttBroker>>,

    active_protocols: RwLock<HashSet<String>>,
    running: RwLock<bool>,
    health: RwLock<HealthStatus>,
    monitoring_handle: RwLock<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: SimulationConfig) -> Self {
        let port_manager = Arc::new(PortManager::from_network_config(&config.network));
        Self {
            config,
            port_manager,
            #[cfg(feature = "modbus-tcp")]
            modbus: None,
            #[cfg(feature = "opcua")]
            opcua: None,
            #[cfg(feature = "mqtt")]
            mqtt: None,
            #[cfg(feature = "mqtt")]
            embedded_broker: RwLock::new(None),
            active_protocols: RwLock::new(HashSet::new()),
            running: RwLock::new(false),
            health: RwLock::new(HealthStatus::stopped()),
            monitoring_handle: RwLock::new(None),
        }
    }

    /// Builds port pools, constructs and initializes every enabled protocol
    /// manager, and validates the combined allocation plan before any
    /// device is actually started.
    pub async fn init(&mut self) -> Result<()> {
        self.config.validate()?;
        tracing::info!(facility = %self.config.facility.name, "initializing simulation orchestrator");

        let mut pools = HashMap::new();
        for (protocol, range) in &self.config.network.port_ranges {
            pools.insert(protocol.clone(), (range.start, range.end));
        }
        self.port_manager.init_pools(pools).await;

        #[cfg(feature = "modbus-tcp")]
        if let Some(cfg) = self.config.industrial_protocols.modbus_tcp.clone().filter(|c| c.enabled) {
            tracing::info!("initializing modbus tcp protocol manager");
            let manager = ModbusManager::new();
            manager.init(&cfg, &self.port_manager).await?;
            self.modbus = Some(manager);
            self.active_protocols.write().await.insert("modbus_tcp".into());
        }

        #[cfg(feature = "mqtt")]
        if let Some(cfg) = self.config.industrial_protocols.mqtt.clone().filter(|c| c.enabled) {
            if cfg.use_embedded_broker {
                tracing::info!("starting embedded mqtt broker");
                let mut broker = EmbeddedMqttBroker::new("0.0.0.0", cfg.broker_port);
                broker.start();
                *self.embedded_broker.write().await = Some(broker);
            }
            tracing::info!("initializing mqtt protocol manager");
            let manager = MqttManager::new(cfg.clone());
            manager.init(&cfg).await?;
            self.mqtt = Some(manager);
            self.active_protocols.write().await.insert("mqtt".into());
        }

        #[cfg(feature = "opcua")]
        if let Some(cfg) = self.config.industrial_protocols.opcua.clone().filter(|c| c.enabled) {
            tracing::info!("initializing opcua protocol manager");
            let manager = OpcuaManager::new();
            manager.init(&cfg, &self.port_manager).await?;
            self.opcua = Some(manager);
            self.active_protocols.write().await.insert("opcua".into());
        }

        let mut plan = HashMap::new();
        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            plan.extend(manager.allocation_requirements().await);
        }
        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            plan.extend(manager.allocation_requirements().await);
        }
        #[cfg(feature = "mqtt")]
        if let Some(manager) = &self.mqtt {
            plan.extend(manager.allocation_requirements().await);
        }

        if !self.port_manager.validate_plan(&plan).await {
            return Err(SimError::ConfigInvalid {
                reason: "device allocation plan exceeds available port capacity".into(),
            });
        }

        tracing::info!(
            facility = %self.config.facility.name,
            protocols = ?self.active_protocols.read().await,
            "simulation orchestrator initialized"
        );
        Ok(())
    }

    /// Starts every enabled protocol's devices. Returns `Ok(false)` (not an
    /// error) if zero devices started across all protocols.
    pub async fn start_all(&self) -> Result<bool> {
        tracing::info!("starting all simulation devices");
        let mut started_count = 0usize;

        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            match manager.start_all().await {
                Some(devices) => started_count += devices.len(),
                None => tracing::error!("failed to start modbus tcp devices"),
            }
        }

        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            match manager.start_all().await {
                Some(devices) => started_count += devices.len(),
                None => tracing::error!("failed to start opcua devices"),
            }
        }

        #[cfg(feature = "mqtt")]
        if let Some(manager) = &self.mqtt {
            match manager.start_all().await {
                Ok(()) => started_count += manager.device_ids().await.len(),
                Err(err) => tracing::error!(%err, "failed to start mqtt devices"),
            }
        }

        if started_count == 0 {
            tracing::error!("no devices were started");
            return Ok(false);
        }

        *self.running.write().await = true;
        self.refresh_health().await;

        tracing::info!(total_devices = started_count, "all simulation devices started");
        Ok(true)
    }

    /// Stops every device, the embedded broker if running, and the
    /// background monitoring loop.
    pub async fn stop_all(&self) {
        tracing::info!("stopping all simulation devices");

        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            manager.stop_all().await;
        }
        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            manager.stop_all().await;
        }
        #[cfg(feature = "mqtt")]
        if let Some(manager) = &self.mqtt {
            manager.stop_all().await;
        }
        #[cfg(feature = "mqtt")]
        if let Some(mut broker) = self.embedded_broker.write().await.take() {
            broker.stop();
        }

        if let Some(handle) = self.monitoring_handle.write().await.take() {
            handle.abort();
        }

        *self.running.write().await = false;
        self.active_protocols.write().await.clear();
        *self.health.write().await = HealthStatus::stopped();
        tracing::info!("all simulation devices stopped");
    }

    /// Spawns the background health-refresh loop (specification §10.5) and
    /// stores its handle so `stop_all` can cancel it. Requires the
    /// orchestrator to be held behind an `Arc`, since the loop outlives the
    /// caller's stack frame.
    pub async fn start_monitoring(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(this.run_monitoring_loop());
        *self.monitoring_handle.write().await = Some(handle);
    }

    async fn run_monitoring_loop(self: Arc<Self>) {
        tracing::info!("starting health monitoring loop");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            if !*self.running.read().await {
                break;
            }
            self.refresh_health().await;
        }
        tracing::info!("health monitoring loop stopped");
    }

    /// Recomputes the facility health view immediately. Called after
    /// `start_all`/`restart_device`, and by the 30s monitoring loop;
    /// exposed publicly so callers can force a refresh on demand.
    pub async fn refresh_health(&self) {
        let mut devices: HashMap<String, HashMap<String, DeviceStatus>> = HashMap::new();
        let mut total = 0usize;
        let mut healthy = 0usize;

        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            let statuses = manager.health().await;
            for status in statuses.values() {
                total += 1;
                if status.health.status == crate::types::RunState::Running {
                    healthy += 1;
                }
            }
            devices.insert("modbus_tcp".into(), statuses);
        }
        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            let statuses = manager.health().await;
            for status in statuses.values() {
                total += 1;
                if status.health.status == crate::types::RunState::Running {
                    healthy += 1;
                }
            }
            devices.insert("opcua".into(), statuses);
        }
        #[cfg(feature = "mqtt")]
        if let Some(manager) = &self.mqtt {
            let mut statuses = HashMap::new();
            for id in manager.device_ids().await {
                if let Some(status) = manager.status(&id).await {
                    total += 1;
                    if status.health.status == crate::types::RunState::Running {
                        healthy += 1;
                    }
                    statuses.insert(id, status);
                }
            }
            devices.insert("mqtt".into(), statuses);
        }

        let pct = if total == 0 { 0.0 } else { healthy as f64 / total as f64 * 100.0 };
        let status = HealthBucket::from_fraction(healthy, total);
        let port_utilization = self.port_manager.utilization().await;

        *self.health.write().await = HealthStatus {
            status,
            devices,
            total_devices: total,
            healthy_devices: healthy,
            health_percentage: (pct * 100.0).round() / 100.0,
            port_utilization,
        };
    }

    pub async fn device_count(&self) -> usize {
        self.health.read().await.total_devices
    }

    pub async fn active_protocols(&self) -> HashSet<String> {
        self.active_protocols.read().await.clone()
    }

    pub async fn health_status(&self) -> HealthStatus {
        self.health.read().await.clone()
    }

    pub async fn device_status(&self, device_id: &str) -> Option<DeviceStatus> {
        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            if let Some(status) = manager.status(device_id).await {
                return Some(status);
            }
        }
        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            if let Some(status) = manager.status(device_id).await {
                return Some(status);
            }
        }
        #[cfg(feature = "mqtt")]
        if let Some(manager) = &self.mqtt {
            if let Some(status) = manager.status(device_id).await {
                return Some(status);
            }
        }
        let _ = device_id;
        None
    }

    pub async fn restart_device(&self, device_id: &str) -> Result<()> {
        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            if manager.device(device_id).await.is_some() {
                manager.restart(device_id).await?;
                self.refresh_health().await;
                return Ok(());
            }
        }
        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            if manager.device(device_id).await.is_some() {
                manager.restart(device_id).await?;
                self.refresh_health().await;
                return Ok(());
            }
        }
        Err(SimError::DeviceNotFound {
            device_id: device_id.to_string(),
        })
    }

    /// Stops one device without deallocating its port, leaving it available
    /// for a later `restart_device`. Used to simulate an individual device
    /// failure for health-bucket testing and operator-initiated pauses.
    pub async fn stop_device(&self, device_id: &str) -> Result<()> {
        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            if let Some(device) = manager.device(device_id).await {
                device.stop().await;
                self.refresh_health().await;
                return Ok(());
            }
        }
        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            if let Some(device) = manager.device(device_id).await {
                device.stop().await;
                self.refresh_health().await;
                return Ok(());
            }
        }
        Err(SimError::DeviceNotFound {
            device_id: device_id.to_string(),
        })
    }

    /// Returns the per-device payload an inspection surface would poll for:
    /// the decoded snapshot plus raw register banks for Modbus, the cached
    /// node values for OPC-UA, or the last published payload for MQTT.
    pub async fn device_data(&self, device_id: &str) -> Option<serde_json::Value> {
        #[cfg(feature = "modbus-tcp")]
        if let Some(manager) = &self.modbus {
            if let Some(device) = manager.device(device_id).await {
                return Some(device.register_snapshot().await);
            }
        }
        #[cfg(feature = "opcua")]
        if let Some(manager) = &self.opcua {
            if let Some(device) = manager.device(device_id).await {
                return device.snapshot().await.map(|s| s.as_json());
            }
        }
        #[cfg(feature = "mqtt")]
        if let Some(manager) = &self.mqtt {
            if let Some(snap) = manager.gateway().last_snapshot(device_id).await {
                return Some(snap.as_json());
            }
        }
        let _ = device_id;
        None
    }

    pub async fn allocation_report(&self) -> AllocationReport {
        self.port_manager.generate_allocation_report().await
    }

    pub async fn protocol_summary(&self) -> HashMap<String, ProtocolSummary> {
        let health = self.health.read().await;
        health
            .devices
            .iter()
            .map(|(protocol, devices)| {
                (
                    protocol.clone(),
                    ProtocolSummary {
                        device_count: devices.len(),
                        status: "active",
                        devices: devices.keys().cloned().collect(),
                    },
                )
            })
            .collect()
    }

    pub async fn devices_by_protocol(&self, protocol: &str) -> Vec<DeviceStatus> {
        let health = self.health.read().await;
        health.devices.get(protocol).map(|d| d.values().cloned().collect()).unwrap_or_default()
    }

    pub async fn all_devices(&self) -> Vec<DeviceStatus> {
        let health = self.health.read().await;
        health.devices.values().flat_map(|d| d.values().cloned()).collect()
    }

    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        let health = self.health.read().await;
        PerformanceMetrics {
            total_devices: health.total_devices,
            active_protocols: self.active_protocols.read().await.iter().cloned().collect(),
            port_utilization: health.port_utilization.clone(),
            health_status: health.status,
            healthy_device_percentage: health.health_percentage,
        }
    }

    pub async fn export_all(&self) -> ExportedDeviceData {
        let devices = self.all_devices().await;
        ExportedDeviceData {
            format: "json".into(),
            timestamp_ms: crate::types::now_ms(),
            device_count: devices.len(),
            data: devices,
        }
    }
}
