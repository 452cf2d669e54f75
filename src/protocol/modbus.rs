//! Modbus TCP server device.
//!
//! Each device owns a single-unit Modbus TCP server bound to its allocated
//! port; register contents are refreshed on every generator tick under a
//! shared lock and served from a [`tokio_modbus::server::Service`]
//! implementation (specification §4.3.1).

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tokio_modbus::server::Service;
use tokio_modbus::{ExceptionCode, Request, Response};

use crate::config::DeviceGroupConfig;
use crate::error::{Result, SimError};
use crate::generator::Generator;
use crate::protocol::{DeviceStatus, ProtocolDevice};
use crate::types::{now_ms, DeviceType, FieldValue, HealthRecord, Snapshot, SystemClock};

const REGISTER_BANK_SIZE: usize = 100;

/// Raw register contents plus the decoded snapshot that produced them.
struct RegisterState {
    holding: [u16; REGISTER_BANK_SIZE],
    discrete: [bool; REGISTER_BANK_SIZE],
    snapshot: Option<Snapshot>,
}

impl Default for RegisterState {
    fn default() -> Self {
        Self {
            holding: [0; REGISTER_BANK_SIZE],
            discrete: [false; REGISTER_BANK_SIZE],
            snapshot: None,
        }
    }
}

/// Encodes a snapshot into holding registers / discrete inputs per the
/// specification's per-type table, falling back to a generic overflow
/// mapping for device types the table doesn't enumerate.
fn encode(device_type: DeviceType, snap: &Snapshot) -> ([u16; REGISTER_BANK_SIZE], [bool; REGISTER_BANK_SIZE]) {
    let mut holding = [0u16; REGISTER_BANK_SIZE];
    let mut discrete = [false; REGISTER_BANK_SIZE];

    let scaled = |name: &str| -> i64 {
        snap.get(name).and_then(|v| v.as_f64()).map(|v| (v * 100.0).round() as i64).unwrap_or(0)
    };
    let bool_of = |name: &str| -> bool { snap.get(name).and_then(|v| v.as_bool()).unwrap_or(false) };

    match device_type {
        DeviceType::TemperatureSensor => {
            holding[0] = scaled("temperature") as u16;
            holding[1] = scaled("humidity") as u16;
            holding[2] = snap.get("sensor_status").and_then(|v| v.as_f64()).unwrap_or(0.0) as u16;
            discrete[0] = bool_of("sensor_healthy");
        }
        DeviceType::PressureTransmitter => {
            holding[0] = scaled("pressure") as u16;
            holding[1] = scaled("flow_rate") as u16;
            discrete[0] = bool_of("high_alarm");
            discrete[1] = bool_of("low_flow_alarm");
        }
        DeviceType::MotorDrive => {
            holding[0] = snap.get("speed").and_then(|v| v.as_f64()).unwrap_or(0.0) as u16;
            holding[1] = scaled("torque") as u16;
            holding[2] = scaled("power") as u16;
            holding[3] = snap.get("fault_code").and_then(|v| v.as_f64()).unwrap_or(0.0) as u16;
        }
        _ => {
            // Generic overflow mapping: numeric fields into holding registers
            // in emission order, booleans into discrete inputs, both clamped
            // to the first REGISTER_BANK_SIZE slots.
            let mut hr_idx = 0usize;
            let mut di_idx = 0usize;
            for (_, value) in &snap.fields {
                match value {
                    FieldValue::Bool(b) => {
                        if di_idx < REGISTER_BANK_SIZE {
                            discrete[di_idx] = *b;
                            di_idx += 1;
                        }
                    }
                    FieldValue::Float(_) | FieldValue::Int(_) => {
                        if hr_idx < REGISTER_BANK_SIZE {
                            let v = value.as_f64().unwrap_or(0.0);
                            holding[hr_idx] = (v * 100.0).round() as i64 as u16;
                            hr_idx += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    (holding, discrete)
}

struct ModbusService {
    state: Arc<RwLock<RegisterState>>,
}

impl Service for ModbusService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<std::result::Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let state = self.state.try_read();
        let result = match (req, state) {
            (Request::ReadHoldingRegisters(addr, cnt), Ok(state)) => {
                let addr = addr as usize;
                let cnt = cnt as usize;
                if addr + cnt > REGISTER_BANK_SIZE {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    Ok(Response::ReadHoldingRegisters(state.holding[addr..addr + cnt].to_vec()))
                }
            }
            (Request::ReadInputRegisters(addr, cnt), Ok(state)) => {
                let addr = addr as usize;
                let cnt = cnt as usize;
                if addr + cnt > REGISTER_BANK_SIZE {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    Ok(Response::ReadInputRegisters(state.holding[addr..addr + cnt].to_vec()))
                }
            }
            (Request::ReadDiscreteInputs(addr, cnt), Ok(state)) => {
                let addr = addr as usize;
                let cnt = cnt as usize;
                if addr + cnt > REGISTER_BANK_SIZE {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    Ok(Response::ReadDiscreteInputs(state.discrete[addr..addr + cnt].to_vec()))
                }
            }
            (Request::ReadCoils(addr, cnt), Ok(state)) => {
                let addr = addr as usize;
                let cnt = cnt as usize;
                if addr + cnt > REGISTER_BANK_SIZE {
                    Err(ExceptionCode::IllegalDataAddress)
                } else {
                    Ok(Response::ReadCoils(state.discrete[addr..addr + cnt].to_vec()))
                }
            }
            (_, Err(_)) => Err(ExceptionCode::ServerDeviceBusy),
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(result)
    }
}

/// One simulated device exposed as a Modbus TCP server.
pub struct ModbusDevice {
    device_id: String,
    device_type: DeviceType,
    port: u16,
    update_interval_s: f64,
    group: DeviceGroupConfig,
    state: Arc<RwLock<RegisterState>>,
    health: Arc<RwLock<HealthRecord>>,
    server_handle: RwLock<Option<JoinHandle<()>>>,
    ticker_handle: RwLock<Option<JoinHandle<()>>>,
}

impl ModbusDevice {
    pub fn new(device_id: impl Into<String>, device_type: DeviceType, port: u16, group: DeviceGroupConfig) -> Self {
        let device_id = device_id.into();
        Self {
            health: Arc::new(RwLock::new(HealthRecord::new(device_id.clone()))),
            device_id,
            device_type,
            port,
            update_interval_s: group.update_interval,
            group,
            state: Arc::new(RwLock::new(RegisterState::default())),
            server_handle: RwLock::new(None),
            ticker_handle: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ProtocolDevice for ModbusDevice {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.port).parse().map_err(|e| SimError::EndpointBindFailure {
            device_id: self.device_id.clone(),
            protocol: "modbus".into(),
            port: self.port,
            reason: format!("{e}"),
        })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| SimError::EndpointBindFailure {
            device_id: self.device_id.clone(),
            protocol: "modbus".into(),
            port: self.port,
            reason: format!("{e}"),
        })?;

        let state = self.state.clone();
        let server = Server::new(listener);
        let server_handle = tokio::spawn(async move {
            let new_service = {
                let state = state.clone();
                move |_socket_addr| Ok(Some(ModbusService { state: state.clone() }))
            };
            let on_connected = move |stream, socket_addr| {
                let new_service = new_service.clone();
                async move { accept_tcp_connection(stream, socket_addr, new_service) }
            };
            let on_process_error = |err| tracing::warn!(%err, "modbus connection error");
            if let Err(err) = server.serve(&on_connected, on_process_error).await {
                tracing::error!(%err, "modbus server exited");
            }
        });

        let device_id = self.device_id.clone();
        let device_type = self.device_type;
        let state = self.state.clone();
        let health = self.health.clone();
        let update_interval_s = self.update_interval_s;
        let data = self.group.data.clone();
        let ticker_handle = tokio::spawn(async move {
            let clock = SystemClock;
            let mut generator = Generator::new(device_id.clone(), device_type, data, &clock);
            let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(update_interval_s.max(0.01)));
            loop {
                interval.tick().await;
                let snap = generator.produce(&clock, update_interval_s);
                let (holding, discrete) = encode(device_type, &snap);
                {
                    let mut st = state.write().await;
                    st.holding = holding;
                    st.discrete = discrete;
                    st.snapshot = Some(snap);
                }
                health.write().await.mark_tick(now_ms(), false);
            }
        });

        *self.server_handle.write().await = Some(server_handle);
        *self.ticker_handle.write().await = Some(ticker_handle);
        self.health.write().await.mark_started(now_ms());
        tracing::info!(device_id = %self.device_id, port = self.port, "modbus device started");
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
        tracing::info!(device_id = %self.device_id, "modbus device stopped");
    }

    async fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device_id: self.device_id.clone(),
            device_type: self.device_type.as_str().into(),
            protocol: "modbus".into(),
            port: Some(self.port),
            health: self.health.read().await.clone(),
            update_interval_s: self.update_interval_s,
        }
    }

    async fn snapshot(&self) -> Option<Snapshot> {
        self.state.read().await.snapshot.clone()
    }
}

impl ModbusDevice {
    /// Both the decoded semantic snapshot and the raw register banks it was
    /// encoded into (specification §4.3.1), for inspection surfaces that
    /// need to see what's actually sitting in the registers.
    pub async fn register_snapshot(&self) -> serde_json::Value {
        let state = self.state.read().await;
        serde_json::json!({
            "decoded": state.snapshot.as_ref().map(|s| s.as_json()),
            "registers": {
                "holding": state.holding.to_vec(),
                "discrete": state.discrete.to_vec(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    #[test]
    fn test_encode_temperature_sensor() {
        let mut snap = Snapshot::empty("modbus_temperature_sensors_000", DeviceType::TemperatureSensor, 0);
        snap.push("temperature", FieldValue::Float(24.37));
        snap.push("humidity", FieldValue::Float(55.0));
        snap.push("sensor_status", FieldValue::Int(0));
        snap.push("sensor_healthy", FieldValue::Bool(true));
        let (hr, di) = encode(DeviceType::TemperatureSensor, &snap);
        assert_eq!(hr[0], 2437);
        assert_eq!(hr[1], 5500);
        assert_eq!(hr[2], 0);
        assert!(di[0]);
    }

    #[test]
    fn test_encode_motor_drive_fault_code() {
        let mut snap = Snapshot::empty("modbus_motor_drives_000", DeviceType::MotorDrive, 0);
        snap.push("speed", FieldValue::Float(1500.0));
        snap.push("torque", FieldValue::Float(40.0));
        snap.push("power", FieldValue::Float(10.0));
        snap.push("fault_code", FieldValue::Int(0));
        let (hr, _) = encode(DeviceType::MotorDrive, &snap);
        assert_eq!(hr[3], 0);
    }
}
