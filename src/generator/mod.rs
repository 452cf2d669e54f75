//! Realistic data-pattern generator.
//!
//! Each device owns one [`Generator`], seeded deterministically from a hash of
//! its device id so that identical (id, config, clock) triples always produce
//! identical snapshot sequences (specification invariant #6).

mod state_machines;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::hash_map::DefaultHasher;

use crate::types::{Clock, DeviceType, FieldValue, Snapshot};

pub use state_machines::{CncState, PlcState, RobotState};

/// Humidity's inverse-correlation baseline is fixed regardless of the
/// configured temperature center (specification §9, Open Question — preserved
/// for bit-compat).
pub const HUMIDITY_TEMP_BASELINE_C: f64 = 25.0;

fn hash_device_id(device_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    hasher.finish()
}

/// Reads a numeric tuning option out of a device group's free-form `data`
/// map, falling back to `default` when absent or of the wrong shape.
fn opt_f64(data: &HashMap<String, serde_yaml::Value>, key: &str, default: f64) -> f64 {
    data.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

fn opt_range(data: &HashMap<String, serde_yaml::Value>, key: &str, default: (f64, f64)) -> (f64, f64) {
    match data.get(key).and_then(|v| v.as_sequence()) {
        Some(seq) if seq.len() == 2 => {
            let lo = seq[0].as_f64().unwrap_or(default.0);
            let hi = seq[1].as_f64().unwrap_or(default.1);
            (lo, hi)
        }
        _ => default,
    }
}

fn clip(value: f64, range: (f64, f64)) -> f64 {
    value.max(range.0).min(range.1)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Per-device generator state. Owned exclusively by the device that produces
/// from it.
pub struct Generator {
    device_id: String,
    device_type: DeviceType,
    data: HashMap<String, serde_yaml::Value>,
    rng: SmallRng,
    start_ms: u64,
    last_values: HashMap<String, f64>,
    drift_accumulator: HashMap<String, f64>,
    cnc: Option<CncState>,
    plc: Option<PlcState>,
    robot: Option<RobotState>,
}

impl Generator {
    pub fn new(
        device_id: impl Into<String>,
        device_type: DeviceType,
        data: HashMap<String, serde_yaml::Value>,
        clock: &dyn Clock,
    ) -> Self {
        let device_id = device_id.into();
        let seed = hash_device_id(&device_id);
        let mut gen = Self {
            cnc: matches!(device_type, DeviceType::CncMachine).then(CncState::default),
            plc: matches!(device_type, DeviceType::PlcController).then(|| PlcState::new(&data)),
            robot: matches!(device_type, DeviceType::IndustrialRobot).then(RobotState::default),
            device_id,
            device_type,
            data,
            rng: SmallRng::seed_from_u64(seed),
            start_ms: clock.now_ms(),
            last_values: HashMap::new(),
            drift_accumulator: HashMap::new(),
        };
        if matches!(gen.device_type, DeviceType::AssetTracker) {
            gen.last_values.insert("battery_percent".into(), 100.0);
            let base_rssi = opt_f64(&gen.data, "base_rssi", -60.0);
            gen.last_values.insert("base_rssi".into(), base_rssi);
            gen.last_values.insert("zone_index".into(), 0.0);
        }
        if matches!(gen.device_type, DeviceType::EnergyMeter) {
            gen.last_values.insert("energy_kwh".into(), 0.0);
        }
        gen
    }

    /// Produces one snapshot and advances internal state. Never fails; an
    /// unrecognized device type yields the bare common-field preamble.
    pub fn produce(&mut self, clock: &dyn Clock, update_interval_s: f64) -> Snapshot {
        let now_ms = clock.now_ms();
        let mut snap = Snapshot::empty(self.device_id.clone(), self.device_type, now_ms);
        match self.device_type {
            DeviceType::TemperatureSensor => {
                let t = self.gen_temperature(now_ms);
                let h = self.gen_humidity();
                snap.push("temperature", FieldValue::Float(t));
                snap.push("humidity", FieldValue::Float(h));
                snap.push("sensor_status", FieldValue::Int(0));
                snap.push("sensor_healthy", FieldValue::Bool(true));
            }
            DeviceType::PressureTransmitter => {
                let p = self.gen_pressure(now_ms);
                let f = self.gen_flow(p);
                let high_thresh = opt_f64(&self.data, "high_alarm_threshold", 95.0);
                let low_flow_thresh = opt_f64(&self.data, "low_flow_threshold", 5.0);
                snap.push("pressure", FieldValue::Float(p));
                snap.push("flow_rate", FieldValue::Float(f));
                snap.push("high_alarm", FieldValue::Bool(p > high_thresh));
                snap.push("low_flow_alarm", FieldValue::Bool(f < low_flow_thresh));
            }
            DeviceType::MotorDrive => {
                let speed = self.gen_motor_speed(now_ms);
                let torque = self.gen_motor_torque(speed);
                let power = self.gen_motor_power(speed, torque);
                let fault = self.gen_fault_code();
                snap.push("speed", FieldValue::Float(round_to(speed, 1)));
                snap.push("torque", FieldValue::Float(round_to(torque, 1)));
                snap.push("power", FieldValue::Float(round_to(power, 1)));
                snap.push("fault_code", FieldValue::Int(fault));
            }
            DeviceType::EnvironmentalSensor => {
                let t = self.gen_temperature(now_ms);
                let h = self.gen_humidity();
                let aqi = self.gen_ranged_noise("air_quality_index", (0.0, 500.0), 0);
                let co2 = self.gen_ranged_noise("co2_ppm", (400.0, 2000.0), 0);
                let tvoc = self.gen_ranged_noise("tvoc_ppb", (0.0, 2000.0), 0);
                let p_hpa = self.gen_ranged_noise("pressure_hpa", (980.0, 1040.0), 2);
                snap.push("temperature", FieldValue::Float(t));
                snap.push("humidity", FieldValue::Float(h));
                snap.push("air_quality_index", FieldValue::Float(aqi));
                snap.push("co2_ppm", FieldValue::Float(co2));
                snap.push("tvoc_ppb", FieldValue::Float(tvoc));
                snap.push("pressure_hpa", FieldValue::Float(p_hpa));
            }
            DeviceType::EnergyMeter => {
                let voltage = self.gen_ranged_noise("voltage_v", (220.0, 240.0), 2);
                let current = self.gen_ranged_noise("current_a", (0.0, 100.0), 2);
                let pf = clip(self.gen_ranged_noise("power_factor", (0.7, 1.0), 3), (0.7, 1.0));
                let freq = 50.0 + self.normal(0.0, 0.05);
                let power_kw = voltage * current * pf / 1000.0;
                let prior = *self.last_values.get("energy_kwh").unwrap_or(&0.0);
                let energy_kwh = prior + power_kw * (update_interval_s / 3600.0);
                self.last_values.insert("energy_kwh".into(), energy_kwh);
                let phase = self
                    .data
                    .get("phase")
                    .and_then(|v| v.as_str())
                    .unwrap_or("L1-L2-L3")
                    .to_string();
                snap.push("voltage_v", FieldValue::Float(round_to(voltage, 2)));
                snap.push("current_a", FieldValue::Float(round_to(current, 2)));
                snap.push("power_kw", FieldValue::Float(round_to(power_kw, 2)));
                snap.push("power_factor", FieldValue::Float(round_to(pf, 3)));
                snap.push("frequency_hz", FieldValue::Float(round_to(freq, 2)));
                snap.push("energy_kwh", FieldValue::Float(round_to(energy_kwh, 3)));
                snap.push("phase", FieldValue::Text(phase));
            }
            DeviceType::AssetTracker => self.gen_asset_tracker(&mut snap, now_ms),
            DeviceType::GenericSensor => {
                let t = self.gen_temperature(now_ms);
                let h = self.gen_humidity();
                snap.push("temperature", FieldValue::Float(t));
                snap.push("humidity", FieldValue::Float(h));
            }
            DeviceType::CncMachine => {
                let mut cnc = self.cnc.take().unwrap_or_default();
                cnc.tick(&mut self.rng, &self.data, &mut snap);
                self.cnc = Some(cnc);
            }
            DeviceType::PlcController => {
                let mut plc = self.plc.take().unwrap_or_else(|| PlcState::new(&self.data));
                plc.tick(&mut self.rng, &mut snap);
                self.plc = Some(plc);
            }
            DeviceType::IndustrialRobot => {
                let mut robot = self.robot.take().unwrap_or_default();
                let joint_count = opt_f64(&self.data, "joint_count", 6.0) as usize;
                robot.tick(&mut self.rng, joint_count, &mut snap);
                self.robot = Some(robot);
            }
        }
        snap
    }

    fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return mean;
        }
        Normal::new(mean, std_dev).unwrap().sample(&mut self.rng)
    }

    fn gen_ranged_noise(&mut self, name: &str, default_range: (f64, f64), decimals: i32) -> f64 {
        let range = opt_range(&self.data, &format!("{name}_range"), default_range);
        let base = opt_f64(&self.data, &format!("{name}_base"), (range.0 + range.1) / 2.0);
        let noise_sd = opt_f64(&self.data, &format!("{name}_noise_sd"), (range.1 - range.0) * 0.02);
        let value = clip(base + self.normal(0.0, noise_sd), range);
        round_to(value, decimals)
    }

    fn gen_temperature(&mut self, now_ms: u64) -> f64 {
        let range = opt_range(&self.data, "temperature_range", (18.0, 28.0));
        let base = opt_f64(&self.data, "temperature_base", (range.0 + range.1) / 2.0);
        let amplitude = opt_f64(&self.data, "temperature_diurnal_amplitude", 3.0);
        let peak_hour = opt_f64(&self.data, "temperature_peak_hour", 14.0);
        let noise_sd = opt_f64(&self.data, "temperature_noise_sd", 0.3);
        let drift_rate = opt_f64(&self.data, "temperature_drift_per_hour", 0.0);

        let elapsed_h = (now_ms.saturating_sub(self.start_ms)) as f64 / 3_600_000.0;
        let hour_of_day = (elapsed_h % 24.0 + peak_hour - 12.0).rem_euclid(24.0);
        let diurnal = amplitude * (std::f64::consts::TAU * (hour_of_day - peak_hour) / 24.0).cos();

        let drift_value = {
            let acc = self.drift_accumulator.entry("temperature".into()).or_insert(0.0);
            *acc += drift_rate / 3600.0;
            if elapsed_h.rem_euclid(730.0) < 1e-6 {
                *acc = 0.0;
            }
            *acc
        };

        let heating = self
            .data
            .get("heating_windows")
            .and_then(|v| v.as_sequence())
            .map(|windows| in_any_window(windows, hour_of_day))
            .unwrap_or(false);
        let boost = if heating { opt_f64(&self.data, "heating_boost", 2.0) } else { 0.0 };

        let value = clip(base + diurnal + boost + drift_value + self.normal(0.0, noise_sd), range);
        let rounded = round_to(value, 2);
        self.last_values.insert("temperature".into(), rounded);
        rounded
    }

    fn gen_humidity(&mut self) -> f64 {
        let range = opt_range(&self.data, "humidity_range", (30.0, 70.0));
        let base = opt_f64(&self.data, "humidity_base", (range.0 + range.1) / 2.0);
        let factor = opt_f64(&self.data, "humidity_correlation_factor", -1.2);
        let noise_sd = opt_f64(&self.data, "humidity_noise_sd", 1.5);
        let last_temp = *self.last_values.get("temperature").unwrap_or(&HUMIDITY_TEMP_BASELINE_C);
        let value = clip(
            base + factor * (last_temp - HUMIDITY_TEMP_BASELINE_C) + self.normal(0.0, noise_sd),
            range,
        );
        round_to(value, 2)
    }

    fn gen_pressure(&mut self, now_ms: u64) -> f64 {
        let range = opt_range(&self.data, "pressure_range", (0.0, 100.0));
        let base = opt_f64(&self.data, "pressure_base", (range.0 + range.1) / 2.0);
        let amplitude = opt_f64(&self.data, "pressure_cycle_amplitude", 5.0);
        let period_s = opt_f64(&self.data, "pressure_cycle_period_s", 300.0).max(1.0);
        let noise_sd = opt_f64(&self.data, "pressure_noise_sd", 0.5);
        let load_factor = opt_f64(&self.data, "pressure_load_factor", 2.0);

        let elapsed_s = (now_ms.saturating_sub(self.start_ms)) as f64 / 1000.0;
        let cycle = amplitude * (std::f64::consts::TAU * (elapsed_s % period_s) / period_s).sin();
        let load: f64 = self.rng.random_range(-load_factor..load_factor);
        let value = clip(base + cycle + load + self.normal(0.0, noise_sd), range);
        let rounded = round_to(value, 2);
        self.last_values.insert("pressure".into(), rounded);
        rounded
    }

    fn gen_flow(&mut self, pressure: f64) -> f64 {
        let range = opt_range(&self.data, "flow_range", (0.0, 50.0));
        let base = opt_f64(&self.data, "flow_base", (range.0 + range.1) / 2.0);
        let corr = opt_f64(&self.data, "flow_pressure_correlation", 0.3);
        let noise_sd = opt_f64(&self.data, "flow_noise_sd", 0.4);
        let value = clip(base + corr * pressure + self.normal(0.0, noise_sd), range);
        round_to(value, 2)
    }

    fn gen_motor_speed(&mut self, now_ms: u64) -> f64 {
        let range = opt_range(&self.data, "speed_range", (0.0, 1800.0));
        let base = opt_f64(&self.data, "speed_base", range.1 * 0.8);
        let load_sd = opt_f64(&self.data, "speed_load_sd", 0.02);
        let vib_amp = opt_f64(&self.data, "speed_vibration_amplitude", 5.0);
        let vib_freq = opt_f64(&self.data, "speed_vibration_freq_hz", 1.0);
        let elapsed_s = (now_ms.saturating_sub(self.start_ms)) as f64 / 1000.0;
        let vibration = vib_amp * (std::f64::consts::TAU * vib_freq * elapsed_s).sin();
        let value = clip(base * (1.0 + self.normal(0.0, load_sd)) + vibration, range);
        self.last_values.insert("speed".into(), value);
        value
    }

    fn gen_motor_torque(&mut self, speed: f64) -> f64 {
        let range = opt_range(&self.data, "torque_range", (0.0, 100.0));
        let base = opt_f64(&self.data, "torque_base", (range.0 + range.1) / 2.0);
        let load_sd = opt_f64(&self.data, "torque_load_sd", 0.03);
        let value = clip(base * (1.2 - 0.4 * speed / 1800.0) + self.normal(0.0, base * load_sd), range);
        self.last_values.insert("torque".into(), value);
        value
    }

    fn gen_motor_power(&mut self, speed: f64, torque: f64) -> f64 {
        let range = opt_range(&self.data, "power_range", (0.0, 50.0));
        let raw_kw = torque * speed / 9549.0;
        let efficiency = clip(self.normal(0.95, 0.05), (0.5, 1.0));
        let electrical_noise = self.normal(0.0, raw_kw.abs() * 0.01);
        clip(raw_kw * efficiency + electrical_noise, range)
    }

    fn gen_fault_code(&mut self) -> i64 {
        let p = opt_f64(&self.data, "fault_probability", 1e-3);
        if self.rng.random::<f64>() >= p {
            return 0;
        }
        let codes: Vec<i64> = self
            .data
            .get("fault_codes")
            .and_then(|v| v.as_sequence())
            .map(|seq| seq.iter().filter_map(|v| v.as_i64()).collect())
            .filter(|v: &Vec<i64>| !v.is_empty())
            .unwrap_or_else(|| vec![1, 2, 3, 4]);
        codes[self.rng.random_range(0..codes.len())]
    }

    fn gen_asset_tracker(&mut self, snap: &mut Snapshot, _now_ms: u64) {
        let zones: Vec<String> = self
            .data
            .get("zones")
            .and_then(|v| v.as_sequence())
            .map(|seq| seq.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .filter(|v: &Vec<String>| !v.is_empty())
            .unwrap_or_else(|| vec!["zone_a".into(), "zone_b".into(), "zone_c".into()]);
        let gateways: Vec<String> = self
            .data
            .get("gateways")
            .and_then(|v| v.as_sequence())
            .map(|seq| seq.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_else(|| zones.iter().map(|z| format!("gw_{z}")).collect());

        let mut zone_idx = *self.last_values.get("zone_index").unwrap_or(&0.0) as usize % zones.len().max(1);
        if self.rng.random::<f64>() < 0.10 && zones.len() > 1 {
            let mut candidate = self.rng.random_range(0..zones.len());
            while candidate == zone_idx {
                candidate = self.rng.random_range(0..zones.len());
            }
            zone_idx = candidate;
        }
        self.last_values.insert("zone_index".into(), zone_idx as f64);

        let battery = (*self.last_values.get("battery_percent").unwrap_or(&100.0)
            - self.rng.random_range(0.0..0.05))
        .max(0.0);
        self.last_values.insert("battery_percent".into(), battery);

        let base_rssi = *self.last_values.get("base_rssi").unwrap_or(&-60.0);
        let rssi = clip(base_rssi + self.normal(0.0, 3.0), (-100.0, -30.0));

        let hour = ((_now_ms.saturating_sub(self.start_ms)) as f64 / 3_600_000.0).rem_euclid(24.0);
        let work_hours = (8.0..18.0).contains(&hour);
        let motion_p = if work_hours { 0.6 } else { 0.05 };
        let motion = self.rng.random::<f64>() < motion_p;

        let asset_id = format!("asset_{}", &self.device_id);
        snap.push("asset_id", FieldValue::Text(asset_id));
        snap.push("zone_id", FieldValue::Text(zones[zone_idx].clone()));
        snap.push("rssi", FieldValue::Float(round_to(rssi, 1)));
        snap.push("battery_percent", FieldValue::Float(round_to(battery, 1)));
        snap.push("motion_detected", FieldValue::Bool(motion));
        let gw = gateways.get(zone_idx.min(gateways.len().saturating_sub(1))).cloned().unwrap_or_default();
        snap.push("last_seen_gateway", FieldValue::Text(gw));
    }
}

fn in_any_window(windows: &[serde_yaml::Value], hour_of_day: f64) -> bool {
    windows.iter().any(|w| {
        let Some(s) = w.as_str() else { return false };
        let Some((start, end)) = s.split_once('-') else { return false };
        let (Some(start_h), Some(end_h)) = (parse_hhmm(start), parse_hhmm(end)) else {
            return false;
        };
        if start_h <= end_h {
            (start_h..end_h).contains(&hour_of_day)
        } else {
            hour_of_day >= start_h || hour_of_day < end_h
        }
    })
}

fn parse_hhmm(s: &str) -> Option<f64> {
    let (h, m) = s.split_once(':')?;
    let h: f64 = h.parse().ok()?;
    let m: f64 = m.parse().ok()?;
    Some(h + m / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SystemClock;

    fn empty_data() -> HashMap<String, serde_yaml::Value> {
        HashMap::new()
    }

    #[test]
    fn test_determinism() {
        let clock = SystemClock;
        let mut g1 = Generator::new("dev-a", DeviceType::TemperatureSensor, empty_data(), &clock);
        let mut g2 = Generator::new("dev-a", DeviceType::TemperatureSensor, empty_data(), &clock);
        // Same seed derivation from device id means the RNG streams match
        // call-for-call even though wall-clock components are shared via the
        // same clock instance.
        for _ in 0..20 {
            let s1 = g1.produce(&clock, 1.0);
            let s2 = g2.produce(&clock, 1.0);
            assert_eq!(s1.get("temperature"), s2.get("temperature"));
        }
    }

    #[test]
    fn test_value_ranges_clipped() {
        let clock = SystemClock;
        let mut g = Generator::new("dev-b", DeviceType::PressureTransmitter, empty_data(), &clock);
        for _ in 0..2000 {
            let s = g.produce(&clock, 1.0);
            let p = s.get("pressure").unwrap().as_f64().unwrap();
            assert!((0.0..=100.0).contains(&p));
        }
    }

    #[test]
    fn test_motor_fault_code_zero_when_disabled() {
        let clock = SystemClock;
        let mut data = empty_data();
        data.insert("fault_probability".into(), serde_yaml::Value::from(0.0));
        let mut g = Generator::new("dev-c", DeviceType::MotorDrive, data, &clock);
        for _ in 0..500 {
            let s = g.produce(&clock, 1.0);
            assert_eq!(s.get("fault_code").unwrap().as_f64(), Some(0.0));
        }
    }

    #[test]
    fn test_asset_tracker_battery_monotone_nonincreasing() {
        let clock = SystemClock;
        let mut g = Generator::new("dev-d", DeviceType::AssetTracker, empty_data(), &clock);
        let mut last = 101.0;
        for _ in 0..200 {
            let s = g.produce(&clock, 1.0);
            let b = s.get("battery_percent").unwrap().as_f64().unwrap();
            assert!(b <= last);
            last = b;
        }
    }
}
