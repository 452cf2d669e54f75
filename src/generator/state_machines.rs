//! CNC / PLC / robot state machines (specification §4.1).

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::Rng;

use crate::types::{FieldValue, Snapshot};

fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

// =============================================================================
// CNC machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CncMode {
    Running,
    Idle,
    Error,
    Setup,
}

impl CncMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Idle => "IDLE",
            Self::Error => "ERROR",
            Self::Setup => "SETUP",
        }
    }
}

pub struct CncState {
    mode: CncMode,
    state_ticks: u32,
    spindle_speed: f64,
    feed_rate: f64,
    tool_wear_pct: f64,
    part_count: i64,
    axis: [f64; 3],
    program_name: String,
    t: u64,
}

impl Default for CncState {
    fn default() -> Self {
        Self {
            mode: CncMode::Running,
            state_ticks: 0,
            spindle_speed: 2000.0,
            feed_rate: 150.0,
            tool_wear_pct: 0.0,
            part_count: 0,
            axis: [0.0; 3],
            program_name: "PROGRAM_001".into(),
            t: 0,
        }
    }
}

impl CncState {
    pub fn tick(&mut self, rng: &mut SmallRng, data: &HashMap<String, serde_yaml::Value>, snap: &mut Snapshot) {
        self.t += 1;
        self.state_ticks += 1;

        let prior_mode = self.mode;
        self.mode = match self.mode {
            CncMode::Running => {
                if rng.random::<f64>() < 0.005 {
                    CncMode::Error
                } else if rng.random::<f64>() < 0.010 {
                    CncMode::Idle
                } else {
                    CncMode::Running
                }
            }
            CncMode::Idle => {
                if rng.random::<f64>() < 0.15 {
                    CncMode::Running
                } else if rng.random::<f64>() < 0.03 {
                    CncMode::Setup
                } else {
                    CncMode::Idle
                }
            }
            CncMode::Error => {
                if self.state_ticks > 5 && rng.random::<f64>() < 0.25 {
                    CncMode::Idle
                } else {
                    CncMode::Error
                }
            }
            CncMode::Setup => {
                if self.state_ticks > 3 && rng.random::<f64>() < 0.20 {
                    let programs: Vec<String> = data
                        .get("program_names")
                        .and_then(|v| v.as_sequence())
                        .map(|seq| seq.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                        .filter(|v: &Vec<String>| !v.is_empty())
                        .unwrap_or_else(|| vec!["PROGRAM_001".into(), "PROGRAM_002".into(), "PROGRAM_003".into()]);
                    self.program_name = programs[rng.random_range(0..programs.len())].clone();
                    CncMode::Running
                } else {
                    CncMode::Setup
                }
            }
        };
        if self.mode != prior_mode {
            self.state_ticks = 0;
        }

        let target_speed = 2000.0 + rng.random_range(-100.0..100.0);
        let target_feed = 150.0 + rng.random_range(-10.0..10.0);
        match self.mode {
            CncMode::Running => {
                self.spindle_speed += 0.3 * (target_speed - self.spindle_speed);
                self.feed_rate += 0.3 * (target_feed - self.feed_rate);
                self.tool_wear_pct += data.get("wear_rate").and_then(|v| v.as_f64()).unwrap_or(0.01)
                    + rng.sample::<f64, _>(rand_distr::Normal::new(0.0, 0.003).unwrap());
                self.tool_wear_pct = self.tool_wear_pct.max(0.0);
                if self.tool_wear_pct >= 90.0 {
                    self.tool_wear_pct = 0.0;
                    self.mode = CncMode::Setup;
                    self.state_ticks = 0;
                }
                if rng.random::<f64>() < 0.08 {
                    self.part_count += 1;
                }
                let phase = self.t as f64 * 0.1;
                self.axis[0] = 50.0 * phase.sin();
                self.axis[1] = 50.0 * (2.0 * phase).sin();
                self.axis[2] = 10.0 * phase.cos();
            }
            CncMode::Setup => {
                self.spindle_speed *= 0.7;
                self.feed_rate *= 0.7;
                self.axis = [0.0, 0.0, 0.0];
            }
            CncMode::Idle | CncMode::Error => {
                self.spindle_speed *= 0.7;
                self.feed_rate *= 0.7;
            }
        }

        snap.push("spindle_speed", FieldValue::Float((self.spindle_speed * 10.0).round() / 10.0));
        snap.push("feed_rate", FieldValue::Float((self.feed_rate * 10.0).round() / 10.0));
        snap.push("tool_wear_percent", FieldValue::Float(clip(self.tool_wear_pct, 0.0, 100.0)));
        snap.push("part_count", FieldValue::Int(self.part_count));
        snap.push("axis_position_x", FieldValue::Float((self.axis[0] * 100.0).round() / 100.0));
        snap.push("axis_position_y", FieldValue::Float((self.axis[1] * 100.0).round() / 100.0));
        snap.push("axis_position_z", FieldValue::Float((self.axis[2] * 100.0).round() / 100.0));
        snap.push("program_name", FieldValue::Text(self.program_name.clone()));
        snap.push("machine_state", FieldValue::Text(self.mode.as_str().to_string()));
    }
}

// =============================================================================
// PLC process controller
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcMode {
    Auto,
    Manual,
    Cascade,
}

impl PlcMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
            Self::Cascade => "CASCADE",
        }
    }
}

pub struct PlcState {
    mode: PlcMode,
    setpoint: f64,
    pv: f64,
    integral: f64,
    last_error: f64,
    range: (f64, f64),
    kp: f64,
    ki: f64,
    kd: f64,
    manual_output: f64,
}

impl PlcState {
    pub fn new(data: &HashMap<String, serde_yaml::Value>) -> Self {
        let range = match data.get("process_value_range").and_then(|v| v.as_sequence()) {
            Some(seq) if seq.len() == 2 => (
                seq[0].as_f64().unwrap_or(0.0),
                seq[1].as_f64().unwrap_or(100.0),
            ),
            _ => (0.0, 100.0),
        };
        Self {
            mode: PlcMode::Auto,
            setpoint: data.get("setpoint").and_then(|v| v.as_f64()).unwrap_or((range.0 + range.1) / 2.0),
            pv: (range.0 + range.1) / 2.0,
            integral: 0.0,
            last_error: 0.0,
            range,
            kp: data.get("kp").and_then(|v| v.as_f64()).unwrap_or(2.0),
            ki: data.get("ki").and_then(|v| v.as_f64()).unwrap_or(0.5),
            kd: data.get("kd").and_then(|v| v.as_f64()).unwrap_or(0.1),
            manual_output: data.get("manual_output").and_then(|v| v.as_f64()).unwrap_or(50.0),
        }
    }

    pub fn tick(&mut self, rng: &mut SmallRng, snap: &mut Snapshot) {
        self.mode = match self.mode {
            PlcMode::Auto => {
                if rng.random::<f64>() < 0.005 {
                    PlcMode::Manual
                } else if rng.random::<f64>() < 0.003 {
                    PlcMode::Cascade
                } else {
                    PlcMode::Auto
                }
            }
            PlcMode::Manual => {
                if rng.random::<f64>() < 0.08 {
                    PlcMode::Auto
                } else {
                    PlcMode::Manual
                }
            }
            PlcMode::Cascade => {
                if rng.random::<f64>() < 0.03 {
                    PlcMode::Auto
                } else {
                    PlcMode::Cascade
                }
            }
        };

        if rng.random::<f64>() < 0.01 {
            let delta = rng.random_range(-5.0..5.0);
            self.setpoint = clip(self.setpoint + delta, self.range.0 + 10.0, self.range.1 - 10.0);
        }

        let (control_output, noise_sd) = match self.mode {
            PlcMode::Manual => (self.manual_output, 1.0),
            PlcMode::Auto | PlcMode::Cascade => {
                let error = self.setpoint - self.pv;
                self.integral = clip(self.integral + self.ki * error, -50.0, 50.0);
                let derivative = error - self.last_error;
                let u = clip(self.kp * error + self.integral + self.kd * derivative, 0.0, 100.0);
                self.last_error = error;
                (u, 2.0)
            }
        };

        let noise: f64 = rng.sample(rand_distr::Normal::new(0.0, noise_sd).unwrap());
        let delta = if matches!(self.mode, PlcMode::Manual) {
            noise
        } else {
            0.1 * control_output - 5.0 + noise
        };
        self.pv = clip(self.pv + delta, self.range.0, self.range.1);

        let high_alarm = self.pv > 0.9 * self.range.1;
        let low_alarm = self.pv < 0.1 * self.range.1;

        snap.push("process_value", FieldValue::Float((self.pv * 100.0).round() / 100.0));
        snap.push("setpoint", FieldValue::Float((self.setpoint * 100.0).round() / 100.0));
        snap.push("control_output", FieldValue::Float((control_output * 100.0).round() / 100.0));
        snap.push("mode", FieldValue::Text(self.mode.as_str().to_string()));
        snap.push("high_alarm", FieldValue::Bool(high_alarm));
        snap.push("low_alarm", FieldValue::Bool(low_alarm));
        snap.push("integral_term", FieldValue::Float((self.integral * 100.0).round() / 100.0));
        snap.push("derivative_term", FieldValue::Float((self.last_error * 100.0).round() / 100.0));
        snap.push("error", FieldValue::Float((self.last_error * 100.0).round() / 100.0));
    }
}

// =============================================================================
// Industrial robot
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotMode {
    Running,
    Paused,
    Stopped,
}

impl RobotMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
        }
    }
}

pub struct RobotState {
    mode: RobotMode,
    state_ticks: u32,
    joint_angles: Vec<f64>,
    joint_targets: Vec<f64>,
    tcp: [f64; 3],
    tcp_orient: [f64; 3],
    cycle_time_s: f64,
    cycle_count: i64,
    payload_kg: f64,
    speed_pct: f64,
    t: u64,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            mode: RobotMode::Running,
            state_ticks: 0,
            joint_angles: vec![0.0; 6],
            joint_targets: vec![0.0; 6],
            tcp: [0.0; 3],
            tcp_orient: [0.0; 3],
            cycle_time_s: 0.0,
            cycle_count: 0,
            payload_kg: 5.0,
            speed_pct: 100.0,
            t: 0,
        }
    }
}

impl RobotState {
    pub fn tick(&mut self, rng: &mut SmallRng, joint_count: usize, snap: &mut Snapshot) {
        let joint_count = joint_count.max(1);
        if self.joint_angles.len() != joint_count {
            self.joint_angles = vec![0.0; joint_count];
            self.joint_targets = vec![0.0; joint_count];
        }
        self.t += 1;
        self.state_ticks += 1;

        let prior_mode = self.mode;
        self.mode = match self.mode {
            RobotMode::Running => {
                if rng.random::<f64>() < 0.008 {
                    RobotMode::Paused
                } else if rng.random::<f64>() < 0.003 {
                    RobotMode::Stopped
                } else {
                    RobotMode::Running
                }
            }
            RobotMode::Paused => {
                if self.state_ticks > 3 && rng.random::<f64>() < 0.20 {
                    RobotMode::Running
                } else {
                    RobotMode::Paused
                }
            }
            RobotMode::Stopped => {
                if self.state_ticks > 5 && rng.random::<f64>() < 0.12 {
                    RobotMode::Running
                } else {
                    RobotMode::Stopped
                }
            }
        };
        if self.mode != prior_mode {
            self.state_ticks = 0;
        }

        if matches!(self.mode, RobotMode::Running) {
            let mut all_within = true;
            for i in 0..joint_count {
                let diff = self.joint_targets[i] - self.joint_angles[i];
                let step = diff.clamp(-3.0, 3.0) + rng.random_range(-0.2..0.2);
                self.joint_angles[i] = clip(self.joint_angles[i] + step, -180.0, 180.0);
                if (self.joint_targets[i] - self.joint_angles[i]).abs() > 5.0 {
                    all_within = false;
                }
            }
            if all_within {
                for t in self.joint_targets.iter_mut() {
                    *t = rng.random_range(-180.0..180.0);
                }
                self.cycle_count += 1;
            }
            let phase = self.t as f64 * 0.05;
            self.tcp = [300.0 * phase.sin(), 300.0 * phase.cos(), 200.0 + 50.0 * (phase * 2.0).sin()];
            self.tcp_orient = [10.0 * phase.sin(), 10.0 * phase.cos(), 5.0 * phase.sin()];
            self.cycle_time_s = 2.0 + rng.random_range(-0.1..0.1);
            if rng.random::<f64>() < 0.05 {
                self.payload_kg = rng.random_range(0.0..25.0);
            }
        } else {
            for v in self.tcp.iter_mut().chain(self.tcp_orient.iter_mut()) {
                *v += rng.random_range(-0.05..0.05);
            }
        }

        snap.push(
            "joint_angles",
            FieldValue::Vector(self.joint_angles.iter().map(|v| (v * 100.0).round() / 100.0).collect()),
        );
        for (i, angle) in self.joint_angles.iter().enumerate() {
            snap.push(format!("joint_angle_{}", i + 1), FieldValue::Float((angle * 100.0).round() / 100.0));
        }
        snap.push("tcp_position_x", FieldValue::Float((self.tcp[0] * 100.0).round() / 100.0));
        snap.push("tcp_position_y", FieldValue::Float((self.tcp[1] * 100.0).round() / 100.0));
        snap.push("tcp_position_z", FieldValue::Float((self.tcp[2] * 100.0).round() / 100.0));
        snap.push("tcp_orientation_rx", FieldValue::Float((self.tcp_orient[0] * 100.0).round() / 100.0));
        snap.push("tcp_orientation_ry", FieldValue::Float((self.tcp_orient[1] * 100.0).round() / 100.0));
        snap.push("tcp_orientation_rz", FieldValue::Float((self.tcp_orient[2] * 100.0).round() / 100.0));
        snap.push("program_state", FieldValue::Text(self.mode.as_str().to_string()));
        snap.push("cycle_time", FieldValue::Float((self.cycle_time_s * 100.0).round() / 100.0));
        snap.push("cycle_count", FieldValue::Int(self.cycle_count));
        snap.push("payload_kg", FieldValue::Float((self.payload_kg * 100.0).round() / 100.0));
        snap.push("speed_percent", FieldValue::Float(self.speed_pct));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceType, Snapshot};
    use rand::SeedableRng;

    #[test]
    fn test_cnc_reaches_every_state() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut cnc = CncState::default();
        let data = HashMap::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let mut snap = Snapshot::empty("cnc-0", DeviceType::CncMachine, 0);
            cnc.tick(&mut rng, &data, &mut snap);
            if let Some(FieldValue::Text(state)) = snap.get("machine_state") {
                seen.insert(state.clone());
            }
        }
        assert_eq!(seen.len(), 4, "expected all four CNC states to be reachable, saw {seen:?}");
    }

    #[test]
    fn test_plc_converges_near_setpoint() {
        let mut rng = SmallRng::seed_from_u64(7);
        let data = HashMap::new();
        let mut plc = PlcState::new(&data);
        plc.setpoint = 50.0;
        let mut last_500 = Vec::new();
        for i in 0..2000 {
            let mut snap = Snapshot::empty("plc-0", DeviceType::PlcController, 0);
            plc.tick(&mut rng, &mut snap);
            if i >= 1500 {
                if let Some(FieldValue::Float(pv)) = snap.get("process_value") {
                    last_500.push(*pv);
                }
            }
        }
        let mean: f64 = last_500.iter().sum::<f64>() / last_500.len() as f64;
        assert!((mean - 50.0).abs() <= 3.0, "PID mean {mean} too far from setpoint");
    }

    #[test]
    fn test_robot_cycle_count_monotonic() {
        let mut rng = SmallRng::seed_from_u64(99);
        let mut robot = RobotState::default();
        let mut last = 0;
        let mut increased = false;
        for _ in 0..2000 {
            let mut snap = Snapshot::empty("robot-0", DeviceType::IndustrialRobot, 0);
            robot.tick(&mut rng, 6, &mut snap);
            if let Some(FieldValue::Int(count)) = snap.get("cycle_count") {
                assert!(*count >= last);
                if *count > last {
                    increased = true;
                }
                last = *count;
            }
        }
        assert!(increased, "cycle count never increased over 2000 ticks");
    }
}
