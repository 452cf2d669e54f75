//! Contiguous TCP port allocation across per-protocol pools.
//!
//! Grounded on the original `IntelligentPortManager`/`PortPool` design: pools
//! never overlap, allocation is idempotent per device id, and plan validation
//! never mutates real pool state.

use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

use crate::config::NetworkConfig;
use crate::error::{Result, SimError};

/// A single protocol's reserved port range, tracked as a used/free split.
#[derive(Debug, Clone)]
struct PortPool {
    start: u16,
    end: u16,
    used: BTreeSet<u16>,
}

impl PortPool {
    fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            used: BTreeSet::new(),
        }
    }

    fn total(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    fn available_count(&self) -> usize {
        self.total() - self.used.len()
    }

    fn is_available(&self, port: u16) -> bool {
        port >= self.start && port <= self.end && !self.used.contains(&port)
    }

    fn can_allocate_from(&self, start: u16, count: u16) -> bool {
        if start < self.start || start as u32 + count as u32 - 1 > self.end as u32 {
            return false;
        }
        (start..start + count).all(|p| self.is_available(p))
    }

    fn find_contiguous_block(&self, count: u16) -> Option<u16> {
        let mut run_start = self.start;
        let mut run_len: u16 = 0;
        for port in self.start..=self.end {
            if self.is_available(port) {
                if run_len == 0 {
                    run_start = port;
                }
                run_len += 1;
                if run_len >= count {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    fn allocate(&mut self, count: u16, preferred_start: Option<u16>) -> Option<Vec<u16>> {
        let start = match preferred_start {
            Some(p) if self.can_allocate_from(p, count) => p,
            _ => self.find_contiguous_block(count)?,
        };
        let ports: Vec<u16> = (start..start + count).collect();
        for p in &ports {
            self.used.insert(*p);
        }
        Some(ports)
    }

    fn deallocate(&mut self, ports: &[u16]) {
        for p in ports {
            self.used.remove(p);
        }
    }
}

/// Per-protocol utilization snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolUtilization {
    pub total: usize,
    pub used: usize,
    pub available: usize,
    pub pct_used: f64,
}

/// Full allocation report, suitable for the orchestrator's `export_all`
/// surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AllocationReport {
    pub device_count: usize,
    pub utilization: HashMap<String, PoolUtilization>,
    pub allocations: HashMap<String, Vec<u16>>,
}

struct PortManagerState {
    pools: HashMap<String, PortPool>,
    allocations: HashMap<String, (String, Vec<u16>)>,
}

/// Manages non-overlapping TCP port allocation across protocol pools.
pub struct PortManager {
    state: Mutex<PortManagerState>,
}

impl PortManager {
    /// Builds pools from the resolved network configuration.
    pub fn from_network_config(network: &NetworkConfig) -> Self {
        let pools = network
            .port_ranges
            .iter()
            .map(|(protocol, range)| (protocol.clone(), PortPool::new(range.start, range.end)))
            .collect();
        Self {
            state: Mutex::new(PortManagerState {
                pools,
                allocations: HashMap::new(),
            }),
        }
    }

    /// Resets all pools, discarding any existing allocations.
    pub async fn init_pools(&self, pools: HashMap<String, (u16, u16)>) {
        let mut state = self.state.lock().await;
        state.pools = pools
            .into_iter()
            .map(|(protocol, (start, end))| (protocol, PortPool::new(start, end)))
            .collect();
        state.allocations.clear();
    }

    /// Allocates `count` contiguous ports from `protocol`'s pool for
    /// `device_id`. Idempotent: a repeat call for an already-allocated device
    /// returns its existing ports without consuming further capacity.
    pub async fn allocate(
        &self,
        protocol: &str,
        device_id: &str,
        count: u16,
        preferred_start: Option<u16>,
    ) -> Result<Vec<u16>> {
        let mut state = self.state.lock().await;
        if let Some((existing_protocol, ports)) = state.allocations.get(device_id) {
            tracing::warn!(device_id, protocol = existing_protocol.as_str(), "device already has an allocation; returning existing ports");
            return Ok(ports.clone());
        }
        let pool = state
            .pools
            .get_mut(protocol)
            .ok_or_else(|| SimError::UnknownPool { protocol: protocol.into() })?;
        let ports = pool.allocate(count, preferred_start).ok_or_else(|| SimError::PortUnavailable {
            protocol: protocol.into(),
            count,
        })?;
        state
            .allocations
            .insert(device_id.to_string(), (protocol.to_string(), ports.clone()));
        Ok(ports)
    }

    /// Releases a device's ports back to their pool. Returns false for an
    /// unknown device id.
    pub async fn deallocate(&self, device_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some((protocol, ports)) = state.allocations.remove(device_id) else {
            return false;
        };
        if let Some(pool) = state.pools.get_mut(&protocol) {
            pool.deallocate(&ports);
        }
        true
    }

    pub async fn device_ports(&self, device_id: &str) -> Option<Vec<u16>> {
        let state = self.state.lock().await;
        state.allocations.get(device_id).map(|(_, p)| p.clone())
    }

    pub async fn utilization(&self) -> HashMap<String, PoolUtilization> {
        let state = self.state.lock().await;
        state
            .pools
            .iter()
            .map(|(protocol, pool)| {
                let total = pool.total();
                let used = pool.used.len();
                (
                    protocol.clone(),
                    PoolUtilization {
                        total,
                        used,
                        available: pool.available_count(),
                        pct_used: if total == 0 { 0.0 } else { used as f64 / total as f64 * 100.0 },
                    },
                )
            })
            .collect()
    }

    /// Simulates a plan of `(device_id -> (protocol, count))` requests against
    /// *copies* of the current pools, never mutating real state. Returns true
    /// iff every request in the plan would succeed, in order.
    pub async fn validate_plan(&self, plan: &HashMap<String, (String, u16)>) -> bool {
        let state = self.state.lock().await;
        let mut scratch = state.pools.clone();
        for (device_id, (protocol, count)) in plan {
            if state.allocations.contains_key(device_id) {
                continue; // idempotent: already allocated, no new capacity needed
            }
            let Some(pool) = scratch.get_mut(protocol) else {
                return false;
            };
            if pool.allocate(*count, None).is_none() {
                return false;
            }
        }
        true
    }

    pub async fn generate_allocation_report(&self) -> AllocationReport {
        let state = self.state.lock().await;
        let allocations: HashMap<String, Vec<u16>> = state
            .allocations
            .iter()
            .map(|(id, (_, ports))| (id.clone(), ports.clone()))
            .collect();
        let utilization = self.utilization_locked(&state);
        AllocationReport {
            device_count: allocations.len(),
            utilization,
            allocations,
        }
    }

    fn utilization_locked(&self, state: &PortManagerState) -> HashMap<String, PoolUtilization> {
        state
            .pools
            .iter()
            .map(|(protocol, pool)| {
                let total = pool.total();
                let used = pool.used.len();
                (
                    protocol.clone(),
                    PoolUtilization {
                        total,
                        used,
                        available: pool.available_count(),
                        pct_used: if total == 0 { 0.0 } else { used as f64 / total as f64 * 100.0 },
                    },
                )
            })
            .collect()
    }

    /// Placeholder health probe matching the original's semantics: every
    /// allocated device is reported healthy. No real port connectivity check
    /// is performed.
    pub async fn monitor_port_health(&self) -> HashMap<String, bool> {
        let state = self.state.lock().await;
        state.allocations.keys().map(|id| (id.clone(), true)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(start: u16, end: u16) -> PortManager {
        let mut pools = HashMap::new();
        pools.insert("modbus".to_string(), (start, end));
        let pm = PortManager::from_network_config(&NetworkConfig {
            base_ip: "0.0.0.0".into(),
            port_ranges: HashMap::new(),
        });
        pm.init_pools(pools).await;
        pm
    }

    #[tokio::test]
    async fn test_allocate_is_contiguous_and_idempotent() {
        let pm = manager(5020, 5024).await;
        let ports = pm.allocate("modbus", "dev-a", 2, None).await.unwrap();
        assert_eq!(ports, vec![5020, 5021]);
        let again = pm.allocate("modbus", "dev-a", 2, None).await.unwrap();
        assert_eq!(again, ports);
    }

    #[tokio::test]
    async fn test_allocate_exhausts_pool() {
        let pm = manager(5020, 5021).await;
        pm.allocate("modbus", "dev-a", 2, None).await.unwrap();
        let err = pm.allocate("modbus", "dev-b", 1, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_validate_plan_s3() {
        let pm = manager(5020, 5024).await; // 5 ports
        let mut plan = HashMap::new();
        plan.insert("a".to_string(), ("modbus".to_string(), 1));
        plan.insert("b".to_string(), ("modbus".to_string(), 2));
        plan.insert("c".to_string(), ("modbus".to_string(), 3));
        assert!(!pm.validate_plan(&plan).await); // total 6 > 5

        let mut plan2 = HashMap::new();
        plan2.insert("a".to_string(), ("modbus".to_string(), 1));
        plan2.insert("b".to_string(), ("modbus".to_string(), 2));
        plan2.insert("c".to_string(), ("modbus".to_string(), 2));
        assert!(pm.validate_plan(&plan2).await); // total 5 == 5, should fit

        // validate_plan must not mutate state
        let util = pm.utilization().await;
        assert_eq!(util["modbus"].used, 0);

        for (id, (_, count)) in &plan2 {
            pm.allocate("modbus", id, *count, None).await.unwrap();
        }
        let util = pm.utilization().await;
        assert_eq!(util["modbus"].used, 5);
    }

    #[tokio::test]
    async fn test_deallocate_frees_ports() {
        let pm = manager(5020, 5021).await;
        pm.allocate("modbus", "dev-a", 2, None).await.unwrap();
        assert!(pm.deallocate("dev-a").await);
        assert!(!pm.deallocate("dev-a").await);
        let ports = pm.allocate("modbus", "dev-b", 2, None).await.unwrap();
        assert_eq!(ports, vec![5020, 5021]);
    }
}
