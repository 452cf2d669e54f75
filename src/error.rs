//! Error types for the simulation engine.

use thiserror::Error;

/// Result type alias for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Simulation engine error types.
#[derive(Error, Debug)]
pub enum SimError {
    // =========================================================================
    // Configuration errors: 1xx
    // =========================================================================
    /// Configuration failed validation before startup.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// Referenced device template is not recognized.
    #[error("unknown device template: {template}")]
    UnknownTemplate { template: String },

    // =========================================================================
    // Allocation errors: 2xx
    // =========================================================================
    /// Not enough contiguous ports remain in a pool.
    #[error("no {count} contiguous ports available in pool {protocol}")]
    PortUnavailable { protocol: String, count: u16 },

    /// A plan referenced a port pool that was never configured.
    #[error("unknown port pool: {protocol}")]
    UnknownPool { protocol: String },

    // =========================================================================
    // Protocol / endpoint errors: 3xx
    // =========================================================================
    /// A device's server could not bind its assigned port.
    #[error("failed to bind {protocol} endpoint for {device_id} on port {port}: {reason}")]
    EndpointBindFailure {
        device_id: String,
        protocol: String,
        port: u16,
        reason: String,
    },

    /// Device id was not found by an inspection query.
    #[error("device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    /// Device is already running and a duplicate start was requested.
    #[error("device {device_id} is already running")]
    AlreadyRunning { device_id: String },

    // =========================================================================
    // Runtime / tick errors: 4xx
    // =========================================================================
    /// A single update tick failed; the device keeps running.
    #[error("tick failed for {device_id}: {reason}")]
    TickFailure { device_id: String, reason: String },

    // =========================================================================
    // Broker / gateway errors: 5xx
    // =========================================================================
    /// MQTT broker connection could not be confirmed within the connect deadline.
    #[error("MQTT broker unreachable at {host}:{port}")]
    BrokerUnreachable { host: String, port: u16 },

    // =========================================================================
    // Internal errors: 9xx
    // =========================================================================
    /// Orchestrator or manager shutdown is in progress; not a real failure.
    #[error("shutting down")]
    Shutdown,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error.
    #[error("channel send error")]
    ChannelSend,

    /// Channel receive error.
    #[error("channel receive error")]
    ChannelReceive,

    /// Catch-all for unexpected internal conditions.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl SimError {
    /// Returns the error code used for health/telemetry reporting.
    pub fn error_code(&self) -> u16 {
        match self {
            Self::ConfigInvalid { .. } => 100,
            Self::UnknownTemplate { .. } => 101,

            Self::PortUnavailable { .. } => 200,
            Self::UnknownPool { .. } => 201,

            Self::EndpointBindFailure { .. } => 300,
            Self::DeviceNotFound { .. } => 301,
            Self::AlreadyRunning { .. } => 302,

            Self::TickFailure { .. } => 400,

            Self::BrokerUnreachable { .. } => 500,

            Self::Shutdown => 900,
            Self::Io(_) => 901,
            Self::ChannelSend => 902,
            Self::ChannelReceive => 903,
            Self::Internal { .. } => 909,
        }
    }

    /// Returns whether the originating component may keep running after this error.
    ///
    /// Matches the propagation policy: tick failures and endpoint bind failures are
    /// recoverable at the device level (siblings keep running); configuration,
    /// allocation, and broker errors are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TickFailure { .. } | Self::EndpointBindFailure { .. } | Self::Shutdown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SimError::PortUnavailable {
            protocol: "modbus".into(),
            count: 3,
        };
        assert_eq!(err.error_code(), 200);
    }

    #[test]
    fn test_recoverable() {
        let err = SimError::TickFailure {
            device_id: "modbus_temperature_sensors_000".into(),
            reason: "overflow".into(),
        };
        assert!(err.is_recoverable());

        let err = SimError::ConfigInvalid {
            reason: "facility name empty".into(),
        };
        assert!(!err.is_recoverable());
    }
}
