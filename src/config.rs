//! System-wide defines and the runtime configuration.
//!
//! Compile-time constants size every bounded buffer in the system. The
//! runtime [`SystemConfig`] covers everything an operator may tune without a
//! rebuild, and can be loaded from a JSON file.

use crate::protocol::messages::Node;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;
use thiserror::Error;

// Commands and queues
/// Largest payload a single command may own.
pub const MAX_COMMAND_PAYLOAD_BYTES: usize = 128;
/// Default depth of a task's command queue.
pub const DEFAULT_QUEUE_SIZE: usize = 10;
/// Bounded wait used by `TaskHandle::send_command`.
pub const DEFAULT_QUEUE_SEND_WAIT_MS: u64 = 50;

// Protocol
/// Largest encoded frame (COBS included, delimiter excluded) accepted from the radio.
pub const PROTOCOL_RX_BUFFER_SZ_BYTES: usize = 128;
/// Largest serialized message body a task may hand to the transmit path.
pub const DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE: usize = 96;
/// Worst-case framing overhead: message id, body length varint, COBS overhead and delimiter.
pub const PROTOCOL_FRAME_OVERHEAD_BYTES: usize = 1 + 2 + 2 + 1;
/// Transmit frame scratch size.
pub const PROTOCOL_TX_FRAME_SZ_BYTES: usize =
    DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE + PROTOCOL_FRAME_OVERHEAD_BYTES;

// Telemetry
pub const TELEMETRY_DEFAULT_LOGGING_RATE_MS: u32 = 100;
/// 1000 / 20 = 50 Hz maximum log rate.
pub const TELEMETRY_MINIMUM_LOG_PERIOD_MS: u32 = 20;
/// Largest log period that fits the 16-bit command opcode with one value reserved.
pub const TELEMETRY_MAXIMUM_LOG_PERIOD_MS: u32 = 0xFFFE;
/// Heartbeat status is transmitted at most this often.
pub const TELEMETRY_HEARTBEAT_TIMER_PERIOD_MS: u32 = 2000;

// Flight
/// Number of state reports that carry a boot status before normal operation is reported.
pub const FLIGHT_TASK_BOOTUP_TELE_CYCLES: u8 = 3;

// Watchdog
pub const RADIO_HEARTBEAT_TIMEOUT_MS: u64 = 15_000;
pub const WATCHDOG_CHECK_PERIOD_MS: u64 = 500;

const_assert!(PROTOCOL_RX_BUFFER_SZ_BYTES <= MAX_COMMAND_PAYLOAD_BYTES);
const_assert!(PROTOCOL_TX_FRAME_SZ_BYTES <= PROTOCOL_RX_BUFFER_SZ_BYTES);
const_assert!(TELEMETRY_MINIMUM_LOG_PERIOD_MS < TELEMETRY_MAXIMUM_LOG_PERIOD_MS);
const_assert!(TELEMETRY_MAXIMUM_LOG_PERIOD_MS <= u16::MAX as u32);
const_assert!(DEFAULT_QUEUE_SIZE > 0);

/// Scheduling parameters of one task.
///
/// Lower priority number means lower priority task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub priority: u8,
    pub queue_depth: usize,
}

impl TaskConfig {
    pub const fn new(priority: u8, queue_depth: usize) -> Self {
        Self { priority, queue_depth }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTable {
    pub flight: TaskConfig,
    pub protocol: TaskConfig,
    pub telemetry: TaskConfig,
    pub bms: TaskConfig,
    pub watchdog: TaskConfig,
    pub flash: TaskConfig,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self {
            flight: TaskConfig::new(4, DEFAULT_QUEUE_SIZE),
            protocol: TaskConfig::new(4, DEFAULT_QUEUE_SIZE),
            telemetry: TaskConfig::new(2, DEFAULT_QUEUE_SIZE),
            bms: TaskConfig::new(2, DEFAULT_QUEUE_SIZE),
            watchdog: TaskConfig::new(3, DEFAULT_QUEUE_SIZE),
            flash: TaskConfig::new(1, DEFAULT_QUEUE_SIZE),
        }
    }
}

/// Runtime configuration of the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// This board's node id.
    pub node: Node,
    /// The only node whose messages are accepted.
    pub peer: Node,
    pub telemetry_period_ms: u32,
    pub heartbeat_timeout_ms: u64,
    pub watchdog_check_period_ms: u64,
    pub tasks: TaskTable,
    /// Address the hosted radio link listens on.
    pub radio_listen_addr: String,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            node: Node::Pmb,
            peer: Node::Rcu,
            telemetry_period_ms: TELEMETRY_DEFAULT_LOGGING_RATE_MS,
            heartbeat_timeout_ms: RADIO_HEARTBEAT_TIMEOUT_MS,
            watchdog_check_period_ms: WATCHDOG_CHECK_PERIOD_MS,
            tasks: TaskTable::default(),
            radio_listen_addr: "127.0.0.1:5400".into(),
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(&'static str),
}

impl SystemConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node == self.peer {
            return Err(ConfigError::Invalid("node and peer must differ"));
        }
        if !(TELEMETRY_MINIMUM_LOG_PERIOD_MS..=TELEMETRY_MAXIMUM_LOG_PERIOD_MS)
            .contains(&self.telemetry_period_ms)
        {
            return Err(ConfigError::Invalid("telemetry_period_ms out of range"));
        }
        if self.heartbeat_timeout_ms == 0 || self.watchdog_check_period_ms == 0 {
            return Err(ConfigError::Invalid("watchdog periods must be non-zero"));
        }
        let t = &self.tasks;
        let depths = [
            t.flight.queue_depth,
            t.protocol.queue_depth,
            t.telemetry.queue_depth,
            t.bms.queue_depth,
            t.watchdog.queue_depth,
            t.flash.queue_depth,
        ];
        if depths.iter().any(|&d| d == 0) {
            return Err(ConfigError::Invalid("queue depths must be non-zero"));
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        match self.log_level.to_ascii_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.node, Node::Pmb);
        assert_eq!(config.peer, Node::Rcu);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = SystemConfig::from_json_str(r#"{"telemetry_period_ms": 250}"#).unwrap();
        assert_eq!(config.telemetry_period_ms, 250);
        assert_eq!(config.tasks, TaskTable::default());
    }

    #[test]
    fn test_rejects_out_of_range_period() {
        let result = SystemConfig::from_json_str(r#"{"telemetry_period_ms": 5}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_queue_depth() {
        let mut config = SystemConfig::default();
        config.tasks.bms.queue_depth = 0;
        assert!(config.validate().is_err());
    }
}
