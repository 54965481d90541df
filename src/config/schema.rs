//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::poller::PollOptions;
use crate::port::{DataBits, FlowControl, Parity, PortConfig, StopBits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port defaults
    pub serial: SerialConfig,
    /// Background polling reader
    pub poll: PollConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Hardware testing configuration
    pub testing: TestingConfig,
}

impl Config {
    /// Check values serde cannot reject on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::invalid("serial.default_baud", "must be positive"));
        }
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::invalid("poll.interval_ms", "must be positive"));
        }
        if self.poll.buffer_size == 0 {
            return Err(ConfigError::invalid("poll.buffer_size", "must be positive"));
        }
        if self.testing.baud == 0 {
            return Err(ConfigError::invalid("testing.baud", "must be positive"));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port used when none is given on the command line
    pub default_port: Option<String>,
    /// Default baud rate for new sessions
    pub default_baud: u32,
    /// Default data bits
    pub data_bits: DataBits,
    /// Default stop bits
    pub stop_bits: StopBits,
    /// Default parity
    pub parity: Parity,
    /// Default flow control
    pub flow_control: FlowControl,
    /// Timeout for blocking transfers in milliseconds (0 waits indefinitely)
    pub default_timeout_ms: u32,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_port: None,
            default_baud: 115200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            default_timeout_ms: 1000,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Line settings described by this section.
    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            baud_rate: self.default_baud,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
        }
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Polling reader configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Pause between polls in milliseconds
    pub interval_ms: u64,
    /// Read buffer size in bytes
    pub buffer_size: usize,
    /// Stop polling after this many milliseconds (unset = until stopped)
    pub timeout_ms: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            buffer_size: 256,
            timeout_ms: None,
        }
    }
}

impl PollConfig {
    pub fn options(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(self.interval_ms),
            buffer_size: self.buffer_size,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "pretty" or "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line format with colors
    Pretty,
    /// Single-line format
    #[default]
    Compact,
}

/// Hardware testing configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Test port name
    pub port: Option<String>,
    /// Test baud rate
    pub baud: u32,
    /// Whether TX is wired to RX on the test port
    pub loopback_enabled: bool,
    /// Test timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115200,
            loopback_enabled: false,
            timeout_ms: 2000,
        }
    }
}

impl TestingConfig {
    /// Get the test timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
