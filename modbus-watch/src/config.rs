//! Configuration for the Modbus monitor.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use modbus_watch_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decoder::{MIN_BLOCK_LEN, PositionFormat, RegisterDecoder, WordOrder};
use crate::poller::PollSettings;
use crate::supervisor::RetryPolicy;

/// Registered Modbus TCP port.
pub const MODBUS_TCP_PORT: u16 = 502;

/// Largest input register count one Modbus request may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] modbus_watch_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Device to poll
    #[serde(default)]
    pub target: TargetConfig,

    /// Poll loop settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Reconnect backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Register decoding options
    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Output of decoded readings
    #[serde(default)]
    pub display: DisplayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The Modbus TCP server to poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// IP address of the controller
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port (default: 502)
    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "10.0.1.1".to_string()
}

fn default_modbus_port() -> u16 {
    MODBUS_TCP_PORT
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_modbus_port(),
            unit_id: default_unit_id(),
            connect_timeout_ms: default_timeout_ms(),
        }
    }
}

impl TargetConfig {
    /// Socket address of the target.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                ConfigError::Validation(format!("Invalid target address '{}': {}", self.host, e))
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// First input register to read
    #[serde(default)]
    pub start_address: u16,

    /// Number of input registers per read (default: 25)
    #[serde(default = "default_register_count")]
    pub register_count: u16,

    /// Delay between reads in milliseconds (default: 500)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_register_count() -> u16 {
    25
}

fn default_interval_ms() -> u64 {
    500
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            start_address: 0,
            register_count: default_register_count(),
            interval_ms: default_interval_ms(),
            read_timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Backoff between failed connection attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff outside the night window, in seconds (default: 10)
    #[serde(default = "default_day_backoff")]
    pub day_backoff_secs: u64,

    /// Backoff inside the night window, in seconds (default: 600)
    #[serde(default = "default_night_backoff")]
    pub night_backoff_secs: u64,

    /// First night hour, inclusive (default: 18)
    #[serde(default = "default_night_start")]
    pub night_start_hour: u32,

    /// Last night hour, inclusive (default: 6)
    #[serde(default = "default_night_end")]
    pub night_end_hour: u32,
}

fn default_day_backoff() -> u64 {
    10
}

fn default_night_backoff() -> u64 {
    600
}

fn default_night_start() -> u32 {
    18
}

fn default_night_end() -> u32 {
    6
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            day_backoff_secs: default_day_backoff(),
            night_backoff_secs: default_night_backoff(),
            night_start_hour: default_night_start(),
            night_end_hour: default_night_end(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            day_backoff: Duration::from_secs(self.day_backoff_secs),
            night_backoff: Duration::from_secs(self.night_backoff_secs),
            night_start_hour: self.night_start_hour,
            night_end_hour: self.night_end_hour,
        }
    }
}

/// Register decoding options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// "hex_literal" (default) or "ieee754"
    #[serde(default)]
    pub position_format: PositionFormat,

    /// Word order for "ieee754": "big" or "little" (default)
    #[serde(default)]
    pub word_order: WordOrder,
}

impl DecoderConfig {
    pub fn decoder(&self) -> RegisterDecoder {
        RegisterDecoder::new(self.position_format, self.word_order)
    }
}

/// Output format for readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    /// Redraw the terminal on every reading (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub format: DisplayFormat,

    /// Clear the terminal before each reading in text mode
    #[serde(default = "default_clear_screen")]
    pub clear_screen: bool,
}

fn default_clear_screen() -> bool {
    true
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            format: DisplayFormat::default(),
            clear_screen: default_clear_screen(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: MonitorConfig = modbus_watch_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.socket_addr()?;

        if !(1..=247).contains(&self.target.unit_id) {
            return Err(ConfigError::Validation(format!(
                "unit_id must be 1-247, got {}",
                self.target.unit_id
            )));
        }

        let min = MIN_BLOCK_LEN as u16;
        if !(min..=MAX_READ_REGISTERS).contains(&self.poll.register_count) {
            return Err(ConfigError::Validation(format!(
                "register_count must be {}-{}, got {}",
                min, MAX_READ_REGISTERS, self.poll.register_count
            )));
        }

        if u32::from(self.poll.start_address) + u32::from(self.poll.register_count) > 0x1_0000 {
            return Err(ConfigError::Validation(format!(
                "start_address {} + register_count {} exceeds the register address space",
                self.poll.start_address, self.poll.register_count
            )));
        }

        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "interval_ms must be greater than 0".to_string(),
            ));
        }

        for (name, hour) in [
            ("night_start_hour", self.retry.night_start_hour),
            ("night_end_hour", self.retry.night_end_hour),
        ] {
            if hour > 23 {
                return Err(ConfigError::Validation(format!(
                    "{} must be 0-23, got {}",
                    name, hour
                )));
            }
        }

        Ok(())
    }

    /// Poll loop settings derived from this configuration.
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            start_address: self.poll.start_address,
            register_count: self.poll.register_count,
            unit_id: self.target.unit_id,
            interval: Duration::from_millis(self.poll.interval_ms),
        }
    }
}
