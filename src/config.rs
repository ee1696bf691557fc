//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, and every section may be omitted, so an empty
//! file is a valid configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// Block assembler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AssemblerConfig {
    #[serde(default = "default_max_block_lines")]
    pub max_block_lines: usize,

    #[serde(default = "default_terminator_min_dashes")]
    pub terminator_min_dashes: usize,

    /// Longer serial lines are discarded unread
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

/// Object store upload configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_bus_type")]
    pub bus_type: String,

    #[serde(default = "default_date_partitioned")]
    pub date_partitioned: bool,

    #[serde(default = "default_store_dir")]
    pub store_dir: String,
}

/// Offline queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_file")]
    pub file: String,

    #[serde(default = "default_max_size")]
    pub max_size: usize,

    #[serde(default = "default_retry_interval_s")]
    pub retry_interval_s: u64,

    #[serde(default = "default_save_interval_s")]
    pub save_interval_s: u64,

    #[serde(default = "default_retry_batch")]
    pub retry_batch: usize,

    #[serde(default = "default_persist_threshold")]
    pub persist_threshold: usize,

    #[serde(default = "default_dead_letter_file")]
    pub dead_letter_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u64,
}

/// Status and latest-data HTTP endpoint
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    #[serde(default = "default_http_bind")]
    pub bind: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_reconnect_interval_ms() -> u64 { 5000 }

fn default_max_block_lines() -> usize { 30 }
fn default_terminator_min_dashes() -> usize { 5 }
fn default_max_line_bytes() -> usize { crate::serial::DEFAULT_MAX_LINE_BYTES }

fn default_bus_type() -> String { "default_bus_type".to_string() }
fn default_date_partitioned() -> bool { true }
fn default_store_dir() -> String { "./sensor_store".to_string() }

fn default_queue_file() -> String { "s3_offline_queue.json".to_string() }
fn default_max_size() -> usize { crate::queue::DEFAULT_MAX_QUEUE_SIZE }
fn default_retry_interval_s() -> u64 { 60 }
fn default_save_interval_s() -> u64 { 300 }
fn default_retry_batch() -> usize { 5 }
fn default_persist_threshold() -> usize { 50 }
fn default_dead_letter_file() -> String { "dead_letter.jsonl".to_string() }

fn default_log_level() -> String { "info".to_string() }
fn default_status_interval_s() -> u64 { 30 }

fn default_http_enabled() -> bool { true }
fn default_http_bind() -> String { "0.0.0.0:5000".to_string() }

/// Baud rates accepted for the sensor link
const VALID_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_block_lines: default_max_block_lines(),
            terminator_min_dashes: default_terminator_min_dashes(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bus_type: default_bus_type(),
            date_partitioned: default_date_partitioned(),
            store_dir: default_store_dir(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            file: default_queue_file(),
            max_size: default_max_size(),
            retry_interval_s: default_retry_interval_s(),
            save_interval_s: default_save_interval_s(),
            retry_batch: default_retry_batch(),
            persist_threshold: default_persist_threshold(),
            dead_letter_file: default_dead_letter_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            status_interval_s: default_status_interval_s(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind: default_http_bind(),
        }
    }
}

impl SerialConfig {
    /// Backoff between serial reconnection attempts
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl QueueConfig {
    /// Path of the durable queue file
    pub fn file_path(&self) -> PathBuf {
        PathBuf::from(&self.file)
    }

    /// Period of the upload retry loop
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_s)
    }

    /// Period of the unconditional queue save
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_s)
    }
}

impl LoggingConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_s)
    }
}

impl HttpConfig {
    /// Listen address
    ///
    /// # Errors
    ///
    /// Returns error if `bind` is not `host:port`
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|_| invalid(format!("http bind must be an address like 0.0.0.0:5000, got {}", self.bind)))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sensor_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !VALID_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                VALID_BAUD_RATES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.assembler.max_block_lines == 0 || self.assembler.max_block_lines > 1000 {
            return Err(invalid("max_block_lines must be between 1 and 1000"));
        }

        if self.assembler.terminator_min_dashes < 3 || self.assembler.terminator_min_dashes > 200 {
            return Err(invalid("terminator_min_dashes must be between 3 and 200"));
        }

        if self.assembler.max_line_bytes < 64 || self.assembler.max_line_bytes > 1 << 20 {
            return Err(invalid("max_line_bytes must be between 64 and 1048576"));
        }

        // The bus type becomes a single object key segment
        let bus_type = self.upload.bus_type.as_str();
        if bus_type.is_empty() || bus_type.contains('/') || bus_type == "." || bus_type == ".." {
            return Err(invalid("bus_type must be non-empty, must not contain '/' and must not be '.' or '..'"));
        }

        if self.upload.store_dir.is_empty() {
            return Err(invalid("store_dir cannot be empty"));
        }

        if self.queue.file.is_empty() {
            return Err(invalid("queue file cannot be empty"));
        }

        if self.queue.dead_letter_file.is_empty() {
            return Err(invalid("dead_letter_file cannot be empty"));
        }

        if self.queue.max_size == 0 {
            return Err(invalid("queue max_size must be greater than 0"));
        }

        if self.queue.retry_interval_s == 0 {
            return Err(invalid("retry_interval_s must be greater than 0"));
        }

        if self.queue.save_interval_s == 0 {
            return Err(invalid("save_interval_s must be greater than 0"));
        }

        if self.queue.retry_batch == 0 || self.queue.retry_batch > 100 {
            return Err(invalid("retry_batch must be between 1 and 100"));
        }

        if self.logging.status_interval_s == 0 {
            return Err(invalid("status_interval_s must be greater than 0"));
        }

        self.http.bind_addr()?;

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(invalid(format!("invalid log level: {}", self.logging.level)));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}
