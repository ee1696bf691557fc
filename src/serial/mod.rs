//! # Serial Communication Module
//!
//! Handles the serial link to the sensor board.
//!
//! This module handles:
//! - Opening the serial port (8N1, no flow control)
//! - Reading newline-terminated telemetry text
//! - Reporting disconnects so the caller can reopen the port

pub mod line_source;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
pub use line_source::{LineSource, ReaderLineSource, DEFAULT_MAX_LINE_BYTES};

/// Default sensor board baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Sensor board serial port
pub struct SensorSerial {
    lines: ReaderLineSource<BufReader<SerialStream>>,
    device_path: String,
}

impl std::fmt::Debug for SensorSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SensorSerial {
    /// Open the sensor board at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sensor_bridge::serial::{LineSource, SensorSerial};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let mut serial = SensorSerial::open("/dev/ttyACM0", 115_200)?;
    ///     while let Some(line) = serial.next_line().await? {
    ///         println!("{}", line);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(&[path], baud_rate)
    }

    /// Open the first device that succeeds from `paths`
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyACM0", "/dev/ttyUSB0"])
    /// * `baud_rate` - Line speed
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Connected to {} at {} bps", path, baud_rate);
                    return Ok(Self {
                        lines: ReaderLineSource::new(BufReader::new(port), *path),
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(BridgeError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| BridgeError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Cap the length of a single telemetry line
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.lines = self.lines.with_max_line_bytes(max_line_bytes);
        self
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl LineSource for SensorSerial {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.lines
            .next_line()
            .await
            .map_err(|e| BridgeError::Serial(format!("Read from {} failed: {}", self.device_path, e)))
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}
