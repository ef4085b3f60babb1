/*!
Configuration management for the thermal grabber application.
*/

use crate::capture::{RetryPolicy, DEFAULT_READ_CHUNK_SIZE};
use crate::source::TcpConnector;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::protocol;
use shared::{Calibration, StreamConfig, StructuredPacketConfig};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamSection,
    pub packet: PacketSection,
    pub connection: ConnectionSection,
    pub storage: StorageSection,
    pub calibration: Calibration,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Validated raw stream configuration
    pub fn stream_config(&self) -> Result<StreamConfig> {
        StreamConfig::new(
            self.connection.server_ip.clone(),
            self.connection.server_port,
            self.stream.width,
            self.stream.height,
            self.stream.head_strip_bytes,
            self.stream.tail_strip_bytes,
        )
        .context("Invalid [stream] configuration")
    }

    /// Validated structured packet configuration
    pub fn packet_config(&self) -> Result<StructuredPacketConfig> {
        StructuredPacketConfig::new(
            self.connection.server_ip.clone(),
            self.connection.server_port,
            self.packet.width,
            self.packet.height,
            self.packet.expected_packet_size,
        )
        .context("Invalid [packet] configuration")
    }
}

/// Raw frame geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub width: usize,
    pub height: usize,
    pub head_strip_bytes: usize,
    pub tail_strip_bytes: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            width: protocol::DEFAULT_FRAME_WIDTH,
            height: protocol::DEFAULT_FRAME_HEIGHT,
            head_strip_bytes: protocol::DEFAULT_HEAD_STRIP_BYTES,
            tail_strip_bytes: protocol::DEFAULT_TAIL_STRIP_BYTES,
        }
    }
}

/// Structured packet geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketSection {
    pub width: usize,
    pub height: usize,
    pub expected_packet_size: usize,
}

impl Default for PacketSection {
    fn default() -> Self {
        Self {
            width: protocol::DEFAULT_PACKET_WIDTH,
            height: protocol::DEFAULT_PACKET_HEIGHT,
            expected_packet_size: protocol::DEFAULT_PACKET_SIZE,
        }
    }
}

/// Camera endpoint and transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub server_ip: String,
    pub server_port: u16,

    /// Connect attempts after the first
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub connect_timeout_ms: u64,

    /// Read poll interval; 0 blocks until data arrives
    pub read_timeout_ms: u64,

    /// Sleep after an empty read
    pub idle_backoff_ms: u64,
    pub read_chunk_size: usize,
    pub recv_buffer_size: usize,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            server_ip: protocol::DEFAULT_SERVER_IP.to_string(),
            server_port: protocol::DEFAULT_SERVER_PORT,
            max_retries: 5,
            retry_delay_ms: 2000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 100,
            idle_backoff_ms: 10,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            recv_buffer_size: 1024 * 1024,
        }
    }
}

impl ConnectionSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
        }
    }

    pub fn tcp_connector(&self) -> TcpConnector {
        TcpConnector {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms.max(1)),
            read_timeout: (self.read_timeout_ms > 0)
                .then(|| Duration::from_millis(self.read_timeout_ms)),
            recv_buffer_size: (self.recv_buffer_size > 0).then_some(self.recv_buffer_size),
        }
    }
}

/// Recording options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory for recorded frame-sequence files
    pub output_directory: String,

    /// Record calibrated Celsius values instead of raw samples
    pub save_celsius: bool,

    /// Frames buffered between the capture loop and the file writer
    pub channel_buffer_size: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            output_directory: "./recordings".to_string(),
            save_celsius: false,
            channel_buffer_size: 64,
        }
    }
}
