/*!
Stream and packet geometry.

Both configurations are immutable once built: fields are private and the
derived sizes are computed from the primary fields on every call, so they
cannot drift out of sync.
*/

use crate::error::{Result, SharedError};
use crate::protocol::{
    BYTES_PER_PIXEL, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_HEAD_STRIP_BYTES,
    DEFAULT_PACKET_HEIGHT, DEFAULT_PACKET_SIZE, DEFAULT_PACKET_WIDTH, DEFAULT_SERVER_IP,
    DEFAULT_SERVER_PORT, DEFAULT_TAIL_STRIP_BYTES, PACKET_CHECKSUM_LEN, PACKET_IMAGE_OFFSET,
};

/// Raw frame stream configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    server_ip: String,
    server_port: u16,
    width: usize,
    height: usize,
    head_strip_bytes: usize,
    tail_strip_bytes: usize,
}

impl StreamConfig {
    /// Create a validated stream configuration. Every field must be positive.
    pub fn new(
        server_ip: impl Into<String>,
        server_port: u16,
        width: usize,
        height: usize,
        head_strip_bytes: usize,
        tail_strip_bytes: usize,
    ) -> Result<Self> {
        let server_ip = server_ip.into();
        if server_ip.trim().is_empty() {
            return Err(SharedError::config("server address must not be empty"));
        }
        if server_port == 0 {
            return Err(SharedError::config("server port must be positive"));
        }
        if width == 0 || height == 0 {
            return Err(SharedError::config(format!(
                "frame dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if head_strip_bytes == 0 || tail_strip_bytes == 0 {
            return Err(SharedError::config(format!(
                "strip lengths must be positive, got head={} tail={}",
                head_strip_bytes, tail_strip_bytes
            )));
        }
        width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .and_then(|n| n.checked_add(head_strip_bytes))
            .and_then(|n| n.checked_add(tail_strip_bytes))
            .ok_or_else(|| {
                SharedError::config(format!(
                    "frame size of {}x{} overflows usize",
                    width, height
                ))
            })?;

        Ok(Self {
            server_ip,
            server_port,
            width,
            height,
            head_strip_bytes,
            tail_strip_bytes,
        })
    }

    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Frame width in pixels (columns)
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels (rows)
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> usize {
        BYTES_PER_PIXEL
    }

    pub fn head_strip_bytes(&self) -> usize {
        self.head_strip_bytes
    }

    pub fn tail_strip_bytes(&self) -> usize {
        self.tail_strip_bytes
    }

    /// `width * height * 2`
    pub fn raw_image_size(&self) -> usize {
        self.width * self.height * BYTES_PER_PIXEL
    }

    /// Image bytes plus both envelope strips
    pub fn total_frame_size(&self) -> usize {
        self.raw_image_size() + self.head_strip_bytes + self.tail_strip_bytes
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_ip: DEFAULT_SERVER_IP.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            head_strip_bytes: DEFAULT_HEAD_STRIP_BYTES,
            tail_strip_bytes: DEFAULT_TAIL_STRIP_BYTES,
        }
    }
}

/// Structured ("GFRA") packet configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredPacketConfig {
    server_ip: String,
    server_port: u16,
    width: usize,
    height: usize,
    expected_packet_size: usize,
}

impl StructuredPacketConfig {
    /// Create a validated packet configuration.
    ///
    /// An `expected_packet_size` below [`Self::layout_size`] is accepted but
    /// every packet will then fail validation.
    pub fn new(
        server_ip: impl Into<String>,
        server_port: u16,
        width: usize,
        height: usize,
        expected_packet_size: usize,
    ) -> Result<Self> {
        let server_ip = server_ip.into();
        if server_ip.trim().is_empty() {
            return Err(SharedError::config("server address must not be empty"));
        }
        if server_port == 0 {
            return Err(SharedError::config("server port must be positive"));
        }
        if width == 0 || height == 0 {
            return Err(SharedError::config(format!(
                "image dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if expected_packet_size == 0 {
            return Err(SharedError::config("expected packet size must be positive"));
        }
        width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .and_then(|n| n.checked_add(PACKET_IMAGE_OFFSET + PACKET_CHECKSUM_LEN))
            .ok_or_else(|| {
                SharedError::config(format!(
                    "packet layout of {}x{} overflows usize",
                    width, height
                ))
            })?;

        let config = Self {
            server_ip,
            server_port,
            width,
            height,
            expected_packet_size,
        };

        if expected_packet_size < config.layout_size() {
            tracing::warn!(
                expected_packet_size,
                layout_size = config.layout_size(),
                "Expected packet size is smaller than the packet layout; packets will not validate"
            );
        }

        Ok(config)
    }

    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn expected_packet_size(&self) -> usize {
        self.expected_packet_size
    }

    /// `width * height * 2`
    pub fn image_size(&self) -> usize {
        self.width * self.height * BYTES_PER_PIXEL
    }

    /// Offset of the checksum field
    pub fn checksum_offset(&self) -> usize {
        PACKET_IMAGE_OFFSET + self.image_size()
    }

    /// Bytes occupied by header, metadata, image and checksum
    pub fn layout_size(&self) -> usize {
        self.checksum_offset() + PACKET_CHECKSUM_LEN
    }
}

impl Default for StructuredPacketConfig {
    fn default() -> Self {
        Self {
            server_ip: DEFAULT_SERVER_IP.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            width: DEFAULT_PACKET_WIDTH,
            height: DEFAULT_PACKET_HEIGHT,
            expected_packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_sizes() {
        let config = StreamConfig::default();

        assert_eq!(config.server_ip(), "192.168.4.1");
        assert_eq!(config.server_port(), 3333);
        assert_eq!(config.raw_image_size(), 80 * 62 * 2);
        assert_eq!(config.total_frame_size(), 80 * 62 * 2 + 320);
    }

    #[test]
    fn test_stream_config_rejects_zero_fields() {
        assert!(StreamConfig::new("10.0.0.1", 0, 4, 4, 1, 1).is_err());
        assert!(StreamConfig::new("10.0.0.1", 80, 0, 4, 1, 1).is_err());
        assert!(StreamConfig::new("10.0.0.1", 80, 4, 4, 0, 1).is_err());
        assert!(StreamConfig::new("", 80, 4, 4, 1, 1).is_err());

        let config = StreamConfig::new("10.0.0.1", 80, 4, 3, 2, 5).unwrap();
        assert_eq!(config.raw_image_size(), 24);
        assert_eq!(config.total_frame_size(), 31);
    }

    #[test]
    fn test_packet_layout() {
        let config = StructuredPacketConfig::default();

        assert_eq!(config.image_size(), 9600);
        assert_eq!(config.checksum_offset(), 172 + 9600);
        assert_eq!(config.layout_size(), 9776);
        assert_eq!(config.expected_packet_size(), 10257);

        assert!(StructuredPacketConfig::new("10.0.0.1", 80, 4, 4, 0).is_err());
    }

    #[test]
    fn test_oversized_geometry_is_rejected() {
        let huge = usize::MAX / 2 + 1;

        assert!(matches!(
            StreamConfig::new("10.0.0.1", 80, huge, 2, 1, 1),
            Err(SharedError::Config(_))
        ));
        assert!(StreamConfig::new("10.0.0.1", 80, 1, usize::MAX / 2, 1, 1).is_err());
        assert!(StreamConfig::new("10.0.0.1", 80, 1, 1, usize::MAX, 1).is_err());
        assert!(matches!(
            StructuredPacketConfig::new("10.0.0.1", 80, huge, 2, 10257),
            Err(SharedError::Config(_))
        ));
        assert!(StructuredPacketConfig::new("10.0.0.1", 80, 1, usize::MAX / 2, 10257).is_err());
    }
}
