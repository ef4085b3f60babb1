/*!
# Shared Types and Utilities

This crate contains the types and codecs shared between the thermal camera
components: the wire formats spoken by the camera, the decoded image types,
and the on-disk frame-sequence format.

## Core Types

- [`StreamConfig`] - Raw frame stream geometry and endpoint
- [`StructuredPacketConfig`] - Structured ("GFRA") packet geometry and endpoint
- [`ImageMatrix`] - Row-major 2D sample matrix
- [`DecodedFrame`] - Result of decoding one raw frame
- [`ParsedPacket`] - Result of parsing one structured packet

## Modules

- [`frame`] - Raw frame decoding and encoding
- [`packet`] - Structured packet parsing and building
- [`format`] - Wire format abstraction used by the streaming engine
- [`calibration`] - Raw value to temperature conversion
- [`persist`] - Frame-sequence file reading and writing
- [`error`] - Common error types
*/

pub mod calibration;
pub mod config;
pub mod error;
pub mod format;
pub mod frame;
pub mod matrix;
pub mod packet;
pub mod persist;

// Re-export commonly used types
pub use calibration::Calibration;
pub use config::{StreamConfig, StructuredPacketConfig};
pub use error::{SharedError, Result};
pub use format::WireFormat;
pub use frame::{decode_frame, encode_frame, DecodedFrame};
pub use matrix::ImageMatrix;
pub use packet::{parse_packet, PacketBuilder, PacketIssue, ParsedPacket};
pub use persist::{read_frame_sequence, FrameSequence, FrameSequenceWriter, Sample};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Every sample on the wire is a little-endian u16
    pub const BYTES_PER_PIXEL: usize = 2;

    /// Default camera access point address
    pub const DEFAULT_SERVER_IP: &str = "192.168.4.1";

    /// Default camera TCP port
    pub const DEFAULT_SERVER_PORT: u16 = 3333;

    /// Default raw stream geometry
    pub const DEFAULT_FRAME_WIDTH: usize = 80;
    pub const DEFAULT_FRAME_HEIGHT: usize = 62;

    /// Envelope bytes stripped from each raw frame
    pub const DEFAULT_HEAD_STRIP_BYTES: usize = 160;
    pub const DEFAULT_TAIL_STRIP_BYTES: usize = 160;

    /// Default structured packet geometry
    pub const DEFAULT_PACKET_WIDTH: usize = 80;
    pub const DEFAULT_PACKET_HEIGHT: usize = 60;
    pub const DEFAULT_PACKET_SIZE: usize = 10257;

    /// Structured packet prefix: three spaces and '#'
    pub const PACKET_PREFIX: &[u8; 4] = b"   #";

    /// Value expected in the ASCII-hex payload length field
    pub const PACKET_PAYLOAD_LEN: u16 = 0x2808;

    /// Frame type tag carried by image packets
    pub const PACKET_FRAME_TYPE: &str = "GFRA";

    /// Structured packet field widths
    pub const PACKET_PREFIX_LEN: usize = 4;
    pub const PACKET_LENGTH_FIELD_LEN: usize = 4;
    pub const PACKET_FRAME_TYPE_LEN: usize = 4;
    pub const PACKET_METADATA_LEN: usize = 160;
    pub const PACKET_CHECKSUM_LEN: usize = 4;

    /// Offset of the image payload within a structured packet
    pub const PACKET_IMAGE_OFFSET: usize =
        PACKET_PREFIX_LEN + PACKET_LENGTH_FIELD_LEN + PACKET_FRAME_TYPE_LEN + PACKET_METADATA_LEN;
}
