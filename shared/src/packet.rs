/*!
Structured ("GFRA") packet parsing.

Layout, all offsets in bytes:

| Field          | Offset | Length          | Content                            |
|----------------|--------|-----------------|------------------------------------|
| Prefix         | 0      | 4               | `"   #"`                           |
| Payload length | 4      | 4               | ASCII hex, expected `2808`         |
| Frame type     | 8      | 4               | ASCII tag, normally `GFRA`         |
| Metadata       | 12     | 160             | opaque                             |
| Image          | 172    | `width*height*2`| little-endian u16, column-major    |
| Checksum       | after image | 4          | ASCII hex                          |

Anything after the checksum up to the configured packet size is ignored.

Parsing never fails outright. Problems are recorded as [`PacketIssue`]s and
folded into [`ParsedPacket::is_valid`]; a frame type other than `GFRA` or an
unreadable checksum is reported but does not invalidate the packet. The
checksum is surfaced as-is and is not verified against the payload.
*/

use crate::calibration::Calibration;
use crate::config::StructuredPacketConfig;
use crate::error::{Result, SharedError};
use crate::frame::{decode_image, encode_image};
use crate::matrix::ImageMatrix;
use crate::protocol::{
    PACKET_CHECKSUM_LEN, PACKET_FRAME_TYPE, PACKET_FRAME_TYPE_LEN, PACKET_IMAGE_OFFSET,
    PACKET_LENGTH_FIELD_LEN, PACKET_METADATA_LEN, PACKET_PAYLOAD_LEN, PACKET_PREFIX,
    PACKET_PREFIX_LEN,
};
use serde::Serialize;
use tracing::{debug, warn};

const LENGTH_FIELD_OFFSET: usize = PACKET_PREFIX_LEN;
const FRAME_TYPE_OFFSET: usize = LENGTH_FIELD_OFFSET + PACKET_LENGTH_FIELD_LEN;
const METADATA_OFFSET: usize = FRAME_TYPE_OFFSET + PACKET_FRAME_TYPE_LEN;

/// Something found wrong while parsing a packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacketIssue {
    WrongLength { expected: usize, actual: usize },
    BadPrefix { found: String },
    UnparsablePayloadLength { text: String },
    UnexpectedPayloadLength { value: u16 },
    UnexpectedFrameType { found: String },
    ImageTruncated { expected: usize, actual: usize },
    ImageDecodeFailed,
    ChecksumTruncated { expected: usize, actual: usize },
    UnparsableChecksum { text: String },
}

impl PacketIssue {
    /// Whether this issue makes the packet invalid
    pub fn invalidates(&self) -> bool {
        !matches!(
            self,
            Self::UnexpectedFrameType { .. } | Self::UnparsableChecksum { .. }
        )
    }
}

/// Result of parsing one structured packet
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedPacket {
    pub is_valid: bool,
    pub header_prefix_ok: bool,
    /// Raw text of the payload length field
    pub payload_len_str: Option<String>,
    pub payload_len: Option<u16>,
    pub frame_type: Option<String>,
    pub frame_type_ok: bool,
    pub metadata: Option<Vec<u8>>,
    pub image_payload: Option<Vec<u8>>,
    pub thermal_image: Option<ImageMatrix<u16>>,
    /// Raw text of the checksum field
    pub checksum_str: Option<String>,
    pub checksum: Option<u16>,
    pub issues: Vec<PacketIssue>,
}

/// Serializable overview of a parsed packet, without the bulk data
#[derive(Debug, Clone, Serialize)]
pub struct PacketSummary {
    pub is_valid: bool,
    pub header_prefix_ok: bool,
    pub payload_len_str: Option<String>,
    pub payload_len: Option<u16>,
    pub frame_type: Option<String>,
    pub frame_type_ok: bool,
    pub metadata_len: usize,
    pub image_payload_len: usize,
    pub image_shape: Option<(usize, usize)>,
    pub checksum_str: Option<String>,
    pub checksum: Option<u16>,
    pub issues: Vec<PacketIssue>,
}

impl ParsedPacket {
    /// Convert the decoded image to degrees Celsius
    pub fn temperatures(&self, calibration: &Calibration) -> Option<ImageMatrix<f32>> {
        self.thermal_image.as_ref().map(|image| calibration.apply(image))
    }

    pub fn summary(&self) -> PacketSummary {
        PacketSummary {
            is_valid: self.is_valid,
            header_prefix_ok: self.header_prefix_ok,
            payload_len_str: self.payload_len_str.clone(),
            payload_len: self.payload_len,
            frame_type: self.frame_type.clone(),
            frame_type_ok: self.frame_type_ok,
            metadata_len: self.metadata.as_ref().map_or(0, Vec::len),
            image_payload_len: self.image_payload.as_ref().map_or(0, Vec::len),
            image_shape: self
                .thermal_image
                .as_ref()
                .map(|image| (image.height(), image.width())),
            checksum_str: self.checksum_str.clone(),
            checksum: self.checksum,
            issues: self.issues.clone(),
        }
    }

    /// Summary as pretty-printed JSON
    pub fn summary_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.summary())?)
    }

    fn record(&mut self, issue: PacketIssue) {
        self.issues.push(issue);
    }
}

/// Slice `len` bytes at `offset`, truncated at the end of `bytes`
fn field(bytes: &[u8], offset: usize, len: usize) -> &[u8] {
    match bytes.get(offset..) {
        Some(rest) => &rest[..len.min(rest.len())],
        None => &[],
    }
}

/// Parse a short ASCII hex field such as `2808` into a u16
fn parse_hex_u16(raw: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Parse one complete structured packet
pub fn parse_packet(bytes: &[u8], config: &StructuredPacketConfig) -> ParsedPacket {
    let mut packet = ParsedPacket::default();

    if bytes.len() != config.expected_packet_size() {
        warn!(
            got = bytes.len(),
            expected = config.expected_packet_size(),
            "Packet has unexpected length"
        );
        packet.record(PacketIssue::WrongLength {
            expected: config.expected_packet_size(),
            actual: bytes.len(),
        });
        return packet;
    }

    // Prefix
    let prefix = field(bytes, 0, PACKET_PREFIX_LEN);
    packet.header_prefix_ok = prefix == PACKET_PREFIX;
    if !packet.header_prefix_ok {
        let found = String::from_utf8_lossy(prefix).into_owned();
        warn!(found = ?found, "Packet prefix mismatch");
        packet.record(PacketIssue::BadPrefix { found });
    }

    // Payload length
    let length_raw = field(bytes, LENGTH_FIELD_OFFSET, PACKET_LENGTH_FIELD_LEN);
    let length_text = String::from_utf8_lossy(length_raw).into_owned();
    let payload_len = parse_hex_u16(length_raw);
    packet.payload_len = payload_len;
    match payload_len {
        None => {
            warn!(text = ?length_text, "Payload length field is not hex");
            packet.record(PacketIssue::UnparsablePayloadLength {
                text: length_text.clone(),
            });
        }
        Some(value) if value != PACKET_PAYLOAD_LEN => {
            warn!(value, expected = PACKET_PAYLOAD_LEN, "Unexpected payload length");
            packet.record(PacketIssue::UnexpectedPayloadLength { value });
        }
        Some(_) => {}
    }
    packet.payload_len_str = Some(length_text);

    // Frame type
    let frame_type_raw = field(bytes, FRAME_TYPE_OFFSET, PACKET_FRAME_TYPE_LEN);
    let frame_type = String::from_utf8_lossy(frame_type_raw).into_owned();
    packet.frame_type_ok = frame_type == PACKET_FRAME_TYPE;
    if !packet.frame_type_ok {
        debug!(found = ?frame_type, "Frame type is not {}", PACKET_FRAME_TYPE);
        packet.record(PacketIssue::UnexpectedFrameType {
            found: frame_type.clone(),
        });
    }
    packet.frame_type = Some(frame_type);

    packet.metadata = Some(field(bytes, METADATA_OFFSET, PACKET_METADATA_LEN).to_vec());

    // Image
    let image_raw = field(bytes, PACKET_IMAGE_OFFSET, config.image_size());
    if image_raw.len() != config.image_size() {
        warn!(
            got = image_raw.len(),
            expected = config.image_size(),
            "Image payload truncated"
        );
        packet.record(PacketIssue::ImageTruncated {
            expected: config.image_size(),
            actual: image_raw.len(),
        });
    } else {
        packet.thermal_image = decode_image(image_raw, config.width(), config.height());
        if packet.thermal_image.is_none() {
            packet.record(PacketIssue::ImageDecodeFailed);
        }
    }
    packet.image_payload = Some(image_raw.to_vec());

    // Checksum, surfaced only
    let checksum_raw = field(bytes, config.checksum_offset(), PACKET_CHECKSUM_LEN);
    if checksum_raw.len() < PACKET_CHECKSUM_LEN {
        warn!(got = checksum_raw.len(), "Checksum field truncated");
        packet.record(PacketIssue::ChecksumTruncated {
            expected: PACKET_CHECKSUM_LEN,
            actual: checksum_raw.len(),
        });
    } else {
        let text = String::from_utf8_lossy(checksum_raw).into_owned();
        let checksum = parse_hex_u16(checksum_raw);
        packet.checksum = checksum;
        if checksum.is_none() {
            debug!(text = ?text, "Checksum field is not hex");
            packet.record(PacketIssue::UnparsableChecksum { text: text.clone() });
        }
        packet.checksum_str = Some(text);
    }

    packet.is_valid = packet.thermal_image.is_some()
        && !packet.issues.iter().any(PacketIssue::invalidates);

    packet
}

/// Builds structured packets, mainly for tests and synthetic streams
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    prefix: Vec<u8>,
    payload_len: Vec<u8>,
    frame_type: Vec<u8>,
    metadata: Vec<u8>,
    image: ImageMatrix<u16>,
    checksum: Vec<u8>,
}

impl PacketBuilder {
    /// Start a well-formed packet carrying `image`
    pub fn new(image: ImageMatrix<u16>) -> Self {
        Self {
            prefix: PACKET_PREFIX.to_vec(),
            payload_len: format!("{:04X}", PACKET_PAYLOAD_LEN).into_bytes(),
            frame_type: PACKET_FRAME_TYPE.as_bytes().to_vec(),
            metadata: vec![0; PACKET_METADATA_LEN],
            image,
            checksum: b"0000".to_vec(),
        }
    }

    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn payload_len_field(mut self, text: &str) -> Self {
        self.payload_len = text.as_bytes().to_vec();
        self
    }

    pub fn frame_type(mut self, tag: &str) -> Self {
        self.frame_type = tag.as_bytes().to_vec();
        self
    }

    pub fn metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn checksum_field(mut self, text: &str) -> Self {
        self.checksum = text.as_bytes().to_vec();
        self
    }

    /// Serialise the packet, zero-padded to the configured packet size
    pub fn build(&self, config: &StructuredPacketConfig) -> Result<Vec<u8>> {
        let fixed = [
            ("prefix", &self.prefix, PACKET_PREFIX_LEN),
            ("payload length", &self.payload_len, PACKET_LENGTH_FIELD_LEN),
            ("frame type", &self.frame_type, PACKET_FRAME_TYPE_LEN),
            ("metadata", &self.metadata, PACKET_METADATA_LEN),
            ("checksum", &self.checksum, PACKET_CHECKSUM_LEN),
        ];
        for (name, value, len) in fixed {
            if value.len() != len {
                return Err(SharedError::invalid_packet(format!(
                    "{} field must be {} bytes, got {}",
                    name,
                    len,
                    value.len()
                )));
            }
        }

        if self.image.width() != config.width() || self.image.height() != config.height() {
            return Err(SharedError::invalid_packet(format!(
                "Image is {}x{}, packet expects {}x{}",
                self.image.width(),
                self.image.height(),
                config.width(),
                config.height()
            )));
        }
        if config.layout_size() > config.expected_packet_size() {
            return Err(SharedError::invalid_packet(format!(
                "Packet layout needs {} bytes but packet size is {}",
                config.layout_size(),
                config.expected_packet_size()
            )));
        }

        let mut bytes = Vec::with_capacity(config.expected_packet_size());
        bytes.extend_from_slice(&self.prefix);
        bytes.extend_from_slice(&self.payload_len);
        bytes.extend_from_slice(&self.frame_type);
        bytes.extend_from_slice(&self.metadata);
        bytes.extend_from_slice(&encode_image(&self.image));
        bytes.extend_from_slice(&self.checksum);
        bytes.resize(config.expected_packet_size(), 0);

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StructuredPacketConfig {
        StructuredPacketConfig::new("127.0.0.1", 3333, 4, 3, 200).unwrap()
    }

    fn test_image() -> ImageMatrix<u16> {
        ImageMatrix::new(4, 3, (0..12).map(|v| v * 100 + 7).collect()).unwrap()
    }

    #[test]
    fn test_valid_packet() {
        let config = test_config();
        let metadata: Vec<u8> = (0..160).map(|i| i as u8).collect();
        let bytes = PacketBuilder::new(test_image())
            .metadata(metadata.clone())
            .checksum_field("BEEF")
            .build(&config)
            .unwrap();
        assert_eq!(bytes.len(), 200);

        let packet = parse_packet(&bytes, &config);
        assert!(packet.is_valid);
        assert!(packet.header_prefix_ok);
        assert_eq!(packet.payload_len_str.as_deref(), Some("2808"));
        assert_eq!(packet.payload_len, Some(0x2808));
        assert_eq!(packet.frame_type.as_deref(), Some("GFRA"));
        assert_eq!(packet.metadata, Some(metadata));
        assert_eq!(packet.image_payload.as_ref().map(Vec::len), Some(24));
        assert_eq!(packet.thermal_image, Some(test_image()));
        assert_eq!(packet.checksum_str.as_deref(), Some("BEEF"));
        assert_eq!(packet.checksum, Some(0xBEEF));
        assert!(packet.issues.is_empty());
    }

    #[test]
    fn test_wrong_length_returns_empty_packet() {
        let config = test_config();
        let bytes = PacketBuilder::new(test_image()).build(&config).unwrap();

        for len in [0, 199, 201] {
            let mut data = bytes.clone();
            data.resize(len, 0);

            let packet = parse_packet(&data, &config);
            assert!(!packet.is_valid);
            assert!(packet.thermal_image.is_none());
            assert!(packet.payload_len_str.is_none());
            assert!(packet.metadata.is_none());
            assert_eq!(
                packet.issues,
                vec![PacketIssue::WrongLength { expected: 200, actual: len }]
            );
        }
    }

    #[test]
    fn test_bad_payload_length_still_decodes_image() {
        let config = test_config();
        let bytes = PacketBuilder::new(test_image())
            .payload_len_field("2807")
            .build(&config)
            .unwrap();

        let packet = parse_packet(&bytes, &config);
        assert!(!packet.is_valid);
        assert_eq!(packet.payload_len, Some(0x2807));
        assert_eq!(packet.thermal_image, Some(test_image()));
    }

    #[test]
    fn test_unparsable_payload_length_keeps_text() {
        let config = test_config();
        let bytes = PacketBuilder::new(test_image())
            .payload_len_field("zz08")
            .build(&config)
            .unwrap();

        let packet = parse_packet(&bytes, &config);
        assert!(!packet.is_valid);
        assert_eq!(packet.payload_len_str.as_deref(), Some("zz08"));
        assert_eq!(packet.payload_len, None);
        assert!(packet.thermal_image.is_some());
    }

    #[test]
    fn test_bad_prefix_invalidates_but_parses() {
        let config = test_config();
        let bytes = PacketBuilder::new(test_image())
            .prefix(b"  ##")
            .build(&config)
            .unwrap();

        let packet = parse_packet(&bytes, &config);
        assert!(!packet.is_valid);
        assert!(!packet.header_prefix_ok);
        assert_eq!(packet.frame_type.as_deref(), Some("GFRA"));
        assert!(packet.thermal_image.is_some());
    }

    #[test]
    fn test_frame_type_mismatch_alone_is_valid() {
        let config = test_config();
        let bytes = PacketBuilder::new(test_image())
            .frame_type("XXXX")
            .build(&config)
            .unwrap();

        let packet = parse_packet(&bytes, &config);
        assert!(packet.is_valid);
        assert!(!packet.frame_type_ok);
        assert_eq!(packet.frame_type.as_deref(), Some("XXXX"));
        assert_eq!(
            packet.issues,
            vec![PacketIssue::UnexpectedFrameType { found: "XXXX".to_string() }]
        );
    }

    #[test]
    fn test_unparsable_checksum_does_not_invalidate() {
        let config = test_config();
        let bytes = PacketBuilder::new(test_image())
            .checksum_field("QQQQ")
            .build(&config)
            .unwrap();

        let packet = parse_packet(&bytes, &config);
        assert!(packet.is_valid);
        assert_eq!(packet.checksum_str.as_deref(), Some("QQQQ"));
        assert_eq!(packet.checksum, None);
    }

    #[test]
    fn test_packet_size_smaller_than_layout() {
        // 4x3 image needs 12 + 160 + 24 + 4 = 200 bytes; only 190 are configured
        let config = StructuredPacketConfig::new("127.0.0.1", 3333, 4, 3, 190).unwrap();
        let mut bytes = PacketBuilder::new(test_image())
            .build(&test_config())
            .unwrap();
        bytes.truncate(190);

        let packet = parse_packet(&bytes, &config);
        assert!(!packet.is_valid);
        assert!(packet.thermal_image.is_none());
        assert_eq!(packet.image_payload.as_ref().map(Vec::len), Some(18));
        assert!(packet.checksum_str.is_none());
        assert!(packet
            .issues
            .contains(&PacketIssue::ImageTruncated { expected: 24, actual: 18 }));
        assert!(packet
            .issues
            .contains(&PacketIssue::ChecksumTruncated { expected: 4, actual: 0 }));
    }

    #[test]
    fn test_checksum_only_truncated() {
        // Image fits, checksum gets 2 of its 4 bytes
        let config = StructuredPacketConfig::new("127.0.0.1", 3333, 4, 3, 198).unwrap();
        let mut bytes = PacketBuilder::new(test_image())
            .build(&test_config())
            .unwrap();
        bytes.truncate(198);

        let packet = parse_packet(&bytes, &config);
        assert!(!packet.is_valid);
        assert_eq!(packet.thermal_image, Some(test_image()));
        assert_eq!(
            packet.issues,
            vec![PacketIssue::ChecksumTruncated { expected: 4, actual: 2 }]
        );
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(parse_hex_u16(b"2808"), Some(0x2808));
        assert_eq!(parse_hex_u16(b" 808"), Some(0x808));
        assert_eq!(parse_hex_u16(b"0x1F"), Some(0x1F));
        assert_eq!(parse_hex_u16(b"    "), None);
        assert_eq!(parse_hex_u16(&[0xFF, 0x30, 0x30, 0x30]), None);
    }

    #[test]
    fn test_default_config_packet() {
        let config = StructuredPacketConfig::default();
        let image = ImageMatrix::filled(80, 60, 3000u16);
        let bytes = PacketBuilder::new(image.clone()).build(&config).unwrap();

        let packet = parse_packet(&bytes, &config);
        assert!(packet.is_valid);
        assert_eq!(packet.thermal_image, Some(image));

        let json = packet.summary_json().unwrap();
        assert!(json.contains("\"image_shape\""));
    }

    #[test]
    fn test_builder_rejects_bad_fields() {
        let config = test_config();

        assert!(PacketBuilder::new(test_image())
            .frame_type("GFRAME")
            .build(&config)
            .is_err());
        assert!(PacketBuilder::new(ImageMatrix::filled(3, 3, 0))
            .build(&config)
            .is_err());
    }
}
