/*!
Wire format abstraction.

The camera can stream either raw envelope-wrapped frames or structured
packets. Both are fixed-size units on the wire, so a single reassembly and
connection engine can carry either one given a [`WireFormat`].
*/

use crate::config::{StreamConfig, StructuredPacketConfig};
use crate::frame::{decode_frame, DecodedFrame};
use crate::matrix::ImageMatrix;
use crate::packet::{parse_packet, ParsedPacket};

/// A fixed-size unit format that can be sliced out of a byte stream
pub trait WireFormat {
    /// What one unit decodes to
    type Decoded;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Address and port of the device speaking this format
    fn endpoint(&self) -> (&str, u16);

    /// Size in bytes of one complete unit on the wire
    fn unit_size(&self) -> usize;

    /// Decode one unit of exactly [`Self::unit_size`] bytes
    fn decode(&self, unit: &[u8]) -> Self::Decoded;

    /// Whether a decoded unit passed validation
    fn is_valid(decoded: &Self::Decoded) -> bool;

    /// `(width, height)` of the carried image
    fn image_shape(&self) -> (usize, usize);

    /// The raw image, when one could be decoded
    fn image(decoded: &Self::Decoded) -> Option<&ImageMatrix<u16>>;
}

impl WireFormat for StreamConfig {
    type Decoded = DecodedFrame;

    fn name(&self) -> &'static str {
        "frame"
    }

    fn endpoint(&self) -> (&str, u16) {
        (self.server_ip(), self.server_port())
    }

    fn unit_size(&self) -> usize {
        self.total_frame_size()
    }

    fn decode(&self, unit: &[u8]) -> DecodedFrame {
        decode_frame(unit, self)
    }

    fn is_valid(decoded: &DecodedFrame) -> bool {
        decoded.is_valid
    }

    fn image_shape(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    fn image(decoded: &DecodedFrame) -> Option<&ImageMatrix<u16>> {
        decoded.raw.as_ref()
    }
}

impl WireFormat for StructuredPacketConfig {
    type Decoded = ParsedPacket;

    fn name(&self) -> &'static str {
        "packet"
    }

    fn endpoint(&self) -> (&str, u16) {
        (self.server_ip(), self.server_port())
    }

    fn unit_size(&self) -> usize {
        self.expected_packet_size()
    }

    fn decode(&self, unit: &[u8]) -> ParsedPacket {
        parse_packet(unit, self)
    }

    fn is_valid(decoded: &ParsedPacket) -> bool {
        decoded.is_valid
    }

    fn image_shape(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    fn image(decoded: &ParsedPacket) -> Option<&ImageMatrix<u16>> {
        decoded.thermal_image.as_ref()
    }
}
