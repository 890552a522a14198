//! Frame encoding/decoding
//!
//! Implements the Host API serial frame format.
//!
//! Frame format:
//! - 1 byte: frame type (SOF, ACK, NAK or CAN)
//!
//! Data frames (SOF) continue with:
//! - 1 byte: length of the remainder (kind + command id + payload + checksum)
//! - 1 byte: kind (0x00 request, 0x01 response)
//! - 1 byte: command id
//! - N bytes: payload (length - 3)
//! - 1 byte: checksum (0xFF XOR length XOR kind XOR command id XOR payload)

use serde::{Deserialize, Serialize};

use super::{Buffer, FrameError, MAX_PAYLOAD_LENGTH, MIN_FRAME_LENGTH};

/// Start of a data frame
pub const SOF: u8 = 0x01;
/// Acknowledge
pub const ACK: u8 = 0x06;
/// Negative acknowledge
pub const NAK: u8 = 0x15;
/// Cancel (collision detected)
pub const CAN: u8 = 0x18;

/// First byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Start of a data frame
    Sof,
    /// Successful reception of a data frame
    Ack,
    /// Error in the reception of a data frame
    Nak,
    /// Collision detected during data frame transmission
    Can,
}

impl FrameType {
    /// Wire value of the frame type byte
    pub fn protocol_value(&self) -> u8 {
        match self {
            FrameType::Sof => SOF,
            FrameType::Ack => ACK,
            FrameType::Nak => NAK,
            FrameType::Can => CAN,
        }
    }

    /// Look up a frame type by its wire value
    pub fn from_protocol_value(value: u8) -> Option<Self> {
        match value {
            SOF => Some(FrameType::Sof),
            ACK => Some(FrameType::Ack),
            NAK => Some(FrameType::Nak),
            CAN => Some(FrameType::Can),
            _ => None,
        }
    }
}

/// Direction of a data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Host-originated commands, unsolicited module commands and callbacks
    Request,
    /// Module responses to a request
    Response,
}

impl FrameKind {
    /// Wire value of the kind byte
    pub fn protocol_value(&self) -> u8 {
        match self {
            FrameKind::Request => 0x00,
            FrameKind::Response => 0x01,
        }
    }

    /// Look up a kind by its wire value
    pub fn from_protocol_value(value: u8) -> Result<Self, FrameError> {
        match value {
            0x00 => Ok(FrameKind::Request),
            0x01 => Ok(FrameKind::Response),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// A checksummed data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Remaining length after the length byte
    pub length: u8,
    /// Request or response
    pub kind: FrameKind,
    /// Command id used to pick the payload codec
    pub command_id: u8,
    /// Command payload (length - 3 bytes)
    pub payload: Buffer,
    /// Checksum carried on the wire (or computed, for outbound frames)
    pub checksum: u8,
}

impl DataFrame {
    /// Build an outbound frame, computing length and checksum
    ///
    /// Fails if the payload does not fit under the largest length byte.
    pub fn new(kind: FrameKind, command_id: u8, payload: Buffer) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_LENGTH,
            });
        }
        let length = payload.len() as u8 + MIN_FRAME_LENGTH;
        let checksum = calculate_checksum(length, kind, command_id, payload.as_slice());
        Ok(Self {
            length,
            kind,
            command_id,
            payload,
            checksum,
        })
    }

    /// Build a host request frame
    pub fn request(command_id: u8, payload: Buffer) -> Result<Self, FrameError> {
        Self::new(FrameKind::Request, command_id, payload)
    }

    /// Decode the frame body that follows the length byte
    ///
    /// `body` holds kind, command id, payload and the received checksum.
    /// The checksum is stored as received; see [`DataFrame::is_valid`].
    pub fn from_body(length: u8, body: &[u8]) -> Result<Self, FrameError> {
        if length < MIN_FRAME_LENGTH {
            return Err(FrameError::InvalidLength(length));
        }
        let expected = length as usize;
        if body.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                actual: body.len(),
            });
        }

        let kind = FrameKind::from_protocol_value(body[0])?;
        let command_id = body[1];
        let payload = Buffer::of(&body[2..expected - 1]);
        let checksum = body[expected - 1];

        Ok(Self {
            length,
            kind,
            command_id,
            payload,
            checksum,
        })
    }

    /// Decode a complete frame starting with SOF
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        match data {
            [SOF, length, body @ ..] => Self::from_body(*length, body),
            _ => Err(FrameError::Truncated {
                expected: 2,
                actual: data.len(),
            }),
        }
    }

    /// Checksum computed over the frame contents
    pub fn calculate_checksum(&self) -> u8 {
        calculate_checksum(
            self.length,
            self.kind,
            self.command_id,
            self.payload.as_slice(),
        )
    }

    /// Whether the carried checksum matches the contents
    pub fn is_valid(&self) -> bool {
        self.calculate_checksum() == self.checksum
    }

    /// Check the carried checksum against the contents
    pub fn verify(&self) -> Result<(), FrameError> {
        let expected = self.calculate_checksum();
        if expected != self.checksum {
            return Err(FrameError::ChecksumMismatch {
                expected,
                actual: self.checksum,
            });
        }
        Ok(())
    }

    /// Encode the frame to raw bytes
    ///
    /// The checksum is always recomputed so encoded frames are valid.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.push(SOF);
        bytes.push(self.length);
        bytes.push(self.kind.protocol_value());
        bytes.push(self.command_id);
        bytes.extend_from_slice(self.payload.as_slice());
        bytes.push(self.calculate_checksum());
        bytes
    }

    /// Total encoded size including SOF and length
    pub fn encoded_size(&self) -> usize {
        self.payload.len() + 5
    }
}

/// A frame on the serial link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Data frame received intact
    Ack,
    /// Data frame rejected
    Nak,
    /// Data frame dropped after a collision
    Can,
    /// SOF-framed command
    Data(DataFrame),
}

impl Frame {
    /// Single-byte frame for a non-SOF frame type
    pub fn control(frame_type: FrameType) -> Option<Self> {
        match frame_type {
            FrameType::Ack => Some(Frame::Ack),
            FrameType::Nak => Some(Frame::Nak),
            FrameType::Can => Some(Frame::Can),
            FrameType::Sof => None,
        }
    }

    /// The frame type byte of this frame
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Ack => FrameType::Ack,
            Frame::Nak => FrameType::Nak,
            Frame::Can => FrameType::Can,
            Frame::Data(_) => FrameType::Sof,
        }
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::Data(data) => data.to_bytes(),
            other => vec![other.frame_type().protocol_value()],
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(frame: DataFrame) -> Self {
        Frame::Data(frame)
    }
}

/// XOR checksum seeded with 0xFF
pub fn calculate_checksum(length: u8, kind: FrameKind, command_id: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(
        0xFF ^ length ^ kind.protocol_value() ^ command_id,
        |checksum, byte| checksum ^ byte,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let original = DataFrame::request(0x13, Buffer::of(&[0x02, 0x01, 0x20, 0x25, 0x07]))
            .expect("fits in a frame");
        let encoded = original.to_bytes();
        let decoded = DataFrame::from_bytes(&encoded).expect("Should decode successfully");

        assert_eq!(original, decoded);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_empty_request_encoding() {
        // Get Library Version: SOF, len 3, request, 0x15, checksum
        let frame = DataFrame::request(0x15, Buffer::empty()).expect("fits in a frame");
        assert_eq!(frame.to_bytes(), vec![0x01, 0x03, 0x00, 0x15, 0xE9]);
    }

    #[test]
    fn test_checksum_verification() {
        let frame = DataFrame::request(0x20, Buffer::of(&[1, 2, 3])).expect("fits in a frame");
        let mut encoded = frame.to_bytes();

        // Corrupt a payload byte
        encoded[5] ^= 0xFF;

        let corrupted = DataFrame::from_bytes(&encoded).expect("frame structure is intact");
        assert!(!corrupted.is_valid());
        assert!(matches!(
            corrupted.verify(),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_payload_limit() {
        let largest = DataFrame::request(0x13, Buffer::of(&[0xAA; 61])).expect("fits in a frame");
        assert_eq!(largest.length, 64);
        assert_eq!(largest.to_bytes().len(), 66);

        assert_eq!(
            DataFrame::request(0x13, Buffer::of(&[0xAA; 62])),
            Err(FrameError::PayloadTooLarge { size: 62, max: 61 })
        );
        assert!(matches!(
            DataFrame::new(FrameKind::Response, 0x13, Buffer::of(&[0xAA; 300])),
            Err(FrameError::PayloadTooLarge { size: 300, .. })
        ));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert_eq!(
            DataFrame::from_body(4, &[0x07, 0x15, 0x00, 0x00]),
            Err(FrameError::UnknownKind(0x07))
        );
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(Frame::Ack.to_bytes(), vec![ACK]);
        assert_eq!(Frame::Nak.to_bytes(), vec![NAK]);
        assert_eq!(Frame::Can.to_bytes(), vec![CAN]);
        assert_eq!(Frame::control(FrameType::Sof), None);
        assert_eq!(FrameType::from_protocol_value(0x42), None);
    }
}
