//! Serial Protocol Communication
//!
//! Implements the Z-Wave Host API serial framing: single-byte ACK/NAK/CAN
//! frames and checksummed data frames over a half-duplex link.

mod buffer;
pub mod decoder;
mod error;
pub mod frame;
pub mod io;
pub mod serial;

pub use buffer::Buffer;
pub use decoder::{DecodeEvent, DecoderState, FrameDecoder};
pub use error::{CodecError, FrameError, ProtocolError, RegistryError, SequenceError};
pub use frame::{DataFrame, Frame, FrameKind, FrameType};
pub use io::{
    AdapterStatistics, HalfDuplexGuard, HalfDuplexLock, SerialIoHandler, StatisticsSnapshot,
};
pub use serial::{list_ports, open_port, ByteSink, PortInfo, SerialTransport, Transport};

/// Default baud rate of Z-Wave modules
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default time to wait for an ACK, response or callback in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

/// Smallest length byte: kind, command id and checksum with no payload
pub const MIN_FRAME_LENGTH: u8 = 3;

/// Largest length byte the protocol allows
pub const MAX_FRAME_LENGTH: u8 = 64;

/// Largest payload that fits in one data frame
pub const MAX_PAYLOAD_LENGTH: usize = (MAX_FRAME_LENGTH - MIN_FRAME_LENGTH) as usize;
