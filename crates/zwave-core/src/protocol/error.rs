//! Protocol errors

use thiserror::Error;

use crate::api::CommandFlow;
use crate::sequence::{SequenceOperation, SequenceState};

/// Errors raised while reading or writing command payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Buffer underflow: read past end of {length}-byte buffer")]
    BufferUnderflow { length: usize },

    #[error("Index {index} out of bounds for {length}-byte buffer")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Invalid value {value:#04x} for {field}")]
    InvalidValue { field: &'static str, value: u8 },

    #[error("No version number in {0:?}")]
    InvalidVersion(String),
}

/// Errors raised while assembling or validating a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame: length {0} cannot hold type, command id and checksum")]
    InvalidLength(u8),

    #[error("Malformed frame: unknown frame kind {0:#04x}")]
    UnknownKind(u8),

    #[error("Malformed frame: expected {expected} body bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Payload of {size} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Errors raised by a command sequence when driven out of order
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Illegal state transition: cannot {operation} in state {state:?}")]
    IllegalStateTransition {
        state: SequenceState,
        operation: SequenceOperation,
    },
}

/// Errors raised while building the command registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Command {id:#04x}: a response codec is required for flow {flow}")]
    MissingResponseCodec { id: u8, flow: CommandFlow },

    #[error("Command {id:#04x}: no response is expected for flow {flow}")]
    UnexpectedResponseCodec { id: u8, flow: CommandFlow },

    #[error("Command {id:#04x}: a callback codec is required for flow {flow}")]
    MissingCallbackCodec { id: u8, flow: CommandFlow },

    #[error("Command {id:#04x}: no callback is expected for flow {flow}")]
    UnexpectedCallbackCodec { id: u8, flow: CommandFlow },

    #[error("Command {id:#04x}: codec {codec} must be decodable from a buffer")]
    NotDecodable { id: u8, codec: &'static str },

    #[error("Command {0:#04x} is registered more than once")]
    DuplicateCommandId(u8),
}

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Transport I/O error: {0}")]
    TransportIoError(String),

    #[error("Adapter is not running")]
    NotRunning,

    #[error("Adapter is already running")]
    AlreadyRunning,

    #[error("No command registered for id {0:#04x}")]
    UnregisteredCommand(u8),

    #[error("Received data frame for unknown command id {0:#04x}")]
    UnknownCommandId(u8),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
