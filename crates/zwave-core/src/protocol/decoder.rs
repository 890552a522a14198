//! Frame decoder
//!
//! Byte-level state machine that reconstructs frames from the inbound byte
//! stream. The decoder is pure: locking, statistics and NAK handling live in
//! [`SerialIoHandler`](super::SerialIoHandler).

use serde::{Deserialize, Serialize};

use super::frame::{DataFrame, Frame, FrameType};
use super::{FrameError, MAX_FRAME_LENGTH, MIN_FRAME_LENGTH};

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderState {
    /// Idle between frames
    WaitingForFrame,
    /// SOF seen, next byte is the length
    WaitingForLength,
    /// Collecting the frame body
    ReadingFrame,
}

/// Result of feeding one byte to the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// Byte consumed, frame not complete yet
    Pending,
    /// A complete frame
    Frame(Frame),
    /// Byte outside any frame, discarded
    OutOfFrame(u8),
}

/// Reconstructs frames one byte at a time
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    expected_length: u8,
    body: Vec<u8>,
}

impl FrameDecoder {
    /// Decoder waiting for the start of a frame
    pub fn new() -> Self {
        Self {
            state: DecoderState::WaitingForFrame,
            expected_length: 0,
            body: Vec::with_capacity(MAX_FRAME_LENGTH as usize),
        }
    }

    /// Current state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Whether a multi-byte frame is being assembled
    pub fn in_frame(&self) -> bool {
        self.state != DecoderState::WaitingForFrame
    }

    /// Drop any partial frame and return to `WaitingForFrame`
    pub fn reset(&mut self) {
        self.state = DecoderState::WaitingForFrame;
        self.expected_length = 0;
        self.body.clear();
    }

    /// Feed one byte
    ///
    /// On error the decoder has already been reset to `WaitingForFrame`.
    pub fn push(&mut self, byte: u8) -> Result<DecodeEvent, FrameError> {
        let result = self.consume(byte);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn consume(&mut self, byte: u8) -> Result<DecodeEvent, FrameError> {
        match self.state {
            DecoderState::WaitingForFrame => match FrameType::from_protocol_value(byte) {
                Some(FrameType::Sof) => {
                    self.state = DecoderState::WaitingForLength;
                    Ok(DecodeEvent::Pending)
                }
                Some(frame_type) => Ok(Frame::control(frame_type)
                    .map(DecodeEvent::Frame)
                    .unwrap_or(DecodeEvent::OutOfFrame(byte))),
                None => Ok(DecodeEvent::OutOfFrame(byte)),
            },
            DecoderState::WaitingForLength => {
                if byte < MIN_FRAME_LENGTH {
                    return Err(FrameError::InvalidLength(byte));
                }
                if byte == MIN_FRAME_LENGTH || byte > MAX_FRAME_LENGTH {
                    tracing::warn!("Frame length {} is not valid, reading best-effort", byte);
                }
                self.expected_length = byte;
                self.body.clear();
                self.state = DecoderState::ReadingFrame;
                Ok(DecodeEvent::Pending)
            }
            DecoderState::ReadingFrame => {
                self.body.push(byte);
                if self.body.len() < self.expected_length as usize {
                    return Ok(DecodeEvent::Pending);
                }

                let frame = DataFrame::from_body(self.expected_length, &self.body)?;
                self.reset();
                Ok(DecodeEvent::Frame(Frame::Data(frame)))
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
