//! Payload buffer
//!
//! A fixed-length byte array with a read cursor. Command codecs read their
//! fields sequentially with [`Buffer::next`] and friends; encoders fill a
//! buffer of known length with [`Buffer::set`].

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use super::CodecError;

/// Fixed-length byte buffer with a sequential read cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    index: usize,
}

impl Buffer {
    /// Create a zero-filled buffer of the given length
    pub fn with_length(length: usize) -> Self {
        Self {
            data: vec![0; length],
            index: 0,
        }
    }

    /// Create an empty buffer
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a buffer holding exactly the given values
    pub fn of(values: &[u8]) -> Self {
        Self::from(values.to_vec())
    }

    /// Underlying bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and return its bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Buffer length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Absolute read
    pub fn get(&self, index: usize) -> Result<u8, CodecError> {
        self.data
            .get(index)
            .copied()
            .ok_or(CodecError::IndexOutOfBounds {
                index,
                length: self.data.len(),
            })
    }

    /// Absolute write
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), CodecError> {
        let length = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(CodecError::IndexOutOfBounds { index, length })?;
        *slot = value;
        Ok(())
    }

    /// Read the next byte and advance the cursor
    pub fn next(&mut self) -> Result<u8, CodecError> {
        let value = self.data.get(self.index).copied().ok_or(CodecError::BufferUnderflow {
            length: self.data.len(),
        })?;
        self.index += 1;
        Ok(value)
    }

    /// Read the next `count` bytes and advance the cursor
    pub fn next_bytes(&mut self, count: usize) -> Result<&[u8], CodecError> {
        if self.remaining() < count {
            return Err(CodecError::BufferUnderflow {
                length: self.data.len(),
            });
        }
        let start = self.index;
        self.index += count;
        Ok(&self.data[start..self.index])
    }

    /// Read a big-endian 16-bit value
    pub fn next_u16(&mut self) -> Result<u16, CodecError> {
        self.next_bytes(2).map(BigEndian::read_u16)
    }

    /// Read a big-endian 24-bit value (consumes 3 bytes)
    pub fn next_int24(&mut self) -> Result<u32, CodecError> {
        self.next_bytes(3).map(BigEndian::read_u24)
    }

    /// Read a big-endian 32-bit value
    pub fn next_u32(&mut self) -> Result<u32, CodecError> {
        self.next_bytes(4).map(BigEndian::read_u32)
    }

    /// Whether unread bytes remain
    pub fn has_next(&self) -> bool {
        self.index < self.data.len()
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.index)
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, index: 0 }
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, byte) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{:#04X}", byte)?;
        }
        write!(f, "]")
    }
}
