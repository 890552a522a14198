//! Half-duplex serial I/O
//!
//! [`SerialIoHandler`] sits between the transport and the adapter. It feeds
//! inbound bytes through a [`FrameDecoder`], writes outbound frames and makes
//! sure the two never interleave on the wire: the [`HalfDuplexLock`] is taken
//! while a multi-byte frame is being received and for every write. A write
//! that cannot get the line within the lock timeout drops the stalled inbound
//! frame and fails.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::decoder::{DecodeEvent, FrameDecoder};
use super::frame::{Frame, FrameType};
use super::serial::{ByteSink, Transport};
use super::{ProtocolError, DEFAULT_TIMEOUT_MS};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Non-reentrant binary lock whose acquire and release may happen in
/// different calls
///
/// The receive path acquires it when a data frame starts and releases it when
/// the frame completes or fails, possibly several reads later.
#[derive(Debug, Default)]
pub struct HalfDuplexLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl HalfDuplexLock {
    /// Create a free lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free, then take it
    pub fn acquire(&self) {
        let mut held = lock(&self.held);
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *held = true;
    }

    /// Take the lock if it is free within `timeout`
    pub fn try_acquire_for(&self, timeout: Duration) -> bool {
        let held = lock(&self.held);
        let (mut held, _) = self
            .released
            .wait_timeout_while(held, timeout, |held| *held)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *held {
            return false;
        }
        *held = true;
        true
    }

    /// Release the lock; releasing a free lock is a no-op
    pub fn release(&self) {
        let mut held = lock(&self.held);
        if *held {
            *held = false;
            self.released.notify_one();
        }
    }

    /// Whether someone holds the lock
    pub fn is_held(&self) -> bool {
        *lock(&self.held)
    }

    /// Acquire within `timeout` and release on drop
    pub fn try_guard_for(&self, timeout: Duration) -> Option<HalfDuplexGuard<'_>> {
        self.try_acquire_for(timeout)
            .then(|| HalfDuplexGuard { lock: self })
    }
}

/// Scoped hold of a [`HalfDuplexLock`]
pub struct HalfDuplexGuard<'a> {
    lock: &'a HalfDuplexLock,
}

impl Drop for HalfDuplexGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Per-direction frame counters
#[derive(Debug, Default)]
pub struct AdapterStatistics {
    sof: AtomicU64,
    ack: AtomicU64,
    nak: AtomicU64,
    can: AtomicU64,
    out_of_frame: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`AdapterStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Data frames
    pub sof: u64,
    pub ack: u64,
    pub nak: u64,
    pub can: u64,
    /// Bytes received outside any frame
    pub out_of_frame: u64,
    /// Inbound commands rejected because the dispatch queue was full
    pub dropped: u64,
}

impl AdapterStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one frame of the given type
    pub fn record(&self, frame_type: FrameType) {
        let counter = match frame_type {
            FrameType::Sof => &self.sof,
            FrameType::Ack => &self.ack,
            FrameType::Nak => &self.nak,
            FrameType::Can => &self.can,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one out-of-frame byte
    pub fn record_out_of_frame(&self) {
        self.out_of_frame.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one command dropped by the dispatch queue
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            sof: self.sof.load(Ordering::Relaxed),
            ack: self.ack.load(Ordering::Relaxed),
            nak: self.nak.load(Ordering::Relaxed),
            can: self.can.load(Ordering::Relaxed),
            out_of_frame: self.out_of_frame.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Serial I/O for one transport
pub struct SerialIoHandler {
    transport: Mutex<Box<dyn Transport>>,
    decoder: Mutex<FrameDecoder>,
    half_duplex: HalfDuplexLock,
    lock_timeout: Duration,
    rx_stats: AdapterStatistics,
    tx_stats: AdapterStatistics,
}

impl SerialIoHandler {
    /// Handler over `transport` with the default lock timeout
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(transport),
            decoder: Mutex::new(FrameDecoder::new()),
            half_duplex: HalfDuplexLock::new(),
            lock_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            rx_stats: AdapterStatistics::new(),
            tx_stats: AdapterStatistics::new(),
        }
    }

    /// Set how long a write waits for the line
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Open the transport and send a NAK to clear any partial peer state
    pub fn open_port(&self, timeout: Duration, sink: Arc<dyn ByteSink>) -> Result<bool, ProtocolError> {
        let opened = lock(&self.transport).open(timeout, sink)?;
        if !opened {
            tracing::error!("Failed to open serial port");
            return Ok(false);
        }

        self.send_frame(&Frame::Nak)?;
        Ok(true)
    }

    /// Close the transport and drop any partially received frame
    pub fn close_port(&self) -> Result<bool, ProtocolError> {
        let closed = lock(&self.transport).close()?;
        self.resynchronize();
        Ok(closed)
    }

    /// Write one frame under the half-duplex lock
    ///
    /// Blocks for at most the lock timeout while an inbound frame holds the
    /// line. On expiry the inbound frame is dropped and the write fails.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), ProtocolError> {
        let bytes = frame.to_bytes();
        let Some(_guard) = self.half_duplex.try_guard_for(self.lock_timeout) else {
            tracing::warn!(
                "Line busy for {:?} - dropping stalled inbound frame",
                self.lock_timeout
            );
            self.resynchronize();
            return Err(ProtocolError::TransportIoError(format!(
                "line busy for {:?}",
                self.lock_timeout
            )));
        };

        match frame {
            Frame::Data(_) => tracing::info!("SEND - {}", hex(&bytes)),
            other => tracing::debug!("SEND {:?}", other.frame_type()),
        }

        let mut transport = lock(&self.transport);
        if let Err(e) = transport.clear_input() {
            tracing::debug!("Failed to clear stale input - {}", e);
        }
        transport
            .write(&bytes)
            .and_then(|_| transport.flush())
            .map_err(|e| {
                tracing::error!("Failed to send frame - {}", e);
                ProtocolError::TransportIoError(e.to_string())
            })?;

        self.tx_stats.record(frame.frame_type());
        Ok(())
    }

    /// Feed a chunk of received bytes, handing each completed frame to `deliver`
    ///
    /// The half-duplex lock is released before `deliver` runs so the
    /// callback may send frames. A malformed frame is answered with a NAK and
    /// the rest of the chunk is discarded.
    pub fn handle_bytes(&self, bytes: &[u8], mut deliver: impl FnMut(Frame)) {
        tracing::debug!("Received serial event - {} bytes", bytes.len());

        for &byte in bytes {
            let (was_in_frame, result, in_frame) = {
                let mut decoder = lock(&self.decoder);
                let was_in_frame = decoder.in_frame();
                let result = decoder.push(byte);
                (was_in_frame, result, decoder.in_frame())
            };

            if !was_in_frame && in_frame {
                self.half_duplex.acquire();
            } else if was_in_frame && !in_frame {
                self.half_duplex.release();
            }

            match result {
                Ok(DecodeEvent::Pending) => {}
                Ok(DecodeEvent::OutOfFrame(byte)) => {
                    tracing::warn!("Received byte {:#04X} out of frame - ignoring", byte);
                    self.rx_stats.record_out_of_frame();
                }
                Ok(DecodeEvent::Frame(frame)) => {
                    if let Frame::Data(data) = &frame {
                        tracing::info!("REC - {}", hex(&data.to_bytes()));
                    }
                    self.rx_stats.record(frame.frame_type());
                    deliver(frame);
                }
                Err(e) => {
                    tracing::error!("Failed to parse frame - {}", e);
                    if let Err(e) = self.send_frame(&Frame::Nak) {
                        tracing::error!("Failed to send NAK after frame error - {}", e);
                    }
                    break;
                }
            }
        }
    }

    /// Reset the decoder and free the lock if a frame was in progress
    pub fn resynchronize(&self) {
        let mut decoder = lock(&self.decoder);
        if decoder.in_frame() {
            decoder.reset();
            self.half_duplex.release();
        }
    }

    pub fn rx_statistics(&self) -> &AdapterStatistics {
        &self.rx_stats
    }

    pub fn tx_statistics(&self) -> &AdapterStatistics {
        &self.tx_stats
    }

    /// Whether a write or a multi-byte receive currently holds the line
    pub fn is_line_busy(&self) -> bool {
        self.half_duplex.is_held()
    }
}

fn hex(bytes: &[u8]) -> String {
    let parts: Vec<String> = bytes.iter().map(|b| format!("{:#04X}", b)).collect();
    format!("[{}]", parts.join(","))
}
