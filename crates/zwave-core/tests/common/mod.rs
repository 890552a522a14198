//! In-memory transport shared by the adapter tests

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use zwave_core::protocol::{Buffer, ByteSink, DataFrame, FrameKind, ProtocolError, Transport};

struct Shared {
    sink: Mutex<Option<Arc<dyn ByteSink>>>,
    written: Mutex<Vec<Vec<u8>>>,
    open: Mutex<bool>,
}

/// Transport that records writes and forwards them to a [`MockPeer`]
pub struct MockTransport {
    shared: Arc<Shared>,
    writes: mpsc::UnboundedSender<Vec<u8>>,
    opens: bool,
}

/// Module side of a [`MockTransport`]
pub struct MockPeer {
    shared: Arc<Shared>,
    writes: mpsc::UnboundedReceiver<Vec<u8>>,
}

pub fn mock_transport() -> (MockTransport, MockPeer) {
    let shared = Arc::new(Shared {
        sink: Mutex::new(None),
        written: Mutex::new(Vec::new()),
        open: Mutex::new(false),
    });
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockTransport {
            shared: shared.clone(),
            writes: tx,
            opens: true,
        },
        MockPeer { shared, writes: rx },
    )
}

impl MockTransport {
    /// Make `open` report failure
    pub fn refusing(mut self) -> Self {
        self.opens = false;
        self
    }
}

impl Transport for MockTransport {
    fn open(&mut self, _timeout: Duration, sink: Arc<dyn ByteSink>) -> Result<bool, ProtocolError> {
        if !self.opens {
            return Ok(false);
        }
        *self.shared.sink.lock().unwrap() = Some(sink);
        *self.shared.open.lock().unwrap() = true;
        Ok(true)
    }

    fn close(&mut self) -> Result<bool, ProtocolError> {
        self.shared.sink.lock().unwrap().take();
        let mut open = self.shared.open.lock().unwrap();
        let was_open = *open;
        *open = false;
        Ok(was_open)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !*self.shared.open.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.shared.written.lock().unwrap().push(bytes.to_vec());
        let _ = self.writes.send(bytes.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MockPeer {
    /// Next chunk the host wrote
    pub async fn next_write(&mut self) -> Vec<u8> {
        self.writes.recv().await.expect("transport dropped")
    }

    /// Next chunk the host wrote, skipping single-byte control frames
    pub async fn next_data_frame(&mut self) -> Vec<u8> {
        loop {
            let bytes = self.next_write().await;
            if bytes.len() > 1 {
                return bytes;
            }
        }
    }

    /// Push bytes to the host as if read from the wire
    pub fn inject(&self, bytes: &[u8]) {
        let sink = self.shared.sink.lock().unwrap().clone();
        sink.expect("transport not open").on_bytes(bytes);
    }

    /// Everything the host wrote so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().unwrap().clone()
    }

    pub fn is_open(&self) -> bool {
        *self.shared.open.lock().unwrap()
    }
}

/// Encoded response frame from the module
pub fn response(command_id: u8, payload: &[u8]) -> Vec<u8> {
    DataFrame::new(FrameKind::Response, command_id, Buffer::of(payload))
        .expect("test payload fits in a frame")
        .to_bytes()
}

/// Encoded request frame from the module (callback or unsolicited)
pub fn request(command_id: u8, payload: &[u8]) -> Vec<u8> {
    DataFrame::new(FrameKind::Request, command_id, Buffer::of(payload))
        .expect("test payload fits in a frame")
        .to_bytes()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
