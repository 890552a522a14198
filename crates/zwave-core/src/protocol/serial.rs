//! Serial port handling
//!
//! Defines the [`Transport`] contract the adapter writes through and the
//! [`ByteSink`] it receives bytes on, plus a `serialport`-backed transport
//! for Z-Wave USB sticks and UART modules.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Poll interval of the reader thread
const READ_POLL_MS: u64 = 100;

/// Receives inbound bytes, in order, from a transport reader
pub trait ByteSink: Send + Sync {
    /// Deliver 1..N received bytes
    fn on_bytes(&self, bytes: &[u8]);
}

/// Ordered, reliable, duplex byte stream to the Z-Wave module
pub trait Transport: Send {
    /// Open the link and start delivering inbound bytes to `sink`
    fn open(&mut self, timeout: Duration, sink: Arc<dyn ByteSink>) -> Result<bool, ProtocolError>;

    /// Stop delivering bytes and close the link
    fn close(&mut self) -> Result<bool, ProtocolError>;

    /// Write raw bytes
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush pending output
    fn flush(&mut self) -> io::Result<()>;

    /// Discard stale unread input
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing ttyACM* (most Z-Wave sticks) first, then ttyUSB*, then the rest
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0, "ttyACM"), (1, "ttyUSB")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let port = PortInfo::from(info);
        map.entry(port.name.clone()).or_insert(port);
    }

    // Some udev setups hide ACM devices from the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open a serial port configured 8N1 without flow control
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let port = serialport::new(name, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
            _ => ProtocolError::SerialError(e.to_string()),
        })?;
    tracing::info!("Opened serial port {} at {} baud", name, baud);
    Ok(port)
}

/// Serial port transport with a dedicated reader thread
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    reader: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
            reader: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Name of the underlying port
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is not open"))
    }

    fn spawn_reader(&mut self, mut port: Box<dyn SerialPort>, sink: Arc<dyn ByteSink>) {
        let running = self.running.clone();
        let name = self.port_name.clone();

        let spawned = thread::Builder::new()
            .name("serial-receive".to_string())
            .spawn(move || {
                let mut buffer = [0u8; 256];
                while running.load(Ordering::Acquire) {
                    match port.read(&mut buffer) {
                        Ok(0) => continue,
                        Ok(n) => sink.on_bytes(&buffer[..n]),
                        Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            tracing::error!("Serial read on {} failed: {}", name, e);
                            break;
                        }
                    }
                }
                tracing::debug!("Reader thread for {} exiting", name);
            });

        match spawned {
            Ok(handle) => self.reader = Some(handle),
            Err(e) => tracing::error!("Failed to spawn serial reader thread: {}", e),
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, timeout: Duration, sink: Arc<dyn ByteSink>) -> Result<bool, ProtocolError> {
        if self.port.is_some() {
            return Ok(true);
        }

        let port = match open_port(&self.port_name, Some(self.baud_rate), timeout) {
            Ok(port) => port,
            Err(e) => {
                tracing::error!("Failed to open serial port {}: {}", self.port_name, e);
                return Ok(false);
            }
        };
        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

        let mut reader = port
            .try_clone()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        reader
            .set_timeout(Duration::from_millis(READ_POLL_MS))
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

        self.port = Some(port);
        self.running.store(true, Ordering::Release);
        self.spawn_reader(reader, sink);
        Ok(true)
    }

    fn close(&mut self) -> Result<bool, ProtocolError> {
        self.running.store(false, Ordering::Release);
        // Detached, never joined: it may be inside `on_bytes` waiting on us.
        // The thread exits within one poll interval.
        if self.reader.take().is_some() {
            tracing::debug!("Stopping reader thread for {}", self.port_name);
        }
        Ok(self.port.take().is_some())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port_mut()?.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port_mut()?.flush()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port_mut()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
