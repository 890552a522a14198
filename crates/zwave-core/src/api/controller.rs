//! Controller and module management commands

use serde::{Deserialize, Serialize};

use super::{
    ids_from_bitmask, ApiRequest, ControllerCapability, InitCapability, LibraryType,
    RssiMeasurement, Version,
};
use crate::protocol::{Buffer, CodecError};

/// Length of the node bitmask in a Get Init Data response
pub const NODE_BITMASK_LENGTH: u8 = 29;

/// Length of the version string in a Get Library Version response
pub const LIBRARY_VERSION_LENGTH: usize = 12;

empty_request! {
    /// Query API version, capabilities and the node list (0x02)
    GetInitData => 0x02,
    /// Query the controller capability flags (0x05)
    GetControllerCapabilities => 0x05,
    /// Query API version, manufacturer and supported commands (0x07)
    GetCapabilities => 0x07,
    /// Restart the module (0x08)
    SoftReset => 0x08,
    /// Query the protocol library version (0x15)
    GetLibraryVersion => 0x15,
    /// Query home id and own node id (0x20)
    GetNetworkIds => 0x20,
    /// Query background noise on each channel (0x3B)
    GetBackgroundRssi => 0x3B,
    /// Query the SUC node id (0x56)
    GetSucNodeId => 0x56,
    /// Enable the module watchdog (0xD2)
    StartWatchdog => 0xD2,
    /// Disable the module watchdog (0xD3)
    StopWatchdog => 0xD3,
}

/// Change the serial timeouts of the module, in 10 ms units (0x06)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetTimeouts {
    pub rx_ack_timeout: u8,
    pub rx_byte_timeout: u8,
}

impl SetTimeouts {
    pub const COMMAND_ID: u8 = 0x06;

    pub fn new(rx_ack_timeout: u8, rx_byte_timeout: u8) -> Self {
        Self {
            rx_ack_timeout,
            rx_byte_timeout,
        }
    }
}

impl ApiRequest for SetTimeouts {
    fn command_id(&self) -> u8 {
        Self::COMMAND_ID
    }

    fn encode(&self) -> Buffer {
        Buffer::of(&[self.rx_ack_timeout, self.rx_byte_timeout])
    }
}

/// Query the protocol information of a node (0x41)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetNodeInformationProtocolData {
    pub node_id: u8,
}

impl GetNodeInformationProtocolData {
    pub const COMMAND_ID: u8 = 0x41;

    pub fn new(node_id: u8) -> Self {
        Self { node_id }
    }
}

impl ApiRequest for GetNodeInformationProtocolData {
    fn command_id(&self) -> u8 {
        Self::COMMAND_ID
    }

    fn encode(&self) -> Buffer {
        Buffer::of(&[self.node_id])
    }
}

/// Reset the module to factory defaults (0x42)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetDefault {
    pub session_id: u8,
}

impl SetDefault {
    pub const COMMAND_ID: u8 = 0x42;

    pub fn new(session_id: u8) -> Self {
        Self { session_id }
    }
}

impl ApiRequest for SetDefault {
    fn command_id(&self) -> u8 {
        Self::COMMAND_ID
    }

    fn encode(&self) -> Buffer {
        Buffer::of(&[self.session_id])
    }
}

/// Get Init Data response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitData {
    pub api_version: u8,
    pub capabilities: Vec<InitCapability>,
    /// Ids of the nodes included in the network
    pub nodes: Vec<u16>,
    pub chip_type: u8,
    pub chip_version: u8,
}

impl InitData {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let api_version = buffer.next()?;
        let capabilities = InitCapability::from_mask(buffer.next()?);

        let node_length = buffer.next()?;
        if node_length != NODE_BITMASK_LENGTH {
            return Err(CodecError::InvalidValue {
                field: "node list length",
                value: node_length,
            });
        }
        let nodes = ids_from_bitmask(buffer.next_bytes(node_length as usize)?, 1);

        Ok(Self {
            api_version,
            capabilities,
            nodes,
            chip_type: buffer.next()?,
            chip_version: buffer.next()?,
        })
    }

    pub fn is_controller(&self) -> bool {
        self.capabilities.contains(&InitCapability::Controller)
    }
}

/// Get Controller Capabilities response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerCapabilities {
    pub capabilities: Vec<ControllerCapability>,
}

impl ControllerCapabilities {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            capabilities: ControllerCapability::from_mask(buffer.get(0)?),
        })
    }
}

/// Set Timeouts response: the values in effect before the change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousTimeouts {
    pub rx_ack_timeout: u8,
    pub rx_byte_timeout: u8,
}

impl PreviousTimeouts {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            rx_ack_timeout: buffer.next()?,
            rx_byte_timeout: buffer.next()?,
        })
    }
}

/// Get Capabilities response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub api_version: Version,
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    /// Host API command ids the module supports
    pub supported_commands: Vec<u16>,
}

impl Capabilities {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let major = buffer.next()?;
        let minor = buffer.next()?;
        let manufacturer_id = buffer.next_u16()?;
        let product_type = buffer.next_u16()?;
        let product_id = buffer.next_u16()?;
        let remaining = buffer.remaining();
        let supported_commands = ids_from_bitmask(buffer.next_bytes(remaining)?, 1);

        Ok(Self {
            api_version: Version::new(major as u32, Some(minor as u32), None),
            manufacturer_id,
            product_type,
            product_id,
            supported_commands,
        })
    }

    pub fn supports(&self, command_id: u8) -> bool {
        self.supported_commands.contains(&(command_id as u16))
    }
}

/// Get Library Version response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryVersion {
    /// Raw version text, e.g. "Z-Wave 7.15"
    pub description: String,
    pub version: Version,
    pub library_type: LibraryType,
}

impl LibraryVersion {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let raw = buffer.next_bytes(LIBRARY_VERSION_LENGTH)?;
        let description = String::from_utf8_lossy(raw)
            .trim_end_matches(|c: char| c == '\0' || c.is_control())
            .to_string();
        let version = Version::parse(&description)
            .ok_or_else(|| CodecError::InvalidVersion(description.clone()))?;

        Ok(Self {
            description,
            version,
            library_type: LibraryType::from_protocol_value(buffer.next()?),
        })
    }
}

/// Get Network Ids response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIds {
    pub home_id: u32,
    pub node_id: u8,
}

impl NetworkIds {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            home_id: buffer.next_u32()?,
            node_id: buffer.next()?,
        })
    }
}

/// Get Background RSSI response, one reading per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundRssi {
    pub channels: [RssiMeasurement; 3],
}

impl BackgroundRssi {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            channels: [
                RssiMeasurement::from_protocol_value(buffer.next()?),
                RssiMeasurement::from_protocol_value(buffer.next()?),
                RssiMeasurement::from_protocol_value(buffer.next()?),
            ],
        })
    }
}

/// Get Node Information Protocol Data response
///
/// Device classes are carried as raw class codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProtocolInfo {
    pub listening: bool,
    pub routing: bool,
    /// Highest supported data rate in bit/s
    pub supported_speed: u32,
    pub protocol_version: u8,
    pub optional_functionality: bool,
    pub sensor_1000ms: bool,
    pub sensor_250ms: bool,
    pub beam_capability: bool,
    pub routing_end_node: bool,
    pub specific_device: bool,
    pub controller_node: bool,
    pub security: bool,
    pub speed_extension: u8,
    pub basic_device_class: u8,
    pub generic_device_class: u8,
    pub specific_device_class: u8,
}

impl NodeProtocolInfo {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let capability = buffer.next()?;
        let security = buffer.next()?;
        let bit = |byte: u8, n: u8| byte & (1 << n) != 0;

        let supported_speed = if capability & 0x38 == 0x10 { 40_000 } else { 9_600 };

        Ok(Self {
            listening: bit(capability, 7),
            routing: bit(capability, 6),
            supported_speed,
            // Zero-based on the wire
            protocol_version: (capability & 0x07) + 1,
            optional_functionality: bit(security, 7),
            sensor_1000ms: bit(security, 6),
            sensor_250ms: bit(security, 5),
            beam_capability: bit(security, 4),
            routing_end_node: bit(security, 3),
            specific_device: bit(security, 2),
            controller_node: bit(security, 1),
            security: bit(security, 0),
            speed_extension: buffer.next()? & 0x07,
            basic_device_class: buffer.next()?,
            generic_device_class: buffer.next()?,
            specific_device_class: buffer.next()?,
        })
    }

    /// Whether the node wakes up periodically to listen for frames
    pub fn is_frequently_listening(&self) -> bool {
        self.sensor_1000ms || self.sensor_250ms
    }
}

/// Set Default callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDefaultComplete {
    pub session_id: u8,
}

impl SetDefaultComplete {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            session_id: buffer.next()?,
        })
    }
}

/// Get SUC Node Id response; 0 means no SUC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SucNodeId {
    pub node_id: u8,
}

impl SucNodeId {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            node_id: buffer.next()?,
        })
    }
}
