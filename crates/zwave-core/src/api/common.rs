//! Value types shared by Host API commands

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::BitOr;
use std::sync::OnceLock;

use crate::protocol::CodecError;

/// Collect the node or command ids whose bits are set in a bitmask
///
/// Bit `b` of byte `i` maps to id `base + i * 8 + b`.
pub(crate) fn ids_from_bitmask(mask: &[u8], base: u16) -> Vec<u16> {
    mask.iter()
        .enumerate()
        .flat_map(|(i, byte)| {
            (0..8u16)
                .filter(move |b| byte & (1 << b) != 0)
                .map(move |b| base + i as u16 * 8 + b)
        })
        .collect()
}

/// Software version, e.g. "7.15" or "7.18.3"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<major>\d+)(\.(?P<minor>\d+))?(\.(?P<patch>\d+))?")
            .expect("version pattern is valid")
    })
}

impl Version {
    pub fn new(major: u32, minor: Option<u32>, patch: Option<u32>) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse the first `major[.minor[.patch]]` found anywhere in `text`
    pub fn parse(text: &str) -> Option<Self> {
        let captures = version_pattern().captures(text)?;
        let number = |name: &str| captures.name(name).and_then(|m| m.as_str().parse().ok());
        Some(Self {
            major: number("major")?,
            minor: number("minor"),
            patch: number("patch"),
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.unwrap_or(0).cmp(&other.minor.unwrap_or(0)))
            .then(self.patch.unwrap_or(0).cmp(&other.patch.unwrap_or(0)))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{}", minor)?;
            if let Some(patch) = self.patch {
                write!(f, ".{}", patch)?;
            }
        }
        Ok(())
    }
}

/// Z-Wave protocol library running on the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibraryType {
    StaticController,
    PortableController,
    EnhancedEndNode,
    EndNode,
    Installer,
    RoutingEndNode,
    BridgeController,
    Unknown,
}

impl LibraryType {
    pub fn from_protocol_value(value: u8) -> Self {
        match value {
            0x01 => LibraryType::StaticController,
            0x02 => LibraryType::PortableController,
            0x03 => LibraryType::EnhancedEndNode,
            0x04 => LibraryType::EndNode,
            0x05 => LibraryType::Installer,
            0x06 => LibraryType::RoutingEndNode,
            0x07 => LibraryType::BridgeController,
            _ => LibraryType::Unknown,
        }
    }
}

/// Outcome of a radio transmission reported in a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// Transmitted and, if requested, acknowledged
    CompleteOk,
    /// Transmitted but the destination did not acknowledge
    CompleteNoAck,
    CompleteFail,
    /// Routing was locked or busy
    RoutingNotIdle,
    /// No route could be resolved
    CompleteNoRoute,
    /// Transmitted, acknowledged and decrypted by the destination
    CompleteVerified,
    /// The module did not report a status
    NoReport,
}

impl TxStatus {
    pub fn from_protocol_value(value: u8) -> Self {
        match value {
            0x00 => TxStatus::CompleteOk,
            0x01 => TxStatus::CompleteNoAck,
            0x02 => TxStatus::CompleteFail,
            0x03 => TxStatus::RoutingNotIdle,
            0x04 => TxStatus::CompleteNoRoute,
            0x05 => TxStatus::CompleteVerified,
            _ => TxStatus::NoReport,
        }
    }

    pub fn protocol_value(&self) -> u8 {
        match self {
            TxStatus::CompleteOk => 0x00,
            TxStatus::CompleteNoAck => 0x01,
            TxStatus::CompleteFail => 0x02,
            TxStatus::RoutingNotIdle => 0x03,
            TxStatus::CompleteNoRoute => 0x04,
            TxStatus::CompleteVerified => 0x05,
            TxStatus::NoReport => 0xFF,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxStatus::CompleteOk | TxStatus::CompleteVerified)
    }
}

/// Transmit option bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TxOptions(u8);

impl TxOptions {
    /// Request an MPDU acknowledgement from the destination
    pub const ACK: TxOptions = TxOptions(0x01);
    /// Route through repeaters when the destination is out of range
    pub const AUTO_ROUTE: TxOptions = TxOptions(0x04);
    /// Send without any routing
    pub const NO_ROUTE: TxOptions = TxOptions(0x10);
    /// Allow explore frames for dynamic route resolution
    pub const EXPLORE: TxOptions = TxOptions(0x20);

    pub fn empty() -> Self {
        TxOptions(0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: TxOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TxOptions {
    type Output = TxOptions;

    fn bitor(self, rhs: Self) -> Self::Output {
        TxOptions(self.0 | rhs.0)
    }
}

/// How a frame was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RxStatus {
    /// Received with low output power
    LowPower,
    /// Received using broadcast addressing
    BroadcastAddressing,
}

impl RxStatus {
    const ALL: [RxStatus; 2] = [RxStatus::LowPower, RxStatus::BroadcastAddressing];

    pub fn bit_mask(&self) -> u8 {
        match self {
            RxStatus::LowPower => 0x02,
            RxStatus::BroadcastAddressing => 0x08,
        }
    }

    pub fn matches(&self, value: u8) -> bool {
        value & self.bit_mask() > 0
    }

    /// Every status whose bit is set in `value`
    pub fn from_mask(value: u8) -> Vec<RxStatus> {
        Self::ALL.into_iter().filter(|s| s.matches(value)).collect()
    }
}

/// A received signal strength reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RssiMeasurement {
    /// Signal strength in dBm
    Dbm(i8),
    /// Below sensitivity, could not be measured
    BelowSensitivity,
    /// Receiver saturated, could not be measured
    ReceiverSaturated,
    NotAvailable,
}

impl RssiMeasurement {
    pub fn from_protocol_value(value: u8) -> Self {
        match value {
            0x7D => RssiMeasurement::BelowSensitivity,
            0x7E => RssiMeasurement::ReceiverSaturated,
            0x7F => RssiMeasurement::NotAvailable,
            other => RssiMeasurement::Dbm(other as i8),
        }
    }

    /// Measured value in dBm, if there is one
    pub fn dbm(&self) -> Option<i8> {
        match self {
            RssiMeasurement::Dbm(value) => Some(*value),
            _ => None,
        }
    }
}

/// Why the module (re)started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WakeupReason {
    Reset,
    WakeupTimer,
    WakeupBeam,
    WatchdogReset,
    ExternalInterrupt,
    PowerUp,
    UsbSuspend,
    SoftwareReset,
    EmergencyWatchdogReset,
    BrownoutCircuit,
    Unknown,
}

impl WakeupReason {
    pub fn from_protocol_value(value: u8) -> Self {
        match value {
            0x00 => WakeupReason::Reset,
            0x01 => WakeupReason::WakeupTimer,
            0x02 => WakeupReason::WakeupBeam,
            0x03 => WakeupReason::WatchdogReset,
            0x04 => WakeupReason::ExternalInterrupt,
            0x05 => WakeupReason::PowerUp,
            0x06 => WakeupReason::UsbSuspend,
            0x07 => WakeupReason::SoftwareReset,
            0x08 => WakeupReason::EmergencyWatchdogReset,
            0x09 => WakeupReason::BrownoutCircuit,
            _ => WakeupReason::Unknown,
        }
    }
}

/// Event carried by an Application Update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateEvent {
    SucId,
    DeleteDone,
    NewIdAssigned,
    RoutingPending,
    NodeInfoRequestFailed,
    NodeInfoRequestDone,
    NopPowerReceived,
    NodeInfoReceived,
    SmartStartHomeIdReceived,
    IncludedNodeInfoReceived,
    SmartStartHomeIdReceivedLongRange,
}

impl UpdateEvent {
    pub fn from_protocol_value(value: u8) -> Result<Self, CodecError> {
        let event = match value {
            0x10 => UpdateEvent::SucId,
            0x20 => UpdateEvent::DeleteDone,
            0x40 => UpdateEvent::NewIdAssigned,
            0x80 => UpdateEvent::RoutingPending,
            0x81 => UpdateEvent::NodeInfoRequestFailed,
            0x82 => UpdateEvent::NodeInfoRequestDone,
            0x83 => UpdateEvent::NopPowerReceived,
            0x84 => UpdateEvent::NodeInfoReceived,
            0x85 => UpdateEvent::SmartStartHomeIdReceived,
            0x86 => UpdateEvent::IncludedNodeInfoReceived,
            0x87 => UpdateEvent::SmartStartHomeIdReceivedLongRange,
            other => {
                return Err(CodecError::InvalidValue {
                    field: "application update event",
                    value: other,
                })
            }
        };
        Ok(event)
    }
}

/// Capability flags of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerCapability {
    SecondaryController,
    OtherNetwork,
    SisIsPresent,
    SucEnabled,
    NoNodesIncluded,
}

impl ControllerCapability {
    const ALL: [ControllerCapability; 5] = [
        ControllerCapability::SecondaryController,
        ControllerCapability::OtherNetwork,
        ControllerCapability::SisIsPresent,
        ControllerCapability::SucEnabled,
        ControllerCapability::NoNodesIncluded,
    ];

    pub fn bit_mask(&self) -> u8 {
        match self {
            ControllerCapability::SecondaryController => 0xF0,
            ControllerCapability::OtherNetwork => 0x80,
            ControllerCapability::SisIsPresent => 0x40,
            ControllerCapability::SucEnabled => 0x10,
            ControllerCapability::NoNodesIncluded => 0x0F,
        }
    }

    /// A flag matches when any bit of its mask is set
    pub fn matches(&self, value: u8) -> bool {
        value & self.bit_mask() > 0
    }

    pub fn from_mask(value: u8) -> Vec<ControllerCapability> {
        Self::ALL.into_iter().filter(|c| c.matches(value)).collect()
    }
}

/// Capability flags reported by Get Init Data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitCapability {
    /// Module runs a controller library (end node otherwise)
    Controller,
    TimerFunctions,
    PrimaryController,
    SisFunctionality,
}

impl InitCapability {
    const ALL: [InitCapability; 4] = [
        InitCapability::Controller,
        InitCapability::TimerFunctions,
        InitCapability::PrimaryController,
        InitCapability::SisFunctionality,
    ];

    pub fn bit_mask(&self) -> u8 {
        match self {
            InitCapability::Controller => 0x01,
            InitCapability::TimerFunctions => 0x02,
            InitCapability::PrimaryController => 0x04,
            InitCapability::SisFunctionality => 0x08,
        }
    }

    pub fn from_mask(value: u8) -> Vec<InitCapability> {
        Self::ALL
            .into_iter()
            .filter(|c| value & c.bit_mask() > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(Version::parse("Z-Wave 7.15"), Some(Version::new(7, Some(15), None)));
        assert_eq!(Version::parse("4"), Some(Version::new(4, None, None)));
        assert_eq!(
            Version::parse("v1.2.3-rc"),
            Some(Version::new(1, Some(2), Some(3)))
        );
        assert_eq!(Version::parse("no digits"), None);
    }

    #[test]
    fn test_version_ordering_and_display() {
        let older = Version::new(7, Some(15), None);
        let newer = Version::new(7, Some(15), Some(1));
        assert!(older < newer);
        assert!(Version::new(6, Some(99), None) < older);
        assert_eq!(newer.to_string(), "7.15.1");
        assert_eq!(Version::new(7, None, Some(3)).to_string(), "7");
    }

    #[test]
    fn test_rssi_conversion() {
        assert_eq!(RssiMeasurement::from_protocol_value(0xCE).dbm(), Some(-50));
        assert_eq!(RssiMeasurement::from_protocol_value(0x7C).dbm(), Some(124));
        assert_eq!(
            RssiMeasurement::from_protocol_value(0x7D),
            RssiMeasurement::BelowSensitivity
        );
        assert_eq!(
            RssiMeasurement::from_protocol_value(0x7E),
            RssiMeasurement::ReceiverSaturated
        );
        assert_eq!(
            RssiMeasurement::from_protocol_value(0x7F),
            RssiMeasurement::NotAvailable
        );
    }

    #[test]
    fn test_unknown_values_fall_back() {
        assert_eq!(LibraryType::from_protocol_value(0x93), LibraryType::Unknown);
        assert_eq!(TxStatus::from_protocol_value(0x42), TxStatus::NoReport);
        assert_eq!(WakeupReason::from_protocol_value(0x0A), WakeupReason::Unknown);
        assert!(UpdateEvent::from_protocol_value(0x11).is_err());
    }

    #[test]
    fn test_flag_masks() {
        assert_eq!(
            ControllerCapability::from_mask(0x3C),
            vec![
                ControllerCapability::SecondaryController,
                ControllerCapability::SucEnabled,
                ControllerCapability::NoNodesIncluded,
            ]
        );
        assert_eq!(
            RxStatus::from_mask(0x0A),
            vec![RxStatus::LowPower, RxStatus::BroadcastAddressing]
        );
        let options = TxOptions::ACK | TxOptions::AUTO_ROUTE;
        assert_eq!(options.bits(), 0x05);
        assert!(options.contains(TxOptions::ACK));
        assert!(!options.contains(TxOptions::EXPLORE));
    }

    #[test]
    fn test_ids_from_bitmask() {
        assert_eq!(ids_from_bitmask(&[0b0000_0101, 0x80], 1), vec![1, 3, 16]);
    }
}
