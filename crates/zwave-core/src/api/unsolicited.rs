//! Commands initiated by the module

use serde::{Deserialize, Serialize};

use super::{RssiMeasurement, RxStatus, UpdateEvent, WakeupReason};
use crate::protocol::{Buffer, CodecError};

/// Application command received from another node (0x04)
///
/// The payload is an undecoded command class frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationCommand {
    pub rx_status: Vec<RxStatus>,
    pub source_node_id: u8,
    pub payload: Vec<u8>,
    /// Absent on modules that do not append RSSI
    pub rssi: Option<RssiMeasurement>,
}

impl ApplicationCommand {
    pub const COMMAND_ID: u8 = 0x04;

    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let rx_status = RxStatus::from_mask(buffer.next()?);
        let source_node_id = buffer.next()?;
        let length = buffer.next()? as usize;
        let payload = buffer.next_bytes(length)?.to_vec();
        let rssi = if buffer.has_next() {
            Some(RssiMeasurement::from_protocol_value(buffer.next()?))
        } else {
            None
        };

        Ok(Self {
            rx_status,
            source_node_id,
            payload,
            rssi,
        })
    }

    /// Command class of the carried frame
    pub fn command_class(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Module (re)started and the API is ready (0x0A)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStarted {
    pub wakeup_reason: WakeupReason,
    pub watchdog_started: bool,
    pub device_option_mask: u8,
    pub generic_device_type: u8,
    pub specific_device_type: u8,
    pub command_classes: Vec<u8>,
    pub supports_long_range: bool,
}

impl ApiStarted {
    pub const COMMAND_ID: u8 = 0x0A;

    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let wakeup_reason = WakeupReason::from_protocol_value(buffer.next()?);
        let watchdog_started = buffer.next()? == 0x01;
        let device_option_mask = buffer.next()?;
        let generic_device_type = buffer.next()?;
        let specific_device_type = buffer.next()?;
        let length = buffer.next()? as usize;
        let command_classes = buffer.next_bytes(length)?.to_vec();
        let supports_long_range = buffer.has_next() && buffer.next()? & 0x01 != 0;

        Ok(Self {
            wakeup_reason,
            watchdog_started,
            device_option_mask,
            generic_device_type,
            specific_device_type,
            command_classes,
            supports_long_range,
        })
    }
}

/// Network or node information update (0x49)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationUpdate {
    pub event: UpdateEvent,
    pub node_id: u8,
    pub basic_device_type: Option<u8>,
    pub generic_device_type: Option<u8>,
    pub specific_device_type: Option<u8>,
    pub command_classes: Vec<u8>,
}

impl ApplicationUpdate {
    pub const COMMAND_ID: u8 = 0x49;

    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let event = UpdateEvent::from_protocol_value(buffer.next()?)?;
        let node_id = buffer.next()?;
        // The length covers the three device type bytes as well
        let length = buffer.next()? as usize;

        let mut update = Self {
            event,
            node_id,
            basic_device_type: None,
            generic_device_type: None,
            specific_device_type: None,
            command_classes: Vec::new(),
        };
        if length > 0 {
            update.basic_device_type = Some(buffer.next()?);
            update.generic_device_type = Some(buffer.next()?);
            update.specific_device_type = Some(buffer.next()?);
            update.command_classes = buffer.next_bytes(length.saturating_sub(3))?.to_vec();
        }
        Ok(update)
    }
}
