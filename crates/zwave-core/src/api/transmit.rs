//! Radio transmission commands

use serde::{Deserialize, Serialize};

use super::{ApiRequest, TxOptions, TxStatus};
use crate::protocol::{Buffer, CodecError};

empty_request! {
    /// Abort an ongoing Send Data transmission (0x16)
    SendDataAbort => 0x16,
}

/// Transmit an application payload to a node (0x13)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendData {
    pub node_id: u8,
    pub data: Vec<u8>,
    pub tx_options: TxOptions,
    pub session_id: u8,
}

impl SendData {
    pub const COMMAND_ID: u8 = 0x13;

    pub fn new(node_id: u8, data: Vec<u8>, tx_options: TxOptions, session_id: u8) -> Self {
        Self {
            node_id,
            data,
            tx_options,
            session_id,
        }
    }
}

impl ApiRequest for SendData {
    fn command_id(&self) -> u8 {
        Self::COMMAND_ID
    }

    fn encode(&self) -> Buffer {
        let mut bytes = Vec::with_capacity(self.data.len() + 4);
        bytes.push(self.node_id);
        bytes.push(self.data.len() as u8);
        bytes.extend_from_slice(&self.data);
        bytes.push(self.tx_options.bits());
        bytes.push(self.session_id);
        Buffer::from(bytes)
    }
}

/// Send a NOP to a node to check it is reachable (0xE9)
///
/// The ACK transmit option is always set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendNop {
    pub node_id: u8,
    pub tx_options: TxOptions,
    pub session_id: u8,
}

impl SendNop {
    pub const COMMAND_ID: u8 = 0xE9;

    pub fn new(node_id: u8, tx_options: TxOptions, session_id: u8) -> Self {
        Self {
            node_id,
            tx_options,
            session_id,
        }
    }
}

impl ApiRequest for SendNop {
    fn command_id(&self) -> u8 {
        Self::COMMAND_ID
    }

    fn encode(&self) -> Buffer {
        let options = TxOptions::ACK | self.tx_options;
        Buffer::of(&[self.node_id, options.bits(), self.session_id])
    }
}

/// Ask a node to send its node information frame (0x60)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestNodeInformation {
    pub node_id: u8,
}

impl RequestNodeInformation {
    pub const COMMAND_ID: u8 = 0x60;

    pub fn new(node_id: u8) -> Self {
        Self { node_id }
    }
}

impl ApiRequest for RequestNodeInformation {
    fn command_id(&self) -> u8 {
        Self::COMMAND_ID
    }

    fn encode(&self) -> Buffer {
        Buffer::of(&[self.node_id])
    }
}

/// Session id, status and optional report carried by transmit callbacks
fn decode_transmit_report(buffer: &mut Buffer) -> Result<(u8, TxStatus, Vec<u8>), CodecError> {
    let session_id = buffer.next()?;
    let tx_status = if buffer.has_next() {
        TxStatus::from_protocol_value(buffer.next()?)
    } else {
        TxStatus::NoReport
    };
    let remaining = buffer.remaining();
    let report = buffer.next_bytes(remaining)?.to_vec();
    Ok((session_id, tx_status, report))
}

/// Send Data response: whether the module queued the transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDataAccepted {
    pub accepted: bool,
}

impl SendDataAccepted {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            accepted: buffer.next()? != 0x00,
        })
    }
}

/// Send Data callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDataComplete {
    pub session_id: u8,
    pub tx_status: TxStatus,
    /// Raw transmit status report, empty if the module sent none
    pub report: Vec<u8>,
}

impl SendDataComplete {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let (session_id, tx_status, report) = decode_transmit_report(buffer)?;
        Ok(Self {
            session_id,
            tx_status,
            report,
        })
    }
}

/// Send NOP response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNopAccepted {
    pub accepted: bool,
}

impl SendNopAccepted {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            accepted: buffer.next()? != 0x00,
        })
    }
}

/// Send NOP callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNopComplete {
    pub session_id: u8,
    pub tx_status: TxStatus,
    pub report: Vec<u8>,
}

impl SendNopComplete {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        let (session_id, tx_status, report) = decode_transmit_report(buffer)?;
        Ok(Self {
            session_id,
            tx_status,
            report,
        })
    }
}

/// Request Node Information response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInformationRequested {
    pub success: bool,
}

impl NodeInformationRequested {
    pub(crate) fn decode_payload(buffer: &mut Buffer) -> Result<Self, CodecError> {
        Ok(Self {
            success: buffer.get(0)? != 0x00,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_data_encoding() {
        let request = SendData::new(
            0x02,
            vec![0x20, 0x02],
            TxOptions::ACK | TxOptions::AUTO_ROUTE,
            0x07,
        );
        assert_eq!(
            request.encode().as_slice(),
            &[0x02, 0x02, 0x20, 0x02, 0x05, 0x07]
        );
    }

    #[test]
    fn test_send_nop_always_requests_ack() {
        let request = SendNop::new(0x04, TxOptions::EXPLORE, 0x09);
        assert_eq!(request.encode().as_slice(), &[0x04, 0x21, 0x09]);
    }

    #[test]
    fn test_callback_with_report() {
        let mut payload = Buffer::of(&[0x07, 0x00, 0x00, 0x03]);
        let callback = SendDataComplete::decode_payload(&mut payload).expect("decodes");
        assert_eq!(callback.session_id, 0x07);
        assert_eq!(callback.tx_status, TxStatus::CompleteOk);
        assert_eq!(callback.report, vec![0x00, 0x03]);
    }

    #[test]
    fn test_callback_without_status() {
        let mut payload = Buffer::of(&[0x07]);
        let callback = SendNopComplete::decode_payload(&mut payload).expect("decodes");
        assert_eq!(callback.tx_status, TxStatus::NoReport);
        assert!(callback.report.is_empty());
    }

    #[test]
    fn test_responses() {
        assert!(SendDataAccepted::decode_payload(&mut Buffer::of(&[0x01]))
            .expect("decodes")
            .accepted);
        assert!(!NodeInformationRequested::decode_payload(&mut Buffer::of(&[0x00]))
            .expect("decodes")
            .success);
        assert!(SendNopAccepted::decode_payload(&mut Buffer::empty()).is_err());
    }
}
