//! Command registry
//!
//! Static table mapping a Host API command id to its [`CommandFlow`] and the
//! codecs used for the request, response and callback frames. The table is
//! validated when it is built, so a registered command can always be routed.

use std::collections::HashMap;
use std::fmt;

use crate::api::{
    decode_into, ApiStarted, ApplicationCommand, ApplicationUpdate, BackgroundRssi,
    Capabilities, CommandFlow, ControllerCapabilities, DecodeCommand, InitData, LibraryVersion,
    NetworkIds, NodeInformationRequested, NodeProtocolInfo, PreviousTimeouts, SendDataAccepted,
    SendDataComplete, SendNopAccepted, SendNopComplete, SetDefaultComplete, SucNodeId,
};
use crate::api::Command;
use crate::protocol::{Buffer, CodecError, FrameKind, RegistryError};

/// Decoder from a frame payload
pub type DecodeFn = fn(&mut Buffer) -> Result<Command, CodecError>;

/// Payload codec of one frame of a command
#[derive(Clone, Copy)]
pub struct Codec {
    /// Type name, used in logs and errors
    pub name: &'static str,
    decode: Option<DecodeFn>,
}

impl Codec {
    /// Codec for host requests, which are only ever encoded
    pub const fn encode_only(name: &'static str) -> Self {
        Self { name, decode: None }
    }

    /// Codec decoding into `T`
    pub fn decodable<T: DecodeCommand>(name: &'static str) -> Self {
        Self {
            name,
            decode: Some(decode_into::<T>),
        }
    }

    pub fn is_decodable(&self) -> bool {
        self.decode.is_some()
    }

    /// Decode a payload, or `None` for encode-only codecs
    pub fn decode(&self, buffer: &mut Buffer) -> Option<Result<Command, CodecError>> {
        self.decode.map(|decode| decode(buffer))
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("name", &self.name)
            .field("decodable", &self.is_decodable())
            .finish()
    }
}

/// Registration of one command id
#[derive(Debug, Clone)]
pub struct CommandMetadata {
    pub id: u8,
    pub flow: CommandFlow,
    pub request: Codec,
    pub response: Option<Codec>,
    pub callback: Option<Codec>,
}

impl CommandMetadata {
    pub fn new(id: u8, flow: CommandFlow, request: Codec) -> Self {
        Self {
            id,
            flow,
            request,
            response: None,
            callback: None,
        }
    }

    pub fn with_response(mut self, response: Codec) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_callback(mut self, callback: Codec) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Codec for an inbound frame of the given kind
    ///
    /// Responses use the response codec. Requests from the module are either
    /// unsolicited (request codec) or callbacks (callback codec).
    pub fn decode_codec(&self, kind: FrameKind) -> Option<&Codec> {
        match kind {
            FrameKind::Response => self.response.as_ref(),
            FrameKind::Request if self.flow == CommandFlow::Unsolicited => Some(&self.request),
            FrameKind::Request => self.callback.as_ref(),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let (id, flow) = (self.id, self.flow);

        match (flow.has_response(), &self.response) {
            (true, None) => return Err(RegistryError::MissingResponseCodec { id, flow }),
            (false, Some(_)) => return Err(RegistryError::UnexpectedResponseCodec { id, flow }),
            _ => {}
        }
        match (flow.has_callback(), &self.callback) {
            (true, None) => return Err(RegistryError::MissingCallbackCodec { id, flow }),
            (false, Some(_)) => return Err(RegistryError::UnexpectedCallbackCodec { id, flow }),
            _ => {}
        }

        let inbound = self
            .response
            .iter()
            .chain(self.callback.iter())
            .chain((flow == CommandFlow::Unsolicited).then_some(&self.request));
        for codec in inbound {
            if !codec.is_decodable() {
                return Err(RegistryError::NotDecodable {
                    id,
                    codec: codec.name,
                });
            }
        }
        Ok(())
    }
}

/// Validated command id → metadata table
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: HashMap<u8, CommandMetadata>,
}

impl CommandRegistry {
    /// Build and validate a registry from a table of commands
    pub fn new(commands: impl IntoIterator<Item = CommandMetadata>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for metadata in commands {
            metadata.validate()?;
            let id = metadata.id;
            tracing::debug!(
                "Registering command: {:#04X}, req: {}, resp: {}",
                id,
                metadata.request.name,
                metadata.response.map(|c| c.name).unwrap_or("-")
            );
            if map.insert(id, metadata).is_some() {
                return Err(RegistryError::DuplicateCommandId(id));
            }
        }
        Ok(Self { commands: map })
    }

    /// Registry of every command this crate implements
    pub fn standard() -> Result<Self, RegistryError> {
        Self::new(standard_commands())
    }

    pub fn metadata(&self, id: u8) -> Option<&CommandMetadata> {
        self.commands.get(&id)
    }

    /// Codec to decode an inbound frame of `kind` for `metadata`
    pub fn appropriate_decode_codec<'a>(
        &self,
        metadata: &'a CommandMetadata,
        kind: FrameKind,
    ) -> Option<&'a Codec> {
        metadata.decode_codec(kind)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.commands.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Host API commands, in command id order
pub fn standard_commands() -> Vec<CommandMetadata> {
    use CommandFlow::*;

    vec![
        CommandMetadata::new(0x02, AckFrameWithResponse, Codec::encode_only("GetInitData"))
            .with_response(Codec::decodable::<InitData>("InitData")),
        CommandMetadata::new(
            0x04,
            Unsolicited,
            Codec::decodable::<ApplicationCommand>("ApplicationCommand"),
        ),
        CommandMetadata::new(
            0x05,
            AckFrameWithResponse,
            Codec::encode_only("GetControllerCapabilities"),
        )
        .with_response(Codec::decodable::<ControllerCapabilities>(
            "ControllerCapabilities",
        )),
        CommandMetadata::new(0x06, AckFrameWithResponse, Codec::encode_only("SetTimeouts"))
            .with_response(Codec::decodable::<PreviousTimeouts>("PreviousTimeouts")),
        CommandMetadata::new(0x07, AckFrameWithResponse, Codec::encode_only("GetCapabilities"))
            .with_response(Codec::decodable::<Capabilities>("Capabilities")),
        CommandMetadata::new(0x08, AckFrame, Codec::encode_only("SoftReset")),
        CommandMetadata::new(0x0A, Unsolicited, Codec::decodable::<ApiStarted>("ApiStarted")),
        CommandMetadata::new(
            0x13,
            AckFrameWithResponseAndCallback,
            Codec::encode_only("SendData"),
        )
        .with_response(Codec::decodable::<SendDataAccepted>("SendDataAccepted"))
        .with_callback(Codec::decodable::<SendDataComplete>("SendDataComplete")),
        CommandMetadata::new(0x15, AckFrameWithResponse, Codec::encode_only("GetLibraryVersion"))
            .with_response(Codec::decodable::<LibraryVersion>("LibraryVersion")),
        CommandMetadata::new(0x16, AckFrame, Codec::encode_only("SendDataAbort")),
        CommandMetadata::new(0x20, AckFrameWithResponse, Codec::encode_only("GetNetworkIds"))
            .with_response(Codec::decodable::<NetworkIds>("NetworkIds")),
        CommandMetadata::new(0x3B, AckFrameWithResponse, Codec::encode_only("GetBackgroundRssi"))
            .with_response(Codec::decodable::<BackgroundRssi>("BackgroundRssi")),
        CommandMetadata::new(
            0x41,
            AckFrameWithResponse,
            Codec::encode_only("GetNodeInformationProtocolData"),
        )
        .with_response(Codec::decodable::<NodeProtocolInfo>("NodeProtocolInfo")),
        CommandMetadata::new(0x42, AckFrameWithCallback, Codec::encode_only("SetDefault"))
            .with_callback(Codec::decodable::<SetDefaultComplete>("SetDefaultComplete")),
        CommandMetadata::new(
            0x49,
            Unsolicited,
            Codec::decodable::<ApplicationUpdate>("ApplicationUpdate"),
        ),
        CommandMetadata::new(0x56, AckFrameWithResponse, Codec::encode_only("GetSucNodeId"))
            .with_response(Codec::decodable::<SucNodeId>("SucNodeId")),
        CommandMetadata::new(
            0x60,
            AckFrameWithResponse,
            Codec::encode_only("RequestNodeInformation"),
        )
        .with_response(Codec::decodable::<NodeInformationRequested>(
            "NodeInformationRequested",
        )),
        CommandMetadata::new(0xD2, UnackFrame, Codec::encode_only("StartWatchdog")),
        CommandMetadata::new(0xD3, UnackFrame, Codec::encode_only("StopWatchdog")),
        CommandMetadata::new(
            0xE9,
            AckFrameWithResponseAndCallback,
            Codec::encode_only("SendNop"),
        )
        .with_response(Codec::decodable::<SendNopAccepted>("SendNopAccepted"))
        .with_callback(Codec::decodable::<SendNopComplete>("SendNopComplete")),
    ]
}
