//! Host API commands
//!
//! Requests the host sends implement [`ApiRequest`]; frames the module sends
//! are decoded into the typed structs of this module and wrapped in
//! [`Command`]. Each decoded type implements [`DecodeCommand`] so it can be
//! registered as a codec and subscribed to by type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{Buffer, CodecError, DataFrame, FrameError};

/// Implement [`ApiRequest`] for a request with an empty payload
macro_rules! empty_request {
    ($($(#[$meta:meta])* $name:ident => $id:literal),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
            pub struct $name;

            impl $name {
                pub const COMMAND_ID: u8 = $id;
            }

            impl $crate::api::ApiRequest for $name {
                fn command_id(&self) -> u8 {
                    Self::COMMAND_ID
                }

                fn encode(&self) -> $crate::protocol::Buffer {
                    $crate::protocol::Buffer::empty()
                }
            }
        )*
    };
}

mod common;
pub mod controller;
pub mod transmit;
pub mod unsolicited;

pub use common::{
    ControllerCapability, InitCapability, LibraryType, RssiMeasurement, RxStatus, TxOptions,
    TxStatus, UpdateEvent, Version, WakeupReason,
};
pub(crate) use common::ids_from_bitmask;
pub use controller::{
    BackgroundRssi, Capabilities, ControllerCapabilities, GetBackgroundRssi, GetCapabilities,
    GetControllerCapabilities, GetInitData, GetLibraryVersion, GetNetworkIds,
    GetNodeInformationProtocolData, GetSucNodeId, InitData, LibraryVersion, NetworkIds,
    NodeProtocolInfo, PreviousTimeouts, SetDefault, SetDefaultComplete, SetTimeouts, SoftReset,
    StartWatchdog, StopWatchdog, SucNodeId,
};
pub use transmit::{
    NodeInformationRequested, RequestNodeInformation, SendData, SendDataAbort, SendDataAccepted,
    SendDataComplete, SendNop, SendNopAccepted, SendNopComplete,
};
pub use unsolicited::{ApiStarted, ApplicationCommand, ApplicationUpdate};

/// Message pattern a command follows on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandFlow {
    /// Sent without waiting for an ACK, e.g. when the module goes offline
    UnackFrame,
    /// Acknowledged, nothing else follows
    AckFrame,
    /// Acknowledged and answered with an immediate response
    AckFrameWithResponse,
    /// Acknowledged and followed by a callback once the module is done
    AckFrameWithCallback,
    AckFrameWithResponseAndCallback,
    /// Initiated by the module
    Unsolicited,
}

impl CommandFlow {
    pub fn has_response(&self) -> bool {
        matches!(
            self,
            CommandFlow::AckFrameWithResponse | CommandFlow::AckFrameWithResponseAndCallback
        )
    }

    pub fn has_callback(&self) -> bool {
        matches!(
            self,
            CommandFlow::AckFrameWithCallback | CommandFlow::AckFrameWithResponseAndCallback
        )
    }
}

impl fmt::Display for CommandFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A request the host can encode and send
pub trait ApiRequest: fmt::Debug + Send + Sync {
    /// Command id of the request
    fn command_id(&self) -> u8;

    /// Encode the request payload
    fn encode(&self) -> Buffer;

    /// Wrap the payload in a request data frame
    ///
    /// Fails if the encoded payload is too large for one frame.
    fn to_frame(&self) -> Result<DataFrame, FrameError> {
        DataFrame::request(self.command_id(), self.encode())
    }
}

/// A command decodable from a frame payload
pub trait DecodeCommand: Sized + Send + 'static {
    /// Variant of [`Command`] this type decodes into
    const KIND: CommandKind;

    /// Decode from a payload buffer
    fn decode(buffer: &mut Buffer) -> Result<Self, CodecError>;

    /// Wrap in a [`Command`]
    fn into_command(self) -> Command;

    /// Borrow back out of a [`Command`] of the matching kind
    fn from_command(command: &Command) -> Option<&Self>;
}

/// Decode a payload into a [`Command`] through `T`
pub fn decode_into<T: DecodeCommand>(buffer: &mut Buffer) -> Result<Command, CodecError> {
    T::decode(buffer).map(T::into_command)
}

macro_rules! decoded_commands {
    ($($variant:ident => $id:literal),* $(,)?) => {
        /// A decoded command received from the module
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum Command {
            $($variant($variant),)*
        }

        /// Discriminant of [`Command`], used to match subscriptions
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum CommandKind {
            $($variant,)*
        }

        impl Command {
            pub fn kind(&self) -> CommandKind {
                match self {
                    $(Command::$variant(_) => CommandKind::$variant,)*
                }
            }

            pub fn command_id(&self) -> u8 {
                self.kind().command_id()
            }
        }

        impl CommandKind {
            /// Host API command id this kind is carried under
            pub fn command_id(&self) -> u8 {
                match self {
                    $(CommandKind::$variant => $id,)*
                }
            }
        }

        $(
            impl From<$variant> for Command {
                fn from(command: $variant) -> Self {
                    Command::$variant(command)
                }
            }
        )*
    };
}

decoded_commands! {
    InitData => 0x02,
    ApplicationCommand => 0x04,
    ControllerCapabilities => 0x05,
    PreviousTimeouts => 0x06,
    Capabilities => 0x07,
    ApiStarted => 0x0A,
    SendDataAccepted => 0x13,
    SendDataComplete => 0x13,
    LibraryVersion => 0x15,
    NetworkIds => 0x20,
    BackgroundRssi => 0x3B,
    NodeProtocolInfo => 0x41,
    SetDefaultComplete => 0x42,
    ApplicationUpdate => 0x49,
    SucNodeId => 0x56,
    NodeInformationRequested => 0x60,
    SendNopAccepted => 0xE9,
    SendNopComplete => 0xE9,
}

/// Implement [`DecodeCommand`] through each type's `decode_payload`
macro_rules! impl_decode_command {
    ($($variant:ident),* $(,)?) => {
        $(
            impl DecodeCommand for $variant {
                const KIND: CommandKind = CommandKind::$variant;

                fn decode(buffer: &mut Buffer) -> Result<Self, CodecError> {
                    $variant::decode_payload(buffer)
                }

                fn into_command(self) -> Command {
                    Command::$variant(self)
                }

                fn from_command(command: &Command) -> Option<&Self> {
                    match command {
                        Command::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_decode_command! {
    InitData,
    ApplicationCommand,
    ControllerCapabilities,
    PreviousTimeouts,
    Capabilities,
    ApiStarted,
    SendDataAccepted,
    SendDataComplete,
    LibraryVersion,
    NetworkIds,
    BackgroundRssi,
    NodeProtocolInfo,
    SetDefaultComplete,
    ApplicationUpdate,
    SucNodeId,
    NodeInformationRequested,
    SendNopAccepted,
    SendNopComplete,
}
