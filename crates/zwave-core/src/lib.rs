//! # zwave-core
//!
//! Host-side driver for the Z-Wave Host API serial protocol.

#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding, decoding and checksums for the serial API
//! - Half-duplex serial I/O with ACK/NAK handling
//! - A static registry of Host API commands and their message flows
//! - Request sequencing with retries and timeouts
//! - Typed subscriptions to commands the module sends on its own
//!
//! ## Example
//!
//! ```rust,ignore
//! use zwave_core::prelude::*;
//!
//! let adapter = Adapter::serial(AdapterConfig::for_port("/dev/ttyACM0"))?;
//! adapter.start().await?;
//!
//! let outcome = adapter.send_command(&GetLibraryVersion).await?;
//! if let Some(version) = outcome.response_as::<LibraryVersion>() {
//!     println!("{} ({:?})", version.description, version.library_type);
//! }
//! ```

pub mod adapter;
pub mod api;
pub mod protocol;
pub mod registry;
pub mod sequence;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::adapter::{
        Adapter, AdapterConfig, InboundHandle, SequenceOutcome, SubscriptionHandle,
    };
    pub use crate::api::{
        ApiRequest, ApplicationCommand, ApplicationUpdate, Command, CommandFlow, CommandKind,
        DecodeCommand, GetLibraryVersion, GetNetworkIds, LibraryVersion, NetworkIds, SendData,
        SendDataComplete, SoftReset, TxOptions, TxStatus,
    };
    pub use crate::protocol::{
        list_ports, ByteSink, DataFrame, Frame, FrameKind, ProtocolError, SerialTransport,
        StatisticsSnapshot, Transport,
    };
    pub use crate::registry::{CommandMetadata, CommandRegistry};
    pub use crate::sequence::{CommandSequence, SequenceState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
