//! # treesync protocol
//!
//! Messages between the sync engine and its transport, and the CBOR frame
//! codec they travel in.
//!
//! This crate provides:
//! - [`OutboundMessage`] (listen, unlisten, write, on-disconnect registration)
//! - [`InboundMessage`] (connection state, server data, acks, reverts)
//! - [`RevertReason`] and its status strings
//! - Versioned CBOR frames ([`FrameEncode`], [`FrameDecode`])
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;
mod reason;

pub use codec::{FrameDecode, FrameEncode, PROTOCOL_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{InboundMessage, OutboundMessage};
pub use reason::RevertReason;
