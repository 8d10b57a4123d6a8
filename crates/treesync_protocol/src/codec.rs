//! CBOR frame codec.
//!
//! A frame is one version byte followed by the CBOR encoding of a message.
//! Frames with a different version byte are rejected before decoding.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{InboundMessage, OutboundMessage, WireInbound, WireOutbound};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Protocol version written as the first byte of every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Types that can be written as a frame.
pub trait FrameEncode {
    /// Encodes self into a versioned frame.
    fn encode_frame(&self) -> ProtocolResult<Bytes>;
}

/// Types that can be read from a frame.
pub trait FrameDecode: Sized {
    /// Decodes self from a versioned frame.
    fn decode_frame(frame: &[u8]) -> ProtocolResult<Self>;
}

fn write_frame<T: Serialize>(message: &T) -> ProtocolResult<Bytes> {
    let mut buf = BytesMut::with_capacity(64).writer();
    buf.get_mut().put_u8(PROTOCOL_VERSION);
    ciborium::ser::into_writer(message, &mut buf).map_err(|e| ProtocolError::encode(e.to_string()))?;
    Ok(buf.into_inner().freeze())
}

fn read_frame<T: DeserializeOwned>(frame: &[u8]) -> ProtocolResult<T> {
    let (&version, body) = frame
        .split_first()
        .ok_or_else(|| ProtocolError::decode("empty frame"))?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            found: version,
            expected: PROTOCOL_VERSION,
        });
    }
    ciborium::de::from_reader(body).map_err(|e| ProtocolError::decode(e.to_string()))
}

impl FrameEncode for OutboundMessage {
    fn encode_frame(&self) -> ProtocolResult<Bytes> {
        write_frame(&WireOutbound::from(self))
    }
}

impl FrameDecode for OutboundMessage {
    fn decode_frame(frame: &[u8]) -> ProtocolResult<Self> {
        read_frame::<WireOutbound>(frame)?.try_into()
    }
}

impl FrameEncode for InboundMessage {
    fn encode_frame(&self) -> ProtocolResult<Bytes> {
        write_frame(&WireInbound::from(self))
    }
}

impl FrameDecode for InboundMessage {
    fn decode_frame(frame: &[u8]) -> ProtocolResult<Self> {
        read_frame::<WireInbound>(frame)?.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_core::Path;

    #[test]
    fn frame_starts_with_version() {
        let frame = InboundMessage::Connected.encode_frame().unwrap();
        assert_eq!(frame[0], PROTOCOL_VERSION);
        assert_eq!(
            InboundMessage::decode_frame(&frame).unwrap(),
            InboundMessage::Connected
        );
    }

    #[test]
    fn rejects_other_versions() {
        let mut frame = OutboundMessage::CancelOnDisconnect { path: Path::root() }
            .encode_frame()
            .unwrap()
            .to_vec();
        frame[0] = PROTOCOL_VERSION + 1;
        assert_eq!(
            OutboundMessage::decode_frame(&frame).unwrap_err(),
            ProtocolError::UnsupportedVersion {
                found: PROTOCOL_VERSION + 1,
                expected: PROTOCOL_VERSION,
            }
        );
    }

    #[test]
    fn rejects_empty_and_garbage_frames() {
        assert!(matches!(
            InboundMessage::decode_frame(&[]),
            Err(ProtocolError::Decode { .. })
        ));
        assert!(matches!(
            InboundMessage::decode_frame(&[PROTOCOL_VERSION, 0xff, 0x00]),
            Err(ProtocolError::Decode { .. })
        ));
    }
}
