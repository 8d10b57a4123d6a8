//! Frame-based transport.
//!
//! [`FramedTransport`] encodes outbound messages into versioned CBOR frames
//! and hands them to a [`FrameWriter`]. The writer is abstracted so the same
//! transport works over a socket, a WebSocket, or an in-process channel.

use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;
use treesync_core::{Operation, Path, QuerySpec, WriteId};
use treesync_protocol::{FrameEncode, OutboundMessage};

/// Why a frame could not be queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameWriteError {
    /// The connection is gone for good; no later frame will get through.
    #[error("frame writer closed")]
    Closed,

    /// This frame failed; a later attempt may succeed.
    #[error("frame write failed: {0}")]
    Failed(String),
}

/// Sink for encoded frames.
///
/// Implement this trait to connect the engine to an actual connection.
pub trait FrameWriter: Send + Sync {
    /// Queues one frame for sending.
    fn write_frame(&self, frame: Bytes) -> Result<(), FrameWriteError>;
}

/// Transport that writes CBOR frames.
pub struct FramedTransport<W: FrameWriter> {
    writer: W,
    last_error: RwLock<Option<String>>,
}

impl<W: FrameWriter> FramedTransport<W> {
    /// Creates a transport over `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the frame writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Returns the last write error.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn send(&self, message: OutboundMessage) -> SyncResult<()> {
        let frame = message.encode_frame()?;
        match self.writer.write_frame(frame) {
            Ok(()) => {
                *self.last_error.write() = None;
                Ok(())
            }
            Err(e) => {
                *self.last_error.write() = Some(e.to_string());
                Err(match e {
                    FrameWriteError::Closed => SyncError::transport_fatal(e.to_string()),
                    FrameWriteError::Failed(_) => SyncError::transport_retryable(e.to_string()),
                })
            }
        }
    }
}

impl<W: FrameWriter> Transport for FramedTransport<W> {
    fn send_listen(&self, query: &QuerySpec) -> SyncResult<()> {
        self.send(OutboundMessage::Listen {
            query: query.clone(),
        })
    }

    fn send_unlisten(&self, query: &QuerySpec) -> SyncResult<()> {
        self.send(OutboundMessage::Unlisten {
            query: query.clone(),
        })
    }

    fn send_write(
        &self,
        write_id: WriteId,
        path: &Path,
        operation: &Operation,
        precondition: Option<&str>,
    ) -> SyncResult<()> {
        self.send(OutboundMessage::Write {
            write_id,
            path: path.clone(),
            operation: operation.clone(),
            precondition: precondition.map(str::to_string),
        })
    }

    fn send_on_disconnect(&self, path: &Path, operation: &Operation) -> SyncResult<()> {
        self.send(OutboundMessage::OnDisconnect {
            path: path.clone(),
            operation: operation.clone(),
        })
    }

    fn send_cancel_on_disconnect(&self, path: &Path) -> SyncResult<()> {
        self.send(OutboundMessage::CancelOnDisconnect { path: path.clone() })
    }
}

/// Frame writer backed by an mpsc channel.
pub struct ChannelFrameWriter {
    tx: Sender<Bytes>,
}

impl ChannelFrameWriter {
    /// Creates a writer and the receiver for its frames.
    pub fn new() -> (Self, Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl FrameWriter for ChannelFrameWriter {
    fn write_frame(&self, frame: Bytes) -> Result<(), FrameWriteError> {
        self.tx.send(frame).map_err(|_| FrameWriteError::Closed)
    }
}
