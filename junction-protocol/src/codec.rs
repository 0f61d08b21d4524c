//! Encoder and decoder for wire frames and messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Body, Message};
use bytes::{Bytes, BytesMut};

/// Encodes messages into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a message into its wire frame.
    pub fn encode(msg: &Message) -> Result<BytesMut, ProtocolError> {
        let payload = msg.body.encode()?;
        Frame::new(msg.mtype(), msg.rid.clone(), Bytes::from(payload)).encode()
    }
}

/// Decodes frames into typed messages from a streaming byte feed.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// The [`crate::frame::MAX_PENDING_BYTES`] cap is enforced from the
    /// length prefix: any
    /// frame that could stall the buffer past the cap declares an oversized
    /// length and fails as soon as its header is readable, so the connection
    /// is shut down before unbounded input accumulates.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next message: one frame, body deserialized via
    /// the [`Body`] factory, then validated with `check()`.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let body = Body::decode(frame.mtype, &frame.payload)?;
                let msg = Message::new(frame.rid, body);
                msg.check()?;
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
