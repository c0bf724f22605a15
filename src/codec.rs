//! # Frame Codec
//!
//! Turns [`Message`]s into length-prefixed frames and reassembles frames from
//! arbitrarily split socket reads.
//!
//! ## Wire format
//!
//! ```text
//! +----------------------+---------------------------+
//! | length (u32, BE)     | serialized message bytes  |
//! +----------------------+---------------------------+
//! ```
//!
//! A frame is only decoded once all `length` payload bytes have arrived.
//! Partial data is kept in a buffer owned by the codec and keyed by
//! [`ConnectionId`]; callers must [`FrameCodec::release`] a connection's
//! buffer when it closes.

use crate::message::Message;
use crate::serializer::{Serializer, SerializerError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one connection inside a process.
pub type ConnectionId = u64;

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound for a single frame payload (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
  /// The frame announces (or would need) more bytes than allowed.
  #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
  FrameTooLarge {
    /// Announced payload length.
    len: usize,
    /// Configured limit.
    max: usize,
  },
  /// The payload could not be (de)serialized.
  #[error("Serialization error: {0}")]
  Serializer(#[from] SerializerError),
}

/// Encodes messages into frames and reassembles incoming frames per connection.
#[derive(Debug)]
pub struct FrameCodec {
  serializer: Arc<dyn Serializer>,
  buffers: HashMap<ConnectionId, BytesMut>,
  max_frame_len: usize,
}

impl FrameCodec {
  /// Creates a codec using the given serializer.
  #[must_use]
  pub fn new(serializer: Arc<dyn Serializer>) -> Self {
    Self {
      serializer,
      buffers: HashMap::new(),
      max_frame_len: DEFAULT_MAX_FRAME_LEN,
    }
  }

  /// Overrides the maximum accepted frame payload length.
  #[must_use]
  pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
    self.max_frame_len = max_frame_len;
    self
  }

  /// Serializes `message` and wraps it in a frame.
  pub fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
    let payload = self.serializer.serialize(message)?;
    if payload.len() > self.max_frame_len || u32::try_from(payload.len()).is_err() {
      return Err(CodecError::FrameTooLarge {
        len: payload.len(),
        max: self.max_frame_len,
      });
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame.freeze())
  }

  /// Feeds bytes read from `connection` and returns every message they complete.
  ///
  /// Incomplete trailing data stays buffered for the next call. On error the
  /// connection's buffer is discarded; other connections are unaffected.
  pub fn feed(
    &mut self,
    connection: ConnectionId,
    data: &[u8],
  ) -> Result<Vec<Message>, CodecError> {
    let frames = self.feed_with_sizes(connection, data)?;
    Ok(frames.into_iter().map(|(message, _)| message).collect())
  }

  /// Like [`FrameCodec::feed`], pairing each message with its payload length.
  pub fn feed_with_sizes(
    &mut self,
    connection: ConnectionId,
    data: &[u8],
  ) -> Result<Vec<(Message, usize)>, CodecError> {
    let buffer = self.buffers.entry(connection).or_default();
    buffer.extend_from_slice(data);

    let mut messages = Vec::new();
    loop {
      match Self::next_frame(buffer, self.max_frame_len) {
        Ok(Some(payload)) => match self.serializer.deserialize(&payload) {
          Ok(message) => messages.push((message, payload.len())),
          Err(e) => {
            self.buffers.remove(&connection);
            return Err(e.into());
          }
        },
        Ok(None) => break,
        Err(e) => {
          self.buffers.remove(&connection);
          return Err(e);
        }
      }
    }

    if buffer.is_empty() {
      self.buffers.remove(&connection);
    }

    Ok(messages)
  }

  /// Drops whatever is buffered for `connection`.
  pub fn release(&mut self, connection: ConnectionId) {
    self.buffers.remove(&connection);
  }

  /// Number of bytes waiting for the rest of their frame on `connection`.
  #[must_use]
  pub fn buffered(&self, connection: ConnectionId) -> usize {
    self.buffers.get(&connection).map_or(0, BytesMut::len)
  }

  /// Number of connections with partial frames buffered.
  #[must_use]
  pub fn pending_connections(&self) -> usize {
    self.buffers.len()
  }

  fn next_frame(buffer: &mut BytesMut, max_frame_len: usize) -> Result<Option<Bytes>, CodecError> {
    if buffer.len() < FRAME_HEADER_LEN {
      return Ok(None);
    }

    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    if len > max_frame_len {
      return Err(CodecError::FrameTooLarge {
        len,
        max: max_frame_len,
      });
    }
    if buffer.len() < FRAME_HEADER_LEN + len {
      buffer.reserve(FRAME_HEADER_LEN + len - buffer.len());
      return Ok(None);
    }

    buffer.advance(FRAME_HEADER_LEN);
    Ok(Some(buffer.split_to(len).freeze()))
  }
}
