//! Pluggable wire serialization for [`Message`]s.
//!
//! The frame codec does not care how a message becomes bytes; it only needs a
//! [`Serializer`]. Coordinator and workers must agree on the implementation,
//! which is why [`SerializerKind`] travels on the worker command line.

use crate::message::Message;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Errors raised while turning messages into bytes and back.
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
  /// JSON encoding or decoding failed.
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  /// Base64 decoding failed.
  #[error("Base64 error: {0}")]
  Base64(#[from] base64::DecodeError),
}

/// Converts messages to and from bytes.
pub trait Serializer: Send + Sync + fmt::Debug {
  /// Serializes a message.
  fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializerError>;

  /// Deserializes a message.
  fn deserialize(&self, bytes: &[u8]) -> Result<Message, SerializerError>;
}

/// Plain JSON serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
  fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializerError> {
    Ok(serde_json::to_vec(message)?)
  }

  fn deserialize(&self, bytes: &[u8]) -> Result<Message, SerializerError> {
    Ok(serde_json::from_slice(bytes)?)
  }
}

/// Wraps another serializer and base64-encodes its output.
///
/// Useful when frames cross a channel that is not binary safe.
#[derive(Debug, Clone, Default)]
pub struct Base64Serializer<S> {
  inner: S,
}

impl<S: Serializer> Base64Serializer<S> {
  /// Wraps `inner`.
  #[must_use]
  pub fn new(inner: S) -> Self {
    Self { inner }
  }
}

impl<S: Serializer> Serializer for Base64Serializer<S> {
  fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializerError> {
    let raw = self.inner.serialize(message)?;
    Ok(STANDARD.encode(raw).into_bytes())
  }

  fn deserialize(&self, bytes: &[u8]) -> Result<Message, SerializerError> {
    let raw = STANDARD.decode(bytes)?;
    self.inner.deserialize(&raw)
  }
}

/// Named serializer choice, shared by configuration and the worker CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
  /// [`JsonSerializer`].
  #[default]
  Json,
  /// [`Base64Serializer`] over [`JsonSerializer`].
  Base64Json,
}

impl SerializerKind {
  /// Instantiates the serializer.
  #[must_use]
  pub fn build(self) -> Arc<dyn Serializer> {
    match self {
      SerializerKind::Json => Arc::new(JsonSerializer),
      SerializerKind::Base64Json => Arc::new(Base64Serializer::new(JsonSerializer)),
    }
  }

  /// Name used on the command line.
  #[must_use]
  pub fn as_str(self) -> &'static str {
    match self {
      SerializerKind::Json => "json",
      SerializerKind::Base64Json => "base64_json",
    }
  }
}

impl fmt::Display for SerializerKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SerializerKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "json" => Ok(SerializerKind::Json),
      "base64_json" => Ok(SerializerKind::Base64Json),
      other => Err(format!("unknown serializer: {}", other)),
    }
  }
}
