//! Tests for wire serializers.

use crate::message::{Message, WorkerId};
use crate::serializer::{Base64Serializer, JsonSerializer, Serializer, SerializerKind};

#[test]
fn test_json_serializer_roundtrip() {
  let serializer = JsonSerializer;
  let message = Message::fetch(WorkerId::new("w1"));

  let bytes = serializer.serialize(&message).unwrap();
  assert_eq!(bytes, br#"{"type":"FETCH","id":"w1"}"#.to_vec());
  assert_eq!(serializer.deserialize(&bytes).unwrap(), message);
}

#[test]
fn test_base64_serializer_output_is_ascii() {
  let serializer = Base64Serializer::new(JsonSerializer);
  let message = Message::identify(WorkerId::new("w1"));

  let bytes = serializer.serialize(&message).unwrap();
  assert!(
    bytes
      .iter()
      .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
  );
  assert_eq!(serializer.deserialize(&bytes).unwrap(), message);
}

#[test]
fn test_base64_serializer_rejects_invalid_input() {
  let serializer = Base64Serializer::new(JsonSerializer);
  assert!(serializer.deserialize(b"not base64!").is_err());
}

#[test]
fn test_json_serializer_rejects_garbage() {
  assert!(JsonSerializer.deserialize(b"\x00\x01").is_err());
}

#[test]
fn test_serializer_kind_parse_and_display() {
  assert_eq!("json".parse::<SerializerKind>(), Ok(SerializerKind::Json));
  assert_eq!(
    "base64_json".parse::<SerializerKind>(),
    Ok(SerializerKind::Base64Json)
  );
  assert!("xml".parse::<SerializerKind>().is_err());
  assert_eq!(SerializerKind::Base64Json.to_string(), "base64_json");
  assert_eq!(SerializerKind::default(), SerializerKind::Json);
}

#[test]
fn test_serializer_kind_builds_matching_serializer() {
  let message = Message::fetch(WorkerId::new("w1"));
  let encoded = SerializerKind::Base64Json.build().serialize(&message).unwrap();
  let decoded = Base64Serializer::new(JsonSerializer).deserialize(&encoded).unwrap();
  assert_eq!(decoded, message);
}
