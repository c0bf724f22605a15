//! Tests for frame encoding and reassembly.

use crate::batch::{Batch, Row};
use crate::codec::{CodecError, DEFAULT_MAX_FRAME_LEN, FRAME_HEADER_LEN, FrameCodec};
use crate::message::{Message, WorkerId};
use crate::serializer::{Base64Serializer, JsonSerializer};
use serde_json::json;
use std::sync::Arc;

fn codec() -> FrameCodec {
  FrameCodec::new(Arc::new(JsonSerializer))
}

fn batch(n: usize) -> Batch {
  let rows: Vec<Row> = (0..n)
    .map(|i| json!({ "i": i, "name": format!("row-{}", i) }))
    .filter_map(|v| v.as_object().cloned())
    .collect();
  Batch::new(rows)
}

#[test]
fn test_encode_prefixes_big_endian_length() {
  let codec = codec();
  let frame = codec.encode(&Message::fetch(WorkerId::new("w1"))).unwrap();
  let payload = br#"{"type":"FETCH","id":"w1"}"#;

  assert_eq!(frame.len(), FRAME_HEADER_LEN + payload.len());
  assert_eq!(&frame[..4], &(payload.len() as u32).to_be_bytes());
  assert_eq!(&frame[4..], payload);
}

#[test]
fn test_feed_whole_frame() {
  let mut codec = codec();
  let message = Message::identify(WorkerId::new("w1"));
  let frame = codec.encode(&message).unwrap();

  let messages = codec.feed(1, &frame).unwrap();
  assert_eq!(messages, vec![message]);
  assert_eq!(codec.buffered(1), 0);
  assert_eq!(codec.pending_connections(), 0);
}

#[test]
fn test_feed_reassembles_any_split() {
  let mut codec = codec();
  let message = Message::process(batch(20));
  let frame = codec.encode(&message).unwrap();

  for split in 1..frame.len() {
    let first = codec.feed(7, &frame[..split]).unwrap();
    assert!(first.is_empty(), "split at {} decoded early", split);
    assert_eq!(codec.buffered(7), split);

    let second = codec.feed(7, &frame[split..]).unwrap();
    assert_eq!(second, vec![message.clone()], "split at {}", split);
    assert_eq!(codec.buffered(7), 0);
  }
}

#[test]
fn test_feed_byte_by_byte() {
  let mut codec = codec();
  let message = Message::fetch(WorkerId::new("slow"));
  let frame = codec.encode(&message).unwrap();

  let mut decoded = Vec::new();
  for byte in frame.iter() {
    decoded.extend(codec.feed(3, std::slice::from_ref(byte)).unwrap());
  }
  assert_eq!(decoded, vec![message]);
}

#[test]
fn test_feed_multiple_frames_in_one_read() {
  let mut codec = codec();
  let messages = vec![
    Message::identify(WorkerId::new("w1")),
    Message::fetch(WorkerId::new("w1")),
    Message::process(batch(3)),
  ];
  let mut data = Vec::new();
  for message in &messages {
    data.extend_from_slice(&codec.encode(message).unwrap());
  }
  let extra = codec.encode(&Message::fetch(WorkerId::new("w1"))).unwrap();
  data.extend_from_slice(&extra[..5]);

  let decoded = codec.feed(1, &data).unwrap();
  assert_eq!(decoded, messages);
  assert_eq!(codec.buffered(1), 5);

  let rest = codec.feed(1, &extra[5..]).unwrap();
  assert_eq!(rest, vec![Message::fetch(WorkerId::new("w1"))]);
}

#[test]
fn test_connections_are_isolated() {
  let mut codec = codec();
  let a = codec.encode(&Message::fetch(WorkerId::new("a"))).unwrap();
  let b = codec.encode(&Message::fetch(WorkerId::new("b"))).unwrap();

  assert!(codec.feed(1, &a[..6]).unwrap().is_empty());
  assert!(codec.feed(2, &b[..3]).unwrap().is_empty());
  assert_eq!(codec.pending_connections(), 2);

  assert_eq!(
    codec.feed(2, &b[3..]).unwrap(),
    vec![Message::fetch(WorkerId::new("b"))]
  );
  assert_eq!(
    codec.feed(1, &a[6..]).unwrap(),
    vec![Message::fetch(WorkerId::new("a"))]
  );
  assert_eq!(codec.pending_connections(), 0);
}

#[test]
fn test_release_drops_partial_frame() {
  let mut codec = codec();
  let frame = codec.encode(&Message::fetch(WorkerId::new("w1"))).unwrap();

  codec.feed(9, &frame[..10]).unwrap();
  assert_eq!(codec.buffered(9), 10);

  codec.release(9);
  assert_eq!(codec.buffered(9), 0);
  assert_eq!(codec.pending_connections(), 0);

  // A reused connection ID starts from a clean buffer.
  assert_eq!(
    codec.feed(9, &frame).unwrap(),
    vec![Message::fetch(WorkerId::new("w1"))]
  );
}

#[test]
fn test_oversized_frame_is_rejected() {
  let mut codec = codec().with_max_frame_len(16);
  let header = 1024u32.to_be_bytes();

  let err = codec.feed(1, &header).unwrap_err();
  assert!(matches!(
    err,
    CodecError::FrameTooLarge { len: 1024, max: 16 }
  ));
  assert_eq!(codec.buffered(1), 0);
}

#[test]
fn test_encode_respects_max_frame_len() {
  let codec = codec().with_max_frame_len(8);
  let err = codec.encode(&Message::process(batch(5))).unwrap_err();
  assert!(matches!(err, CodecError::FrameTooLarge { max: 8, .. }));
}

#[test]
fn test_garbage_payload_is_an_error_and_clears_buffer() {
  let mut codec = codec();
  let mut data = 3u32.to_be_bytes().to_vec();
  data.extend_from_slice(b"???");

  assert!(matches!(
    codec.feed(4, &data),
    Err(CodecError::Serializer(_))
  ));
  assert_eq!(codec.buffered(4), 0);

  let frame = codec.encode(&Message::fetch(WorkerId::new("w1"))).unwrap();
  assert_eq!(codec.feed(4, &frame).unwrap().len(), 1);
}

#[test]
fn test_base64_codec_roundtrip() {
  let mut codec = FrameCodec::new(Arc::new(Base64Serializer::new(JsonSerializer)));
  let message = Message::process(batch(4));
  let frame = codec.encode(&message).unwrap();

  assert_eq!(codec.feed(1, &frame).unwrap(), vec![message]);
}

#[test]
fn test_default_limit() {
  assert_eq!(DEFAULT_MAX_FRAME_LEN, 64 * 1024 * 1024);
}

#[test]
fn test_feed_reports_each_frame_size() {
  let mut codec = codec();
  let small = codec.encode(&Message::fetch(WorkerId::new("w1"))).unwrap();
  let large = codec.encode(&Message::process(batch(20))).unwrap();
  let mut data = small.to_vec();
  data.extend_from_slice(&large);

  let frames = codec.feed_with_sizes(1, &data).unwrap();

  let sizes: Vec<usize> = frames.iter().map(|(_, size)| *size).collect();
  assert_eq!(
    sizes,
    vec![small.len() - FRAME_HEADER_LEN, large.len() - FRAME_HEADER_LEN]
  );
  assert_eq!(frames[1].0, Message::process(batch(20)));
}
