// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::{
  Code,
  Error,
  FRAME_HEADER_LEN,
  FrameHeader,
  JsonCodec,
  MessageCodec,
  Metadata,
  ProtoCodec,
  decode_frame,
  decode_frame_header,
  decode_message,
  decode_trailer,
  encode,
  encode_trailer,
};
use protobuf::well_known_types::struct_::value::Kind;
use protobuf::well_known_types::struct_::{Struct, Value};
use rstest::rstest;
use std::io::Cursor;

#[ctor::ctor]
fn test_global_init() {
  bd_test_helpers::test_global_init();
}

#[tokio::test]
async fn encoded_payload_is_recovered() {
  for payload in [&b""[..], &b"a"[..], &b"hello, world"[..], &[0x80; 300][..]] {
    let encoded = encode(payload).unwrap();
    assert_eq!(encoded.len(), FRAME_HEADER_LEN + payload.len());
    assert_eq!(encoded[0], 0);

    let mut reader = Cursor::new(encoded);
    let header = decode_frame_header(&mut reader).await.unwrap().unwrap();
    assert!(!header.is_trailer());
    assert_eq!(header.length as usize, payload.len());
    let decoded = decode_message(&mut reader, header.length).await.unwrap();
    assert_eq!(&decoded[..], payload);
  }
}

#[tokio::test]
async fn length_is_big_endian() {
  let encoded = encode(&[7; 258]).unwrap();
  assert_eq!(&encoded[.. FRAME_HEADER_LEN], &[0, 0, 0, 1, 2]);
}

#[rstest]
#[case(0x00, false)]
#[case(0x01, false)]
#[case(0x02, false)]
#[case(0x7f, false)]
#[case(0x80, true)]
#[case(0x81, true)]
#[case(0xff, true)]
fn trailer_flag_discrimination(#[case] flags: u8, #[case] is_trailer: bool) {
  let header = FrameHeader::parse([flags, 0, 0, 0, 1]);
  assert_eq!(header.is_trailer(), is_trailer);
  assert_eq!(header.length, 1);
}

#[tokio::test]
async fn clean_end_before_header() {
  let mut reader: &[u8] = &[];
  assert!(decode_frame_header(&mut reader).await.unwrap().is_none());
  assert!(decode_frame(&mut reader).await.unwrap().is_none());
}

#[rstest]
#[case(1)]
#[case(4)]
#[tokio::test]
async fn short_header_is_malformed(#[case] available: usize) {
  let bytes = [0u8; 4];
  let mut reader = &bytes[.. available];
  match decode_frame_header(&mut reader).await {
    Err(Error::MalformedFrame(read)) => assert_eq!(read, available),
    other => panic!("unexpected result: {other:?}"),
  }
}

#[tokio::test]
async fn short_payload_is_truncated() {
  let encoded = encode(b"hello").unwrap();
  let mut reader = &encoded[.. encoded.len() - 2];
  match decode_frame(&mut reader).await {
    Err(Error::Truncated { expected, actual }) => {
      assert_eq!(expected, 5);
      assert_eq!(actual, 3);
    },
    other => panic!("unexpected result: {other:?}"),
  }
}

#[tokio::test]
async fn trailer_frame_is_parsed() {
  let payload = concat!(
    "grpc-status: 5\r\n",
    "Grpc-Message: missing\r\n",
    "broken line\r\n",
    "x-extra: a\r\n",
    "x-extra: b\r\n"
  )
  .as_bytes();
  let mut bytes = vec![0x80];
  #[allow(clippy::cast_possible_truncation)]
  bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
  bytes.extend_from_slice(payload);

  let mut reader = bytes.as_slice();
  let header = decode_frame_header(&mut reader).await.unwrap().unwrap();
  assert!(header.is_trailer());
  let trailer = decode_trailer(&mut reader, header.length).await.unwrap();
  assert_eq!(trailer.get("grpc-status"), Some("5"));
  assert_eq!(trailer.get("grpc-message"), Some("missing"));
  assert_eq!(trailer.get_all("x-extra"), &["a", "b"]);
  assert_eq!(trailer.len(), 3);
}

#[tokio::test]
async fn encoded_trailer_is_a_trailer_frame() {
  let trailer: Metadata = [("grpc-status", "0"), ("x-trace", "abc")].into_iter().collect();
  let encoded = encode_trailer(&trailer).unwrap();
  assert_eq!(encoded[0], 0x80);

  let mut reader = encoded.as_ref();
  let frame = decode_frame(&mut reader).await.unwrap().unwrap();
  assert!(frame.is_trailer);
  assert_eq!(frame.trailer(), trailer);
  assert!(decode_frame(&mut reader).await.unwrap().is_none());
}

#[tokio::test]
async fn frames_are_read_back_to_back() {
  let mut bytes = encode(b"one").unwrap().to_vec();
  bytes.extend_from_slice(&encode(b"two").unwrap());
  bytes.extend_from_slice(
    &encode_trailer(&[("grpc-status", "0")].into_iter().collect()).unwrap(),
  );

  let mut reader = bytes.as_slice();
  let first = decode_frame(&mut reader).await.unwrap().unwrap();
  let second = decode_frame(&mut reader).await.unwrap().unwrap();
  let third = decode_frame(&mut reader).await.unwrap().unwrap();
  assert_eq!(&first.payload[..], b"one");
  assert_eq!(&second.payload[..], b"two");
  assert!(third.is_trailer);
  assert!(decode_frame(&mut reader).await.unwrap().is_none());
}

#[test]
fn proto_codec() {
  let mut message = Struct::new();
  message.fields.insert(
    "key".to_string(),
    Value {
      kind: Some(Kind::StringValue("abc".to_string())),
      ..Default::default()
    },
  );

  let bytes = ProtoCodec.marshal(&message).unwrap();
  let decoded: Struct = ProtoCodec.unmarshal(&bytes).unwrap();
  assert_eq!(decoded, message);

  assert!(MessageCodec::<Struct>::unmarshal(&ProtoCodec, &[0xff, 0xff]).is_err());
}

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq)]
struct Echo {
  message: String,
}

#[test]
fn json_codec() {
  let bytes = JsonCodec
    .marshal(&Echo {
      message: "hello, ktr".to_string(),
    })
    .unwrap();
  assert_eq!(&bytes[..], br#"{"message":"hello, ktr"}"#);

  let decoded: Echo = JsonCodec.unmarshal(&bytes).unwrap();
  assert_eq!(decoded.message, "hello, ktr");
  assert!(MessageCodec::<Echo>::unmarshal(&JsonCodec, b"{").is_err());
}

#[rstest]
#[case("0", Code::Ok)]
#[case("1", Code::Cancelled)]
#[case("5", Code::NotFound)]
#[case("16", Code::Unauthenticated)]
#[case("17", Code::Unknown)]
#[case(" 14 ", Code::Unavailable)]
#[case("nope", Code::Unknown)]
fn code_from_string(#[case] status: &str, #[case] code: Code) {
  assert_eq!(Code::from_string(status), code);
}

#[test]
fn code_round_trips_through_int() {
  for value in 0 ..= 16 {
    assert_eq!(Code::from_int(value).to_int(), value);
  }
  assert!(Code::parse("abc").is_none());
}

#[test]
fn oversized_payload_is_rejected() {
  assert_eq!(crate::frame_length(u32::MAX as usize).unwrap(), u32::MAX);
  match crate::frame_length(u32::MAX as usize + 1) {
    Err(Error::FrameTooLarge(length)) => assert_eq!(length, u32::MAX as usize + 1),
    other => panic!("unexpected result: {other:?}"),
  }
}
