// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::Result;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

//
// Codec
//

// A message codec selected by its content-subtype, e.g. `proto` for
// `application/grpc-web+proto`.
pub trait Codec: Send + Sync {
  fn name(&self) -> &'static str;
}

//
// MessageCodec
//

// Serializes and deserializes messages of a given type. Codecs never look inside messages beyond
// what is needed to (de)serialize them.
pub trait MessageCodec<MessageType>: Codec {
  fn marshal(&self, message: &MessageType) -> Result<Bytes>;
  fn unmarshal(&self, bytes: &[u8]) -> Result<MessageType>;
}

//
// ProtoCodec
//

#[derive(Clone, Copy, Debug, Default)]
pub struct ProtoCodec;

impl Codec for ProtoCodec {
  fn name(&self) -> &'static str {
    "proto"
  }
}

impl<MessageType: protobuf::Message> MessageCodec<MessageType> for ProtoCodec {
  fn marshal(&self, message: &MessageType) -> Result<Bytes> {
    Ok(message.write_to_bytes()?.into())
  }

  fn unmarshal(&self, bytes: &[u8]) -> Result<MessageType> {
    Ok(MessageType::parse_from_bytes(bytes)?)
  }
}

//
// JsonCodec
//

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
  fn name(&self) -> &'static str {
    "json"
  }
}

impl<MessageType: Serialize + DeserializeOwned> MessageCodec<MessageType> for JsonCodec {
  fn marshal(&self, message: &MessageType) -> Result<Bytes> {
    Ok(serde_json::to_vec(message)?.into())
  }

  fn unmarshal(&self, bytes: &[u8]) -> Result<MessageType> {
    Ok(serde_json::from_slice(bytes)?)
  }
}
