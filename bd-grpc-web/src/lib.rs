// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


#[cfg(test)]
#[path = "./status_test.rs"]
mod status_test;

pub mod client;
pub mod context;
pub mod error;
pub mod options;
pub mod service;
pub mod status;
pub mod stream;
pub mod transport;

pub use bd_grpc_web_codec::{Code, Codec, JsonCodec, MessageCodec, Metadata, ProtoCodec};
pub use client::Client;
pub use context::{CallCancelTrigger, CallContext};
pub use error::{Error, Result};
pub use options::{CallOptions, DialOptions, MetadataSink};
pub use service::{RpcShape, ServiceMethod};
pub use status::Status;
pub use stream::GrpcStream;

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_TYPE_GRPC_WEB: &str = "application/grpc-web";
pub const X_GRPC_WEB: &str = "x-grpc-web";
pub const GRPC_WEBSOCKETS_PROTOCOL: &str = "grpc-websockets";

// The request metadata for a call: the caller's outgoing metadata plus the gRPC-Web content type
// for the codec and the x-grpc-web marker.
#[must_use]
pub fn request_metadata(outgoing: &Metadata, subtype: &str) -> Metadata {
  let mut metadata = outgoing.clone();
  metadata.insert(CONTENT_TYPE, format!("{CONTENT_TYPE_GRPC_WEB}+{subtype}"));
  metadata.insert(X_GRPC_WEB, "1");
  metadata
}
