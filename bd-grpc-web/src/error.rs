// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::status::Status;
use bd_grpc_web_codec::Code;
use tokio_tungstenite::tungstenite;

//
// Error
//

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("The call was cancelled")]
  Cancelled,
  #[error("Connection has been released")]
  Closed,
  #[error("A codec error occurred: {0}")]
  Codec(#[from] bd_grpc_web_codec::Error),
  #[error("A connection timeout occurred")]
  ConnectionTimeout,
  #[error("Call sequence violation: {0}")]
  ContractViolation(&'static str),
  #[error("The call deadline was exceeded")]
  DeadlineExceeded,
  #[error("A gRPC error occurred: {0}")]
  Grpc(#[from] Status),
  #[error("An http error occurred: {0}")]
  Http(#[from] http::Error),
  #[error("A hyper client error occurred: {0}")]
  HyperClient(#[from] hyper_util::client::legacy::Error),
  #[error("Invalid metadata: {0}")]
  InvalidMetadata(String),
  #[error("A protocol violation occurred: {0}")]
  ProtocolViolation(&'static str),
  #[error("Send side of the stream is closed")]
  StreamClosed,
  #[error("Connection closed unexpectedly")]
  UnexpectedEof,
  #[error("A websocket error occurred: {0}")]
  WebSocket(Box<tungstenite::Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tungstenite::Error> for Error {
  fn from(e: tungstenite::Error) -> Self {
    Self::WebSocket(Box::new(e))
  }
}

impl Error {
  // Convert any call failure into the gRPC status a caller would report for it.
  #[must_use]
  pub fn status(&self) -> Status {
    match self {
      Self::Grpc(status) => status.clone(),
      Self::Cancelled => Status::new(Code::Cancelled, self.to_string()),
      Self::DeadlineExceeded => Status::new(Code::DeadlineExceeded, self.to_string()),
      Self::Codec(_) | Self::Http(_) | Self::InvalidMetadata(_) | Self::ProtocolViolation(_) => {
        Status::new(Code::Internal, self.to_string())
      },
      Self::ContractViolation(_) | Self::StreamClosed => {
        Status::new(Code::FailedPrecondition, self.to_string())
      },
      Self::Closed
      | Self::ConnectionTimeout
      | Self::HyperClient(_)
      | Self::UnexpectedEof
      | Self::WebSocket(_) => Status::new(Code::Unavailable, self.to_string()),
    }
  }

  // The remote status if this error was reported by the peer.
  #[must_use]
  pub const fn remote_status(&self) -> Option<&Status> {
    match self {
      Self::Grpc(status) => Some(status),
      _ => None,
    }
  }
}
