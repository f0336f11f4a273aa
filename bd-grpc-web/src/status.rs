// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use bd_grpc_web_codec::{Code, GRPC_MESSAGE, GRPC_STATUS, Metadata};

//
// Status
//

// Wrapper for a gRPC status including a code and message. An empty message means the peer did not
// send one.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Status {
  pub code: Code,
  pub message: String,
}

impl Status {
  #[must_use]
  pub fn new(code: Code, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }

  #[must_use]
  pub const fn ok() -> Self {
    Self {
      code: Code::Ok,
      message: String::new(),
    }
  }

  // Resolve the status carried by a trailer, or by response headers in the trailers-only case. A
  // missing grpc-status is itself a failure and never treated as success.
  #[must_use]
  pub fn from_metadata(metadata: &Metadata) -> Self {
    let Some(status) = metadata.get(GRPC_STATUS) else {
      return Self::new(
        Code::Unknown,
        "response closed without grpc-status (headers only)",
      );
    };

    let Some(code) = Code::parse(status) else {
      return Self::new(Code::Unknown, format!("invalid grpc-status: {status:?}"));
    };

    Self {
      code,
      message: metadata.get(GRPC_MESSAGE).map(decode_message).unwrap_or_default(),
    }
  }

  // Like from_metadata but only if grpc-status is present. Used to detect trailers-only responses
  // from HTTP headers.
  #[must_use]
  pub fn from_headers_if_present(metadata: &Metadata) -> Option<Self> {
    metadata
      .contains_key(GRPC_STATUS)
      .then(|| Self::from_metadata(metadata))
  }

  #[must_use]
  pub fn is_ok(&self) -> bool {
    self.code == Code::Ok
  }

  // Ok(()) for an OK status, the status as an error otherwise.
  pub fn into_result(self) -> crate::Result<()> {
    if self.is_ok() {
      Ok(())
    } else {
      Err(self.into())
    }
  }
}

// Servers percent-encode grpc-message so that it is a valid header value. Values that do not decode
// are kept as is.
fn decode_message(message: &str) -> String {
  urlencoding::decode(message).map_or_else(|_| message.to_string(), |decoded| decoded.into_owned())
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "code: {}, message: {}",
      self.code,
      if self.message.is_empty() {
        "<none>"
      } else {
        &self.message
      }
    )
  }
}

impl std::error::Error for Status {}
