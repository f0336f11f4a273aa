// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod http_client;
pub mod websocket;

use crate::error::{Error, Result};
use bd_grpc_web_codec::Metadata;
use bytes::Bytes;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use tokio::io::AsyncRead;
use websocket::WebSocketTransport;

pub type ResponseBody = Box<dyn AsyncRead + Send + Unpin>;

//
// HttpResponse
//

// A response whose status line has been accepted. The body is read frame by frame by the caller.
pub struct HttpResponse {
  pub headers: HeaderMap,
  pub body: ResponseBody,
}

impl std::fmt::Debug for HttpResponse {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpResponse")
      .field("headers", &self.headers)
      .finish_non_exhaustive()
  }
}

//
// UnaryTransport
//

// Performs one HTTP POST per logical call. Used for unary and server streaming calls.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait::async_trait]
pub trait UnaryTransport: Send + Sync {
  // POST the body to the method path. A non 2xx response must be reported as an Unavailable
  // status.
  async fn send(&self, method: &str, headers: HeaderMap, body: Bytes) -> Result<HttpResponse>;
}

//
// StreamConnector
//

// Opens one websocket per client or bidi stream.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync {
  async fn connect(&self, method: &str, request_header: Metadata) -> Result<WebSocketTransport>;
}

// Convert metadata into HTTP headers. Keys go on the wire lower-cased and multi-valued keys become
// repeated headers.
pub fn to_header_map(metadata: &Metadata) -> Result<HeaderMap> {
  let mut headers = HeaderMap::with_capacity(metadata.len());
  for (key, value) in metadata.iter() {
    let name = HeaderName::from_bytes(key.as_bytes())
      .map_err(|_| Error::InvalidMetadata(format!("invalid header name: {key:?}")))?;
    let value = HeaderValue::from_str(value)
      .map_err(|_| Error::InvalidMetadata(format!("invalid value for header {key:?}")))?;
    headers.append(name, value);
  }
  Ok(headers)
}

// Convert HTTP headers into metadata. Values that are not visible ASCII are decoded lossily.
#[must_use]
pub fn from_header_map(headers: &HeaderMap) -> Metadata {
  headers
    .iter()
    .map(|(name, value)| {
      (
        name.as_str(),
        String::from_utf8_lossy(value.as_bytes()).into_owned(),
      )
    })
    .collect()
}
