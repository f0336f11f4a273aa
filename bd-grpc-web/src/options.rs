// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use bd_grpc_web_codec::{Codec, Metadata};
use serde::{Deserialize, Deserializer};
use std::sync::{Arc, OnceLock};
use time::Duration;

//
// MetadataSink
//

// A write-once capture of response header or trailer metadata. Clones share the same slot so the
// caller keeps one clone and hands another to the call.
#[derive(Clone, Debug, Default)]
pub struct MetadataSink(Arc<OnceLock<Metadata>>);

impl MetadataSink {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn get(&self) -> Option<Metadata> {
    self.0.get().cloned()
  }

  pub(crate) fn set(&self, metadata: Metadata) {
    if self.0.set(metadata).is_err() {
      log::trace!("metadata sink already populated, ignoring");
    }
  }
}

//
// CallOptions
//

// Per call configuration. The codec is an explicit instance, there is no global registry.
#[derive(Debug)]
pub struct CallOptions<C> {
  pub(crate) codec: C,
  header: Option<MetadataSink>,
  trailer: Option<MetadataSink>,
}

impl<C: Codec> CallOptions<C> {
  #[must_use]
  pub const fn new(codec: C) -> Self {
    Self {
      codec,
      header: None,
      trailer: None,
    }
  }

  #[must_use]
  pub fn with_header_sink(mut self, sink: MetadataSink) -> Self {
    self.header = Some(sink);
    self
  }

  #[must_use]
  pub fn with_trailer_sink(mut self, sink: MetadataSink) -> Self {
    self.trailer = Some(sink);
    self
  }

  // The content-subtype sent as application/grpc-web+<subtype>.
  #[must_use]
  pub fn subtype(&self) -> &'static str {
    self.codec.name()
  }
}

// Usable without a codec bound.
impl<C> CallOptions<C> {
  #[must_use]
  pub const fn codec(&self) -> &C {
    &self.codec
  }

  pub(crate) fn record_header(&self, header: &Metadata) {
    if let Some(sink) = &self.header {
      sink.set(header.clone());
    }
  }

  pub(crate) fn record_trailer(&self, trailer: &Metadata) {
    if let Some(sink) = &self.trailer {
      sink.set(trailer.clone());
    }
  }
}

//
// DialOptions
//

// Connection configuration for a client. Durations are given in (fractional) seconds when loaded
// from config.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DialOptions {
  // Use plain http/ws instead of https/wss.
  pub insecure: bool,
  #[serde(deserialize_with = "deserialize_seconds")]
  pub connect_timeout: Duration,
  #[serde(deserialize_with = "deserialize_seconds")]
  pub websocket_handshake_timeout: Duration,
}

impl Default for DialOptions {
  fn default() -> Self {
    Self {
      insecure: false,
      connect_timeout: Duration::seconds(10),
      websocket_handshake_timeout: Duration::seconds(45),
    }
  }
}

fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
  let seconds = f64::deserialize(deserializer)?;
  if !seconds.is_finite() || seconds < 0.0 {
    return Err(serde::de::Error::custom(format!(
      "invalid duration: {seconds}"
    )));
  }
  Ok(Duration::seconds_f64(seconds))
}
