// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod bidi;
pub mod client;
pub mod server;
pub mod unary;

use crate::context::CallContext;
use crate::error::Result;
use crate::service::RpcShape;
use bd_grpc_web_codec::Metadata;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

//
// GrpcStream
//

// The common surface of all four RPC shapes. Each shape enforces its own legal call sequence.
// All operations take &self so that one task can send while another receives.
#[async_trait::async_trait]
pub trait GrpcStream<Request, Response>: Send + Sync
where
  Request: Sync,
  Response: Send,
{
  fn shape(&self) -> RpcShape;

  fn context(&self) -> &CallContext;

  // The response header metadata. Blocks until the header is available. On the HTTP shapes a call
  // made while send_msg is in flight waits for the response, and a failed request yields empty
  // metadata.
  async fn header(&self) -> Result<Metadata>;

  // The response trailer metadata. Panics if the stream has not reached its terminal state, i.e.
  // recv_msg has not yet returned end of stream or an error status.
  fn trailer(&self) -> Metadata;

  async fn close_send(&self) -> Result<()>;

  async fn send_msg(&self, message: &Request) -> Result<()>;

  // Receive the next message. Ok(None) is a clean end of stream.
  async fn recv_msg(&self) -> Result<Option<Response>>;
}

//
// TrailerState
//

// Terminal state of a stream plus the trailer captured on the way there. The trailer is written
// exactly once, before the stream is marked terminal.
#[derive(Default)]
pub(crate) struct TrailerState {
  terminal: AtomicBool,
  trailer: RwLock<Option<Metadata>>,
}

impl TrailerState {
  pub(crate) fn is_terminal(&self) -> bool {
    self.terminal.load(Ordering::Acquire)
  }

  // Whether a trailer has been captured yet.
  pub(crate) fn is_empty(&self) -> bool {
    self.trailer.read().is_none()
  }

  // Record the trailer and move to the terminal state. Returns false if the stream was already
  // terminal, in which case the first trailer is kept.
  pub(crate) fn finish(&self, trailer: Metadata) -> bool {
    {
      let mut current = self.trailer.write();
      if current.is_some() {
        return false;
      }
      *current = Some(trailer);
    }
    self.terminal.store(true, Ordering::Release);
    true
  }

  pub(crate) fn get(&self) -> Metadata {
    assert!(
      self.is_terminal(),
      "trailer must only be read after the stream has reached its terminal state"
    );
    self.trailer.read().clone().unwrap_or_default()
  }
}

//
// HeaderSlot
//

// The response header of an HTTP shape, published once when send_msg completes. Readers that
// arrive earlier wait for it.
pub(crate) struct HeaderSlot(watch::Sender<Option<Metadata>>);

impl Default for HeaderSlot {
  fn default() -> Self {
    Self(watch::channel(None).0)
  }
}

impl HeaderSlot {
  pub(crate) fn publish(&self, header: Metadata) {
    self.0.send_replace(Some(header));
  }

  pub(crate) async fn wait(&self) -> Metadata {
    let mut receiver = self.0.subscribe();
    // The sender is owned by self so the channel cannot close while waiting.
    receiver
      .wait_for(Option::is_some)
      .await
      .map(|header| header.clone().unwrap_or_default())
      .unwrap_or_default()
  }
}
