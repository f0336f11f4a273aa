// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::GrpcStream;
use super::client::ClientStream;
use crate::context::CallContext;
use crate::error::Result;
use crate::service::RpcShape;
use crate::status::Status;
use bd_grpc_web_codec::{MessageCodec, Metadata};
use std::sync::atomic::{AtomicBool, Ordering};

//
// BidiStream
//

// A bidirectional call. Reuses the client stream send path unchanged and adds a receive loop that
// can run concurrently with sends, one message per recv_msg.
pub struct BidiStream<C, Request, Response> {
  inner: ClientStream<C, Request, Response>,
  sent_close_send: AtomicBool,
}

impl<C, Request, Response> BidiStream<C, Request, Response>
where
  C: MessageCodec<Request> + MessageCodec<Response>,
{
  pub(crate) const fn new(inner: ClientStream<C, Request, Response>) -> Self {
    Self {
      inner,
      sent_close_send: AtomicBool::new(false),
    }
  }
}

#[async_trait::async_trait]
impl<C, Request, Response> GrpcStream<Request, Response> for BidiStream<C, Request, Response>
where
  C: MessageCodec<Request> + MessageCodec<Response>,
  Request: Sync,
  Response: Send,
{
  fn shape(&self) -> RpcShape {
    RpcShape::BidiStreaming
  }

  fn context(&self) -> &CallContext {
    self.inner.context()
  }

  async fn header(&self) -> Result<Metadata> {
    self.inner.response_header().await
  }

  fn trailer(&self) -> Metadata {
    self.inner.trailer.get()
  }

  async fn close_send(&self) -> Result<()> {
    self.inner.close_send_side().await?;
    self.sent_close_send.store(true, Ordering::Release);
    Ok(())
  }

  async fn send_msg(&self, message: &Request) -> Result<()> {
    self.inner.send(message).await
  }

  async fn recv_msg(&self) -> Result<Option<Response>> {
    // Terminal reads never touch the connection again.
    if self.inner.trailer.is_terminal() {
      return Ok(None);
    }

    let next = self.inner.next_frame().await;
    // An early close while the client is still sending is a failure, not a trailers-only
    // response.
    if self.sent_close_send.load(Ordering::Acquire) && self.inner.is_trailers_only(&next) {
      self.inner.finish_trailers_only().await?.into_result()?;
      return Ok(None);
    }

    match next? {
      Some(frame) if frame.is_trailer => {
        self.inner.finish_with_trailer(&frame).await.into_result()?;
        Ok(None)
      },
      Some(frame) => Ok(Some(self.inner.decode(&frame)?)),
      None => {
        self.inner.finish(Metadata::new()).await;
        Err(Status::from_metadata(&Metadata::new()).into())
      },
    }
  }
}
