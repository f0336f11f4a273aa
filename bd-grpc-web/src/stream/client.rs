// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{GrpcStream, TrailerState};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::options::CallOptions;
use crate::service::RpcShape;
use crate::status::Status;
use crate::transport::websocket::WebSocketTransport;
use bd_grpc_web_codec::{Frame, MessageCodec, Metadata, encode};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

//
// ClientStream
//

// A client streaming call over the websocket transport. Any number of send_msg calls are followed
// by close_send and a single recv_msg that yields the one reply.
pub struct ClientStream<C, Request, Response> {
  transport: WebSocketTransport,
  context: CallContext,
  options: CallOptions<C>,
  header_recorded: AtomicBool,
  trailers_only: AtomicBool,
  pub(crate) trailer: TrailerState,
  _types: PhantomData<fn(Request) -> Response>,
}

impl<C, Request, Response> ClientStream<C, Request, Response>
where
  C: MessageCodec<Request> + MessageCodec<Response>,
{
  pub(crate) fn new(
    transport: WebSocketTransport,
    context: CallContext,
    options: CallOptions<C>,
  ) -> Self {
    Self {
      transport,
      context,
      options,
      header_recorded: AtomicBool::new(false),
      trailers_only: AtomicBool::new(false),
      trailer: TrailerState::default(),
      _types: PhantomData,
    }
  }

  async fn load_header(&self) -> Result<Metadata> {
    let header = self.transport.header().await?;
    if !self.header_recorded.swap(true, Ordering::AcqRel) {
      self.options.record_header(&header);
    }
    Ok(header)
  }

  pub(crate) async fn send(&self, message: &Request) -> Result<()> {
    let frame = encode(&MessageCodec::<Request>::marshal(
      &self.options.codec,
      message,
    )?)?;
    self.context.run(self.transport.send(&frame)).await
  }

  pub(crate) async fn close_send_side(&self) -> Result<()> {
    self.context.run(self.transport.close_send()).await
  }

  // Read the next response frame. The response header is read and recorded first.
  pub(crate) async fn next_frame(&self) -> Result<Option<Frame>> {
    self
      .context
      .run(async {
        self.load_header().await?;
        self.transport.receive().await
      })
      .await
  }

  pub(crate) fn decode(&self, frame: &Frame) -> Result<Response> {
    Ok(MessageCodec::<Response>::unmarshal(
      &self.options.codec,
      &frame.payload,
    )?)
  }

  // Move to the terminal state and release the connection.
  pub(crate) async fn finish(&self, trailer: Metadata) {
    self.options.record_trailer(&trailer);
    self.trailer.finish(trailer);
    self.transport.close().await;
  }

  // Capture the trailer frame and resolve the final status.
  pub(crate) async fn finish_with_trailer(&self, frame: &Frame) -> Status {
    let trailer = frame.trailer();
    let status = Status::from_metadata(&trailer);
    log::debug!("stream finished with status {status}");
    self.finish(trailer).await;
    status
  }

  // The connection closed abnormally before any trailer was read: the peer responded with headers
  // only, so the response header block doubles as the trailer. If no header was ever received
  // this was a broken connection rather than a trailers-only response.
  pub(crate) async fn finish_trailers_only(&self) -> Result<Status> {
    let Some(header) = self.transport.cached_header().cloned() else {
      self.finish(Metadata::new()).await;
      return Err(Error::UnexpectedEof);
    };

    log::debug!("trailers-only response");
    self.trailers_only.store(true, Ordering::Release);
    let status = Status::from_metadata(&header);
    self.finish(header).await;
    Ok(status)
  }

  // Whether an unexpected end of the connection should be read as a trailers-only response.
  pub(crate) fn is_trailers_only(&self, result: &Result<Option<Frame>>) -> bool {
    matches!(result, Err(Error::UnexpectedEof)) && self.trailer.is_empty()
  }

  pub(crate) async fn response_header(&self) -> Result<Metadata> {
    if self.trailers_only.load(Ordering::Acquire) {
      return Ok(Metadata::new());
    }
    self.context.run(self.load_header()).await
  }
}

#[async_trait::async_trait]
impl<C, Request, Response> GrpcStream<Request, Response> for ClientStream<C, Request, Response>
where
  C: MessageCodec<Request> + MessageCodec<Response>,
  Request: Sync,
  Response: Send,
{
  fn shape(&self) -> RpcShape {
    RpcShape::ClientStreaming
  }

  fn context(&self) -> &CallContext {
    &self.context
  }

  async fn header(&self) -> Result<Metadata> {
    self.response_header().await
  }

  fn trailer(&self) -> Metadata {
    self.trailer.get()
  }

  async fn close_send(&self) -> Result<()> {
    self.close_send_side().await
  }

  async fn send_msg(&self, message: &Request) -> Result<()> {
    self.send(message).await
  }

  // Expects exactly one data frame followed by a trailer frame.
  async fn recv_msg(&self) -> Result<Option<Response>> {
    if self.trailer.is_terminal() {
      return Ok(None);
    }

    let first = self.next_frame().await;
    if self.is_trailers_only(&first) {
      self.finish_trailers_only().await?.into_result()?;
      return Err(Error::ProtocolViolation(
        "OK status without a response message",
      ));
    }

    let frame = match first? {
      Some(frame) if frame.is_trailer => {
        self.finish_with_trailer(&frame).await.into_result()?;
        return Err(Error::ProtocolViolation(
          "OK status without a response message",
        ));
      },
      Some(frame) => frame,
      None => {
        self.finish(Metadata::new()).await;
        return Err(Status::from_metadata(&Metadata::new()).into());
      },
    };
    let response = self.decode(&frame)?;

    match self.next_frame().await? {
      Some(frame) if frame.is_trailer => {
        self.finish_with_trailer(&frame).await.into_result()?;
        Ok(Some(response))
      },
      Some(_) => Err(Error::ProtocolViolation(
        "more than one message in a client streaming response",
      )),
      None => {
        self.finish(Metadata::new()).await;
        Err(Status::from_metadata(&Metadata::new()).into())
      },
    }
  }
}
