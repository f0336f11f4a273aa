// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{GrpcStream, HeaderSlot, TrailerState};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::options::CallOptions;
use crate::request_metadata;
use crate::service::RpcShape;
use crate::status::Status;
use crate::transport::{ResponseBody, UnaryTransport, from_header_map, to_header_map};
use bd_grpc_web_codec::{
  MessageCodec,
  Metadata,
  decode_frame_header,
  decode_message,
  decode_trailer,
  encode,
};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

// What the single request produced: a body to read frames from, or a non-OK status carried by the
// response headers.
enum Response {
  // Headers holding an OK grpc-status stand in for the trailer if the body ends without one.
  Body {
    body: ResponseBody,
    header_status: Option<Metadata>,
  },
  TrailersOnly(Metadata),
  Released,
}

//
// ServerStream
//

// A server streaming call over plain HTTP. send_msg performs the POST, recv_msg then reads one
// frame at a time off the response body.
pub struct ServerStream<C, Request, Reply> {
  transport: Arc<dyn UnaryTransport>,
  context: CallContext,
  method: String,
  options: CallOptions<C>,
  sent: AtomicBool,
  header: HeaderSlot,
  response: Mutex<Option<Response>>,
  trailer: TrailerState,
  _types: PhantomData<fn(Request) -> Reply>,
}

impl<C, Request, Reply> ServerStream<C, Request, Reply> {
  pub(crate) fn new(
    transport: Arc<dyn UnaryTransport>,
    context: CallContext,
    method: &str,
    options: CallOptions<C>,
  ) -> Self {
    Self {
      transport,
      context,
      method: method.to_string(),
      options,
      sent: AtomicBool::new(false),
      header: HeaderSlot::default(),
      response: Mutex::new(None),
      trailer: TrailerState::default(),
      _types: PhantomData,
    }
  }

  // Reach the terminal state with the given trailer, dropping the response body and with it the
  // underlying connection.
  fn finish(&self, response: &mut Response, trailer: Metadata) {
    log::debug!("server stream {} finished", self.method);
    self.options.record_trailer(&trailer);
    self.trailer.finish(trailer);
    *response = Response::Released;
  }
}

impl<C, Request, Reply> ServerStream<C, Request, Reply>
where
  C: MessageCodec<Request>,
{
  // POST the single request and classify the response.
  async fn open(&self, message: &Request) -> Result<(Metadata, Response)> {
    let body = encode(&MessageCodec::<Request>::marshal(
      &self.options.codec,
      message,
    )?)?;
    let headers = to_header_map(&request_metadata(
      self.context.metadata(),
      self.options.subtype(),
    ))?;

    log::debug!("opening server stream {}", self.method);
    let response = self
      .context
      .run(self.transport.send(&self.method, headers, body))
      .await?;

    let header = from_header_map(&response.headers);
    self.options.record_header(&header);
    let response = match Status::from_headers_if_present(&header) {
      Some(status) if !status.is_ok() => {
        log::debug!("trailers-only response for {}: {status}", self.method);
        Response::TrailersOnly(header.clone())
      },
      status => Response::Body {
        body: response.body,
        header_status: status.map(|_| header.clone()),
      },
    };
    Ok((header, response))
  }
}

#[async_trait::async_trait]
impl<C, Request, Reply> GrpcStream<Request, Reply> for ServerStream<C, Request, Reply>
where
  C: MessageCodec<Request> + MessageCodec<Reply>,
  Request: Sync,
  Reply: Send,
{
  fn shape(&self) -> RpcShape {
    RpcShape::ServerStreaming
  }

  fn context(&self) -> &CallContext {
    &self.context
  }

  async fn header(&self) -> Result<Metadata> {
    if !self.sent.load(Ordering::Acquire) {
      return Err(Error::ContractViolation(
        "header requested before send_msg on a server stream",
      ));
    }
    Ok(self.header.wait().await)
  }

  fn trailer(&self) -> Metadata {
    self.trailer.get()
  }

  // The request side ends with the single send_msg.
  async fn close_send(&self) -> Result<()> {
    Ok(())
  }

  async fn send_msg(&self, message: &Request) -> Result<()> {
    if self.sent.swap(true, Ordering::AcqRel) {
      return Err(Error::ContractViolation(
        "send_msg called more than once on a server stream",
      ));
    }

    // Held for the whole request so a concurrent recv_msg waits for the response.
    let mut slot = self.response.lock().await;
    match self.open(message).await {
      Ok((header, response)) => {
        *slot = Some(response);
        self.header.publish(header);
        Ok(())
      },
      Err(e) => {
        self.header.publish(Metadata::new());
        Err(e)
      },
    }
  }

  async fn recv_msg(&self) -> Result<Option<Reply>> {
    if self.trailer.is_terminal() {
      return Ok(None);
    }

    let mut response = self.response.lock().await;
    let Some(response) = response.as_mut() else {
      return Err(Error::ContractViolation(
        "recv_msg called before send_msg on a server stream",
      ));
    };

    let (body, header_status) = match response {
      Response::Body {
        body,
        header_status,
      } => (body, header_status),
      Response::TrailersOnly(trailer) => {
        let trailer = std::mem::take(trailer);
        let status = Status::from_metadata(&trailer);
        self.finish(response, trailer);
        status.into_result()?;
        return Ok(None);
      },
      Response::Released => return Ok(None),
    };

    let Some(frame_header) = self
      .context
      .run(async { Ok(decode_frame_header(&mut *body).await?) })
      .await?
    else {
      // The body ended without a trailer. Only a status from the headers can end it cleanly.
      let trailer = header_status.take().unwrap_or_default();
      let status = Status::from_metadata(&trailer);
      self.finish(response, trailer);
      status.into_result()?;
      return Ok(None);
    };

    // An empty frame ends the stream without a status.
    if frame_header.length == 0 {
      self.finish(response, Metadata::new());
      return Ok(None);
    }

    if !frame_header.is_trailer() {
      let payload = self
        .context
        .run(async { Ok(decode_message(&mut *body, frame_header.length).await?) })
        .await?;
      return Ok(Some(MessageCodec::<Reply>::unmarshal(
        &self.options.codec,
        &payload,
      )?));
    }

    let trailer = self
      .context
      .run(async { Ok(decode_trailer(&mut *body, frame_header.length).await?) })
      .await?;
    let status = Status::from_metadata(&trailer);
    self.finish(response, trailer);
    status.into_result()?;
    Ok(None)
  }
}
