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
use crate::transport::{UnaryTransport, from_header_map, to_header_map};
use bd_grpc_web_codec::{MessageCodec, Metadata, decode_frame, encode};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Response metadata observed during a unary exchange, whether or not it succeeded.
#[derive(Default)]
pub(crate) struct ExchangeMetadata {
  pub(crate) header: Option<Metadata>,
  pub(crate) trailer: Option<Metadata>,
}

impl ExchangeMetadata {
  fn header<C>(&mut self, options: &CallOptions<C>, header: &Metadata) {
    options.record_header(header);
    self.header = Some(header.clone());
  }

  fn trailer<C>(&mut self, options: &CallOptions<C>, trailer: &Metadata) {
    options.record_trailer(trailer);
    self.trailer = Some(trailer.clone());
  }
}

// Perform one unary call: POST a single request frame, then expect exactly one data frame followed
// by a trailer frame. A non-OK grpc-status in the response headers fails the call before the body
// is read.
pub(crate) async fn unary_exchange<C, Request, Response>(
  transport: &dyn UnaryTransport,
  context: &CallContext,
  method: &str,
  request: &Request,
  options: &CallOptions<C>,
  observed: &mut ExchangeMetadata,
) -> Result<Response>
where
  C: MessageCodec<Request> + MessageCodec<Response>,
{
  let body = encode(&MessageCodec::<Request>::marshal(
    &options.codec,
    request,
  )?)?;
  let headers = to_header_map(&request_metadata(
    context.metadata(),
    options.subtype(),
  ))?;

  log::debug!("invoking unary method {method}");
  let mut response = context
    .run(transport.send(method, headers, body))
    .await?;

  let header = from_header_map(&response.headers);
  observed.header(options, &header);

  if let Some(status) = Status::from_headers_if_present(&header)
    && !status.is_ok()
  {
    log::debug!("trailers-only response for {method}: {status}");
    observed.trailer(options, &header);
    return Err(status.into());
  }

  let first = context
    .run(async { Ok(decode_frame(&mut response.body).await?) })
    .await?;
  let Some(frame) = first else {
    return Err(Error::ProtocolViolation(
      "response ended before the response message",
    ));
  };

  if frame.is_trailer {
    let trailer = frame.trailer();
    observed.trailer(options, &trailer);
    Status::from_metadata(&trailer).into_result()?;
    return Err(Error::ProtocolViolation(
      "OK status without a response message",
    ));
  }

  let response_message = MessageCodec::<Response>::unmarshal(&options.codec, &frame.payload)?;

  let second = context
    .run(async { Ok(decode_frame(&mut response.body).await?) })
    .await?;
  match second {
    Some(frame) if frame.is_trailer => {
      let trailer = frame.trailer();
      observed.trailer(options, &trailer);
      Status::from_metadata(&trailer).into_result()?;
      Ok(response_message)
    },
    Some(_) => Err(Error::ProtocolViolation(
      "more than one message in a unary response",
    )),
    None => Err(Error::ProtocolViolation(
      "response ended before the trailer",
    )),
  }
}

//
// UnaryStream
//

// A unary call driven through the stream surface: exactly one send_msg followed by one recv_msg.
// The exchange happens on send_msg and its outcome is reported by the first recv_msg.
pub struct UnaryStream<C, Request, Response> {
  transport: Arc<dyn UnaryTransport>,
  context: CallContext,
  method: String,
  options: CallOptions<C>,
  sent: AtomicBool,
  header: HeaderSlot,
  outcome: Mutex<Option<Result<Response>>>,
  trailer: TrailerState,
  _types: PhantomData<fn(Request)>,
}

impl<C, Request, Response> UnaryStream<C, Request, Response> {
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
      outcome: Mutex::new(None),
      trailer: TrailerState::default(),
      _types: PhantomData,
    }
  }
}

#[async_trait::async_trait]
impl<C, Request, Response> GrpcStream<Request, Response> for UnaryStream<C, Request, Response>
where
  C: MessageCodec<Request> + MessageCodec<Response>,
  Request: Sync,
  Response: Send,
{
  fn shape(&self) -> RpcShape {
    RpcShape::Unary
  }

  fn context(&self) -> &CallContext {
    &self.context
  }

  async fn header(&self) -> Result<Metadata> {
    if !self.sent.load(Ordering::Acquire) {
      return Err(Error::ContractViolation(
        "header requested before send_msg on a unary stream",
      ));
    }
    Ok(self.header.wait().await)
  }

  fn trailer(&self) -> Metadata {
    self.trailer.get()
  }

  async fn close_send(&self) -> Result<()> {
    Ok(())
  }

  async fn send_msg(&self, message: &Request) -> Result<()> {
    if self.sent.swap(true, Ordering::AcqRel) {
      return Err(Error::ContractViolation(
        "send_msg called more than once on a unary stream",
      ));
    }

    let mut observed = ExchangeMetadata::default();
    let outcome = unary_exchange(
      self.transport.as_ref(),
      &self.context,
      &self.method,
      message,
      &self.options,
      &mut observed,
    )
    .await;

    *self.outcome.lock() = Some(outcome);
    self.trailer.finish(observed.trailer.unwrap_or_default());
    self.header.publish(observed.header.unwrap_or_default());
    Ok(())
  }

  async fn recv_msg(&self) -> Result<Option<Response>> {
    if !self.sent.load(Ordering::Acquire) {
      return Err(Error::ContractViolation(
        "recv_msg called before send_msg on a unary stream",
      ));
    }
    // The outcome is stored before the header is published.
    self.header.wait().await;
    self
      .outcome
      .lock()
      .take()
      .map_or(Ok(None), |outcome| outcome.map(Some))
  }
}
