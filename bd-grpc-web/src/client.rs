// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::context::CallContext;
use crate::error::Result;
use crate::options::{CallOptions, DialOptions};
use crate::request_metadata;
use crate::service::RpcShape;
use crate::stream::GrpcStream;
use crate::stream::bidi::BidiStream;
use crate::stream::client::ClientStream;
use crate::stream::server::ServerStream;
use crate::stream::unary::{ExchangeMetadata, UnaryStream, unary_exchange};
use crate::transport::http_client::HttpTransport;
use crate::transport::websocket::WebSocketConnector;
use crate::transport::{StreamConnector, UnaryTransport, to_header_map};
use bd_grpc_web_codec::MessageCodec;
use std::sync::Arc;

//
// Client
//

// A gRPC-Web client for one host. Unary and server streaming calls go over HTTP, client and bidi
// streams each get their own websocket.
#[derive(Clone)]
pub struct Client {
  unary: Arc<dyn UnaryTransport>,
  connector: Arc<dyn StreamConnector>,
}

impl Client {
  // Create a client for host[:port] using hyper for HTTP and tungstenite for websockets.
  pub fn new(host: &str, options: &DialOptions) -> anyhow::Result<Self> {
    let unary: Arc<dyn UnaryTransport> = if options.insecure {
      Arc::new(HttpTransport::new_http(host, options.connect_timeout)?)
    } else {
      Arc::new(HttpTransport::new_https(host, options.connect_timeout)?)
    };

    Ok(Self::with_transports(
      unary,
      Arc::new(WebSocketConnector::new(
        host,
        options.insecure,
        options.websocket_handshake_timeout,
      )),
    ))
  }

  #[must_use]
  pub fn with_transports(
    unary: Arc<dyn UnaryTransport>,
    connector: Arc<dyn StreamConnector>,
  ) -> Self {
    Self { unary, connector }
  }

  // Perform a unary call.
  pub async fn invoke<C, Request, Response>(
    &self,
    context: &CallContext,
    method: &str,
    request: &Request,
    options: &CallOptions<C>,
  ) -> Result<Response>
  where
    C: MessageCodec<Request> + MessageCodec<Response>,
  {
    unary_exchange(
      self.unary.as_ref(),
      context,
      method,
      request,
      options,
      &mut ExchangeMetadata::default(),
    )
    .await
  }

  // Open a stream of any shape behind the common stream surface.
  pub async fn new_stream<C, Request, Response>(
    &self,
    context: &CallContext,
    method: &str,
    shape: RpcShape,
    options: CallOptions<C>,
  ) -> Result<Box<dyn GrpcStream<Request, Response>>>
  where
    C: MessageCodec<Request> + MessageCodec<Response> + 'static,
    Request: Sync + 'static,
    Response: Send + 'static,
  {
    let stream: Box<dyn GrpcStream<Request, Response>> = match shape {
      RpcShape::Unary => Box::new(self.new_unary_stream(context, method, options)),
      RpcShape::ServerStreaming => Box::new(self.new_server_stream(context, method, options)),
      RpcShape::ClientStreaming => {
        Box::new(self.new_client_stream(context, method, options).await?)
      },
      RpcShape::BidiStreaming => Box::new(self.new_bidi_stream(context, method, options).await?),
    };
    Ok(stream)
  }

  #[must_use]
  pub fn new_unary_stream<C, Request, Response>(
    &self,
    context: &CallContext,
    method: &str,
    options: CallOptions<C>,
  ) -> UnaryStream<C, Request, Response> {
    UnaryStream::new(self.unary.clone(), context.clone(), method, options)
  }

  // Nothing is sent until the single send_msg.
  #[must_use]
  pub fn new_server_stream<C, Request, Response>(
    &self,
    context: &CallContext,
    method: &str,
    options: CallOptions<C>,
  ) -> ServerStream<C, Request, Response> {
    ServerStream::new(self.unary.clone(), context.clone(), method, options)
  }

  // Dial the websocket for a client stream. The request header block is fixed here and written
  // with the first message.
  pub async fn new_client_stream<C, Request, Response>(
    &self,
    context: &CallContext,
    method: &str,
    options: CallOptions<C>,
  ) -> Result<ClientStream<C, Request, Response>>
  where
    C: MessageCodec<Request> + MessageCodec<Response>,
  {
    let request_header = request_metadata(context.metadata(), options.subtype());
    // Reject metadata that would not survive as header lines.
    to_header_map(&request_header)?;

    log::debug!("opening websocket stream {method}");
    let transport = context
      .run(self.connector.connect(method, request_header))
      .await?;
    Ok(ClientStream::new(transport, context.clone(), options))
  }

  pub async fn new_bidi_stream<C, Request, Response>(
    &self,
    context: &CallContext,
    method: &str,
    options: CallOptions<C>,
  ) -> Result<BidiStream<C, Request, Response>>
  where
    C: MessageCodec<Request> + MessageCodec<Response>,
  {
    Ok(BidiStream::new(
      self.new_client_stream(context, method, options).await?,
    ))
  }
}
