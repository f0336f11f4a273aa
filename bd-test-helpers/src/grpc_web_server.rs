// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bd_grpc_web_codec::{Metadata, encode, encode_trailer};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const GRPC_WEBSOCKETS_PROTOCOL: &str = "grpc-websockets";

// Starts serving the router on an ephemeral local port, returning the bound address.
pub async fn start_server(router: Router) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let local_address = listener.local_addr().unwrap();
  let server = axum::serve(listener, router.into_make_service());
  tokio::spawn(async { server.await.unwrap() });
  local_address
}

#[must_use]
pub fn data_frame(payload: &[u8]) -> Bytes {
  encode(payload).unwrap()
}

#[must_use]
pub fn trailer_frame(trailer: &[(&str, &str)]) -> Bytes {
  encode_trailer(&trailer.iter().copied().collect()).unwrap()
}

// Concatenates frames into a single response body.
#[must_use]
pub fn body(frames: &[Bytes]) -> Bytes {
  let mut body = BytesMut::new();
  for frame in frames {
    body.extend_from_slice(frame);
  }
  body.freeze()
}

//
// ScriptedResponse
//

// A canned HTTP response returned by a unary test route.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
  pub status: StatusCode,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl ScriptedResponse {
  #[must_use]
  pub fn ok(body: Bytes) -> Self {
    Self {
      status: StatusCode::OK,
      headers: vec![(
        "content-type".to_string(),
        "application/grpc-web+proto".to_string(),
      )],
      body,
    }
  }

  #[must_use]
  pub fn with_header(mut self, key: &str, value: &str) -> Self {
    self.headers.push((key.to_string(), value.to_string()));
    self
  }

  #[must_use]
  pub const fn with_status(mut self, status: StatusCode) -> Self {
    self.status = status;
    self
  }
}

impl IntoResponse for ScriptedResponse {
  fn into_response(self) -> Response {
    let mut builder = Response::builder().status(self.status);
    for (key, value) in &self.headers {
      builder = builder.header(key, value);
    }
    builder.body(Body::from(self.body)).unwrap()
  }
}

type UnaryHandler = Arc<dyn Fn(HeaderMap, Bytes) -> ScriptedResponse + Send + Sync>;

// A POST route that hands the request headers and body to the handler and returns its scripted
// response.
pub fn unary_route(
  path: &str,
  handler: impl Fn(HeaderMap, Bytes) -> ScriptedResponse + Send + Sync + 'static,
) -> Router {
  let handler: UnaryHandler = Arc::new(handler);
  Router::new().route(
    path,
    post(move |headers: HeaderMap, body: Bytes| {
      let handler = handler.clone();
      async move { handler(headers, body) }
    }),
  )
}

// A WebSocket route speaking the grpc-websockets sub-protocol. Each accepted connection is handed
// to the handler as a WebSocketPeer.
pub fn websocket_route<F, Fut>(path: &str, handler: F) -> Router
where
  F: Fn(WebSocketPeer) -> Fut + Clone + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Router::new().route(
    path,
    get(move |ws: WebSocketUpgrade| {
      let handler = handler.clone();
      async move {
        ws.protocols([GRPC_WEBSOCKETS_PROTOCOL])
          .on_upgrade(move |socket| handler(WebSocketPeer { socket }))
      }
    }),
  )
}

//
// ClientMessage
//

#[derive(Debug, PartialEq, Eq)]
pub enum ClientMessage {
  // The payload of a 0x00 prefixed message, i.e. one encoded request frame.
  Frame(Bytes),
  EndOfSend,
  Closed,
}

//
// WebSocketPeer
//

// The server side of a grpc-websockets connection. Dropping the peer closes the socket without a
// close frame, which clients observe as an abnormal closure.
pub struct WebSocketPeer {
  socket: WebSocket,
}

impl WebSocketPeer {
  async fn next_binary(&mut self) -> Option<Bytes> {
    loop {
      match self.socket.recv().await? {
        Ok(Message::Binary(bytes)) => return Some(bytes),
        Ok(Message::Close(_)) | Err(_) => return None,
        Ok(_) => {},
      }
    }
  }

  // Reads the request header block sent before the first request message.
  pub async fn recv_request_header(&mut self) -> Metadata {
    let block = self.next_binary().await.expect("request header block");
    Metadata::parse_header_block(&block)
  }

  pub async fn recv_client_message(&mut self) -> ClientMessage {
    let Some(message) = self.next_binary().await else {
      return ClientMessage::Closed;
    };
    match message.first() {
      Some(0x00) => ClientMessage::Frame(message.slice(1 ..)),
      Some(0x01) if message.len() == 1 => ClientMessage::EndOfSend,
      _ => panic!("unexpected client message: {message:?}"),
    }
  }

  // Sends the two leading response messages: a placeholder followed by the response header block.
  pub async fn send_preamble(&mut self, header: &[(&str, &str)]) {
    self.send(Bytes::new()).await;
    let header: Metadata = header.iter().copied().collect();
    self.send(header.to_header_block()).await;
  }

  pub async fn send(&mut self, bytes: Bytes) {
    self.socket.send(Message::Binary(bytes)).await.unwrap();
  }

  pub async fn send_message(&mut self, payload: &[u8]) {
    self.send(data_frame(payload)).await;
  }

  pub async fn send_trailer(&mut self, trailer: &[(&str, &str)]) {
    self.send(trailer_frame(trailer)).await;
  }

  pub async fn close_normally(mut self) {
    let _ignored = self
      .socket
      .send(Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static(""),
      })))
      .await;
    // Wait for the client to acknowledge so the close frame is not lost.
    while let Some(Ok(message)) = self.socket.recv().await {
      if matches!(message, Message::Close(_)) {
        break;
      }
    }
  }
}
