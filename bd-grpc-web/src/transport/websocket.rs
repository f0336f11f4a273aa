// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::StreamConnector;
use crate::GRPC_WEBSOCKETS_PROTOCOL;
use crate::error::{Error, Result};
use bd_grpc_web_codec::{Frame, Metadata, decode_frame};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use http::HeaderValue;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::io::StreamReader;

// Prefix of a websocket message carrying one request frame.
const MESSAGE_PREFIX: u8 = 0x00;
// The whole websocket message signalling that the client is done sending.
const END_OF_SEND: u8 = 0x01;

pub type MessageSink = Pin<Box<dyn Sink<Bytes, Error = Error> + Send>>;
pub type MessageStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

struct Writer {
  sink: MessageSink,
  request_header_sent: bool,
  send_closed: bool,
}

impl Writer {
  // Write the request header block if this is the first message on the socket.
  async fn ensure_request_header(&mut self, request_header: &Metadata) -> Result<()> {
    if self.request_header_sent {
      return Ok(());
    }

    log::trace!("writing request header block");
    self.sink.send(request_header.to_header_block()).await?;
    self.request_header_sent = true;
    Ok(())
  }
}

//
// WebSocketTransport
//

// One client or bidi stream carried over a websocket using the grpc-websockets sub-protocol.
//
// Request side: the request header block as the first message, then one message per request frame
// prefixed by 0x00, and finally a single 0x01 message when the client is done sending.
//
// Response side: two leading messages, a placeholder followed by the response header block, then
// a byte stream of regular gRPC-Web frames. Frames are not aligned to websocket messages so the
// messages are stitched back into a byte stream before decoding.
pub struct WebSocketTransport {
  request_header: Metadata,
  writer: Mutex<Writer>,
  reader: Mutex<StreamReader<MessageStream, Bytes>>,
  header: OnceCell<Metadata>,
  released: AtomicBool,
}

impl WebSocketTransport {
  // Wrap the two halves of a websocket. The stream must report an abnormal closure as an io error
  // of kind UnexpectedEof and a normal closure as the end of the stream.
  pub fn new(
    sink: impl Sink<Bytes, Error = Error> + Send + 'static,
    stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static,
    request_header: Metadata,
  ) -> Self {
    let sink: MessageSink = Box::pin(sink);
    let stream: MessageStream = Box::pin(stream);
    Self {
      request_header,
      writer: Mutex::new(Writer {
        sink,
        request_header_sent: false,
        send_closed: false,
      }),
      reader: Mutex::new(StreamReader::new(stream)),
      header: OnceCell::new(),
      released: AtomicBool::new(false),
    }
  }

  // Send one encoded request frame.
  pub async fn send(&self, frame: &[u8]) -> Result<()> {
    let mut writer = self.writer.lock().await;
    if writer.send_closed {
      return Err(Error::StreamClosed);
    }
    if self.is_released() {
      return Err(Error::Closed);
    }
    writer.ensure_request_header(&self.request_header).await?;

    let mut message = BytesMut::with_capacity(1 + frame.len());
    message.put_u8(MESSAGE_PREFIX);
    message.put_slice(frame);
    writer.sink.send(message.freeze()).await
  }

  // Signal the end of the request stream. Calling this more than once is a no-op. The request
  // header block is still written first if nothing was sent yet.
  pub async fn close_send(&self) -> Result<()> {
    let mut writer = self.writer.lock().await;
    if writer.send_closed {
      return Ok(());
    }
    if self.is_released() {
      return Err(Error::Closed);
    }
    writer.ensure_request_header(&self.request_header).await?;

    log::debug!("closing send side of websocket stream");
    writer
      .sink
      .send(Bytes::from_static(&[END_OF_SEND]))
      .await?;
    writer.send_closed = true;
    Ok(())
  }

  // The response header block. The first call reads the two leading response messages, concurrent
  // and later callers share that result.
  pub async fn header(&self) -> Result<Metadata> {
    self
      .header
      .get_or_try_init(|| self.read_preamble())
      .await
      .cloned()
  }

  // The response header if it has already been read.
  #[must_use]
  pub fn cached_header(&self) -> Option<&Metadata> {
    self.header.get()
  }

  async fn read_preamble(&self) -> Result<Metadata> {
    let mut reader = self.reader.lock().await;
    let messages = reader.get_mut();

    // The first message carries nothing of interest.
    next_preamble_message(messages).await?;
    let block = next_preamble_message(messages).await?;

    let header = Metadata::parse_header_block(&block);
    log::debug!("received response header: {header:?}");
    Ok(header)
  }

  // Read the next response frame. Returns None on a normal closure and UnexpectedEof on an abnormal
  // one. The response header is read first if needed.
  pub async fn receive(&self) -> Result<Option<Frame>> {
    if self.is_released() {
      return Err(Error::Closed);
    }
    self.header().await?;

    let mut reader = self.reader.lock().await;
    match decode_frame(&mut *reader).await {
      Err(bd_grpc_web_codec::Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
        Err(Error::UnexpectedEof)
      },
      result => Ok(result?),
    }
  }

  #[must_use]
  pub fn is_released(&self) -> bool {
    self.released.load(Ordering::Acquire)
  }

  // Release the connection. Only the first call has any effect.
  pub async fn close(&self) {
    if self.released.swap(true, Ordering::AcqRel) {
      return;
    }

    log::debug!("releasing websocket connection");
    if let Err(e) = self.writer.lock().await.sink.close().await {
      log::debug!("error closing websocket: {e}");
    }
  }
}

async fn next_preamble_message(messages: &mut MessageStream) -> Result<Bytes> {
  match messages.next().await {
    Some(Ok(message)) => Ok(message),
    Some(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::UnexpectedEof),
    Some(Err(e)) => Err(bd_grpc_web_codec::Error::Io(e).into()),
    None => Err(Error::ProtocolViolation(
      "connection closed before the response header",
    )),
  }
}

//
// WebSocketConnector
//

// Dials ws://<host><method> (wss:// unless insecure) offering the grpc-websockets sub-protocol.
#[derive(Debug)]
pub struct WebSocketConnector {
  host: String,
  insecure: bool,
  handshake_timeout: Duration,
}

impl WebSocketConnector {
  #[must_use]
  pub fn new(host: &str, insecure: bool, handshake_timeout: Duration) -> Self {
    Self {
      host: host.to_string(),
      insecure,
      handshake_timeout,
    }
  }

  fn url(&self, method: &str) -> String {
    let scheme = if self.insecure { "ws" } else { "wss" };
    format!("{scheme}://{}{method}", self.host)
  }
}

#[async_trait::async_trait]
impl StreamConnector for WebSocketConnector {
  async fn connect(&self, method: &str, request_header: Metadata) -> Result<WebSocketTransport> {
    let url = self.url(method);
    let mut request = url.as_str().into_client_request()?;
    request.headers_mut().insert(
      SEC_WEBSOCKET_PROTOCOL,
      HeaderValue::from_static(GRPC_WEBSOCKETS_PROTOCOL),
    );

    log::debug!("dialing websocket: {url}");
    let (socket, _) = match tokio::time::timeout(
      self.handshake_timeout.unsigned_abs(),
      tokio_tungstenite::connect_async(request),
    )
    .await
    {
      Ok(result) => result?,
      Err(_) => return Err(Error::ConnectionTimeout),
    };

    let (sink, stream) = socket.split();
    Ok(WebSocketTransport::new(
      sink
        .sink_map_err(Error::from)
        .with(|message: Bytes| futures::future::ready(Ok::<_, Error>(Message::Binary(message)))),
      into_byte_stream(stream),
      request_header,
    ))
  }
}

// Adapt incoming websocket messages to the byte stream contract of WebSocketTransport.
fn into_byte_stream<S>(messages: S) -> impl Stream<Item = io::Result<Bytes>> + Send
where
  S: Stream<Item = tungstenite::Result<Message>> + Send + Unpin,
{
  futures::stream::unfold(Some(messages), |messages| async move {
    let mut messages = messages?;
    loop {
      let item = match messages.next().await? {
        Ok(Message::Binary(data)) => Ok(data),
        Ok(Message::Text(text)) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
        Ok(Message::Close(frame)) => return close_error(frame.as_ref()).map(|e| (Err(e), None)),
        Err(e) => return read_error(e).map(|e| (Err(e), None)),
      };
      return Some((item, Some(messages)));
    }
  })
}

fn close_error(frame: Option<&CloseFrame>) -> Option<io::Error> {
  match frame.map(|frame| frame.code) {
    None | Some(CloseCode::Normal) => None,
    Some(CloseCode::Abnormal) => Some(io::ErrorKind::UnexpectedEof.into()),
    Some(code) => Some(io::Error::other(format!(
      "websocket closed with code {}",
      u16::from(code)
    ))),
  }
}

fn read_error(error: tungstenite::Error) -> Option<io::Error> {
  match error {
    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => None,
    tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
      Some(io::ErrorKind::UnexpectedEof.into())
    },
    tungstenite::Error::Io(e)
      if matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
      ) =>
    {
      Some(io::ErrorKind::UnexpectedEof.into())
    },
    e => Some(io::Error::other(e)),
  }
}
