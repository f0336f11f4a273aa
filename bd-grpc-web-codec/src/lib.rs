// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./coding_test.rs"]
mod coding_test;

#[cfg(test)]
#[path = "./metadata_test.rs"]
mod metadata_test;

pub mod code;
pub mod message;
pub mod metadata;

pub use code::Code;
pub use message::{Codec, JsonCodec, MessageCodec, ProtoCodec};
pub use metadata::{GRPC_MESSAGE, GRPC_STATUS, Metadata};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("malformed frame: stream ended after {0} of 5 frame header bytes")]
  MalformedFrame(usize),
  #[error("truncated frame: expected {expected} bytes, stream ended after {actual}")]
  Truncated { expected: u32, actual: usize },
  #[error("frame payload of {0} bytes does not fit the 32 bit length prefix")]
  FrameTooLarge(usize),
  #[error("An io error ocurred: {0}")]
  Io(#[from] std::io::Error),
  #[error("protobuf error: {0}")]
  Protobuf(#[from] protobuf::Error),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Flag byte + 4 message size bytes.
pub const FRAME_HEADER_LEN: usize = 5;
// Set in the flag byte of frames carrying the status and trailing metadata.
pub const TRAILER_FLAG: u8 = 0x80;

//
// FrameHeader
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
  pub flags: u8,
  pub length: u32,
}

impl FrameHeader {
  #[must_use]
  pub fn parse(header: [u8; FRAME_HEADER_LEN]) -> Self {
    Self {
      flags: header[0],
      length: u32::from_be_bytes([header[1], header[2], header[3], header[4]]),
    }
  }

  // Only the high bit matters, the remaining bits never turn a data frame into a trailer frame.
  #[must_use]
  pub const fn is_trailer(&self) -> bool {
    self.flags & TRAILER_FLAG != 0
  }
}

//
// Frame
//

// A complete frame read from a response stream. `payload.len()` always equals the length declared
// in the frame header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
  pub is_trailer: bool,
  pub payload: Bytes,
}

impl Frame {
  #[must_use]
  pub fn length(&self) -> usize {
    self.payload.len()
  }

  // Parse a trailer frame payload into metadata. Only meaningful for trailer frames.
  #[must_use]
  pub fn trailer(&self) -> Metadata {
    debug_assert!(self.is_trailer);
    Metadata::parse_header_block(&self.payload)
  }
}

// Converts a serialized message into a gRPC-Web frame: an uncompressed flag byte followed by the
// big endian payload length and the payload itself.
// See https://github.com/grpc/grpc/blob/master/doc/PROTOCOL-WEB.md for the wire format.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
  let length = frame_length(payload.len())?;
  let mut buffer = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
  buffer.put_u8(0); // Compression bit, requests are never compressed.
  buffer.put_u32(length);
  buffer.put_slice(payload);
  log::trace!("encoded frame len={length}");
  Ok(buffer.freeze())
}

// Encodes a trailer frame carrying the given metadata as a header block.
pub fn encode_trailer(trailer: &Metadata) -> Result<Bytes> {
  let block = trailer.to_header_block();
  let length = frame_length(block.len())?;
  let mut buffer = BytesMut::with_capacity(FRAME_HEADER_LEN + block.len());
  buffer.put_u8(TRAILER_FLAG);
  buffer.put_u32(length);
  buffer.put_slice(&block);
  Ok(buffer.freeze())
}

fn frame_length(length: usize) -> Result<u32> {
  u32::try_from(length).map_err(|_| Error::FrameTooLarge(length))
}

// Reads until `buffer` is full or the stream ends, returning the number of bytes read. Partial
// reads are never padded, the caller decides whether a short read is an error.
async fn read_full<R: AsyncRead + Unpin + ?Sized>(
  reader: &mut R,
  buffer: &mut [u8],
) -> Result<usize> {
  let mut read = 0;
  while read < buffer.len() {
    let n = reader.read(&mut buffer[read ..]).await?;
    if n == 0 {
      break;
    }
    read += n;
  }
  Ok(read)
}

// Reads the 5 byte frame header. Returns None if the stream ended cleanly before any header byte
// was read, and MalformedFrame if it ended part way through the header.
pub async fn decode_frame_header<R: AsyncRead + Unpin + ?Sized>(
  reader: &mut R,
) -> Result<Option<FrameHeader>> {
  let mut header = [0; FRAME_HEADER_LEN];
  match read_full(reader, &mut header).await? {
    0 => Ok(None),
    FRAME_HEADER_LEN => {
      let header = FrameHeader::parse(header);
      log::trace!(
        "next frame flags={:#04x} len={}",
        header.flags,
        header.length
      );
      Ok(Some(header))
    },
    read => Err(Error::MalformedFrame(read)),
  }
}

// Reads exactly `length` message bytes.
pub async fn decode_message<R: AsyncRead + Unpin + ?Sized>(
  reader: &mut R,
  length: u32,
) -> Result<Bytes> {
  let mut payload = vec![0; length as usize];
  let read = read_full(reader, &mut payload).await?;
  if read != payload.len() {
    return Err(Error::Truncated {
      expected: length,
      actual: read,
    });
  }
  Ok(payload.into())
}

// Reads `length` bytes of trailer text and parses it into metadata.
pub async fn decode_trailer<R: AsyncRead + Unpin + ?Sized>(
  reader: &mut R,
  length: u32,
) -> Result<Metadata> {
  let payload = decode_message(reader, length).await?;
  Ok(Metadata::parse_header_block(&payload))
}

// Reads a complete frame (header and payload). Returns None on a clean end of stream.
pub async fn decode_frame<R: AsyncRead + Unpin + ?Sized>(
  reader: &mut R,
) -> Result<Option<Frame>> {
  let Some(header) = decode_frame_header(reader).await? else {
    return Ok(None);
  };
  let payload = decode_message(reader, header.length).await?;
  Ok(Some(Frame {
    is_trailer: header.is_trailer(),
    payload,
  }))
}
