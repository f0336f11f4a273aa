// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use bytes::{BufMut, Bytes, BytesMut};

pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";

const HEADER_SEPARATOR: &str = ": ";

//
// Metadata
//

// An ordered multi-map of lower-cased keys to ordered value lists. Keys keep the order in which
// they were first inserted, values keep the order in which they were appended. This is used for
// request metadata, response headers and trailers alike.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
  entries: Vec<(String, Vec<String>)>,
}

impl Metadata {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  // Append a value to the key, creating the key if needed.
  pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
    let key = key.as_ref().to_ascii_lowercase();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some((_, values)) => values.push(value),
      None => self.entries.push((key, vec![value])),
    }
  }

  // Replace all values of the key with a single value.
  pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
    let key = key.as_ref().to_ascii_lowercase();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some((_, values)) => *values = vec![value],
      None => self.entries.push((key, vec![value])),
    }
  }

  pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
    let key = key.to_ascii_lowercase();
    let index = self.entries.iter().position(|(k, _)| *k == key)?;
    Some(self.entries.remove(index).1)
  }

  // All values for a key, empty if the key is not present. Lookup is case insensitive.
  #[must_use]
  pub fn get_all(&self, key: &str) -> &[String] {
    self
      .entries
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(key))
      .map_or(&[], |(_, values)| values.as_slice())
  }

  // The first value for a key, which is the significant one for single valued keys.
  #[must_use]
  pub fn get(&self, key: &str) -> Option<&str> {
    self.get_all(key).first().map(String::as_str)
  }

  #[must_use]
  pub fn contains_key(&self, key: &str) -> bool {
    !self.get_all(key).is_empty()
  }

  // Number of distinct keys.
  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(k, _)| k.as_str())
  }

  // Iterate over every (key, value) pair, flattening multi-valued keys in order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .entries
      .iter()
      .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
  }

  pub fn extend(&mut self, other: &Self) {
    for (key, value) in other.iter() {
      self.append(key, value);
    }
  }

  // Parse an HTTP header like text block made of `key: value` lines. Lines are terminated by CRLF
  // (a bare LF is tolerated). Lines without the `: ` separator are skipped.
  #[must_use]
  pub fn parse_header_block(block: &[u8]) -> Self {
    let mut metadata = Self::new();
    for line in String::from_utf8_lossy(block).split('\n') {
      let line = line.strip_suffix('\r').unwrap_or(line);
      let Some((key, value)) = line.split_once(HEADER_SEPARATOR) else {
        if !line.is_empty() {
          log::trace!("skipping unparseable header line: {line:?}");
        }
        continue;
      };
      metadata.append(key.trim(), value);
    }
    metadata
  }

  // Serialize as a header block, one `key: value\r\n` line per value.
  #[must_use]
  pub fn to_header_block(&self) -> Bytes {
    let mut buffer = BytesMut::new();
    for (key, value) in self.iter() {
      buffer.put_slice(key.as_bytes());
      buffer.put_slice(HEADER_SEPARATOR.as_bytes());
      buffer.put_slice(value.as_bytes());
      buffer.put_slice(b"\r\n");
    }
    buffer.freeze()
  }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    let mut metadata = Self::new();
    for (key, value) in iter {
      metadata.append(key, value);
    }
    metadata
  }
}
