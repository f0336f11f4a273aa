// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::Metadata;

#[test]
fn keys_are_lower_cased_and_ordered() {
  let mut metadata = Metadata::new();
  metadata.append("X-B", "1");
  metadata.append("x-a", "2");
  metadata.append("x-b", "3");

  assert_eq!(metadata.keys().collect::<Vec<_>>(), vec!["x-b", "x-a"]);
  assert_eq!(metadata.get_all("X-B"), &["1", "3"]);
  assert_eq!(metadata.get("x-b"), Some("1"));
  assert_eq!(
    metadata.iter().collect::<Vec<_>>(),
    vec![("x-b", "1"), ("x-b", "3"), ("x-a", "2")]
  );
}

#[test]
fn insert_replaces_and_remove_drops() {
  let mut metadata = Metadata::new();
  metadata.append("key", "1");
  metadata.append("key", "2");
  metadata.insert("KEY", "3");
  assert_eq!(metadata.get_all("key"), &["3"]);

  assert_eq!(metadata.remove("key"), Some(vec!["3".to_string()]));
  assert!(metadata.is_empty());
  assert!(metadata.get("key").is_none());
  assert!(metadata.get_all("key").is_empty());
}

#[test]
fn header_block_round_trip() {
  let metadata: Metadata = [
    ("content-type", "application/grpc-web+proto"),
    ("x-grpc-web", "1"),
    ("x-multi", "a"),
    ("x-multi", "b"),
  ]
  .into_iter()
  .collect();

  let block = metadata.to_header_block();
  assert_eq!(
    &block[..],
    b"content-type: application/grpc-web+proto\r\nx-grpc-web: 1\r\nx-multi: a\r\nx-multi: b\r\n"
  );
  assert_eq!(Metadata::parse_header_block(&block), metadata);
}

#[test]
fn header_block_parsing_is_lenient() {
  let metadata = Metadata::parse_header_block(b"Content-Type: text\nno-separator\r\nkey:tight\r\n\r\n");
  assert_eq!(metadata.len(), 1);
  assert_eq!(metadata.get("content-type"), Some("text"));
  assert!(!metadata.contains_key("key"));
}

#[test]
fn values_keep_inner_separators() {
  let metadata = Metadata::parse_header_block(b"grpc-message: a: b\r\n");
  assert_eq!(metadata.get("grpc-message"), Some("a: b"));
}
