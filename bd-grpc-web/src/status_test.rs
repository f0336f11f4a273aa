// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::context::{CallCancelTrigger, CallContext};
use crate::options::DialOptions;
use crate::service::{RpcShape, ServiceMethod};
use crate::transport::{from_header_map, to_header_map};
use crate::{Error, Status, request_metadata};
use assert_matches::assert_matches;
use bd_grpc_web_codec::{Code, Metadata};
use rstest::rstest;
use time::Duration;
use time::ext::NumericalDuration;

#[ctor::ctor]
fn test_global_init() {
  bd_test_helpers::test_global_init();
}

fn metadata(entries: &[(&str, &str)]) -> Metadata {
  entries.iter().copied().collect()
}

#[test]
fn status_from_trailer() {
  assert_eq!(
    Status::from_metadata(&metadata(&[("grpc-status", "0")])),
    Status::ok()
  );
  assert_eq!(
    Status::from_metadata(&metadata(&[
      ("grpc-status", "5"),
      ("grpc-message", "missing"),
    ])),
    Status::new(Code::NotFound, "missing")
  );
}

#[test]
fn status_message_is_percent_decoded() {
  assert_eq!(
    Status::from_metadata(&metadata(&[
      ("grpc-status", "3"),
      ("grpc-message", "bad%20request%3A%20%E2%9C%93"),
    ]))
    .message,
    "bad request: \u{2713}"
  );

  // Not valid UTF-8 once decoded, kept verbatim.
  assert_eq!(
    Status::from_metadata(&metadata(&[
      ("grpc-status", "3"),
      ("grpc-message", "broken%FF"),
    ]))
    .message,
    "broken%FF"
  );
}

#[test]
fn missing_status_is_unknown() {
  let status = Status::from_metadata(&metadata(&[("content-type", "application/grpc-web")]));
  assert_eq!(status.code, Code::Unknown);
  assert_eq!(
    status.message,
    "response closed without grpc-status (headers only)"
  );
  assert!(!status.is_ok());
}

#[test]
fn invalid_status_is_unknown() {
  let status = Status::from_metadata(&metadata(&[("grpc-status", "ok")]));
  assert_eq!(status.code, Code::Unknown);
  assert!(status.message.contains("ok"));
}

#[test]
fn status_from_headers_only_when_present() {
  assert!(Status::from_headers_if_present(&metadata(&[("x-other", "1")])).is_none());
  assert_eq!(
    Status::from_headers_if_present(&metadata(&[("grpc-status", "14")])),
    Some(Status::new(Code::Unavailable, ""))
  );
}

#[test]
fn status_display() {
  assert_eq!(
    Status::new(Code::NotFound, "missing").to_string(),
    "code: NotFound, message: missing"
  );
  assert_eq!(
    Status::new(Code::Internal, "").to_string(),
    "code: Internal, message: <none>"
  );
}

#[test]
fn status_into_result() {
  assert!(Status::ok().into_result().is_ok());
  assert_matches!(
    Status::new(Code::Aborted, "conflict").into_result(),
    Err(Error::Grpc(status)) => assert_eq!(status.code, Code::Aborted)
  );
}

#[rstest]
#[case(Error::Cancelled, Code::Cancelled)]
#[case(Error::DeadlineExceeded, Code::DeadlineExceeded)]
#[case(Error::ProtocolViolation("bad frame"), Code::Internal)]
#[case(Error::InvalidMetadata("bad key".to_string()), Code::Internal)]
#[case(Error::ContractViolation("twice"), Code::FailedPrecondition)]
#[case(Error::StreamClosed, Code::FailedPrecondition)]
#[case(Error::UnexpectedEof, Code::Unavailable)]
#[case(Error::ConnectionTimeout, Code::Unavailable)]
#[case(Error::Closed, Code::Unavailable)]
#[case(Status::new(Code::ResourceExhausted, "slow down").into(), Code::ResourceExhausted)]
fn error_status(#[case] error: Error, #[case] code: Code) {
  assert_eq!(error.status().code, code);
}

#[test]
fn remote_status_only_for_peer_errors() {
  assert!(Error::UnexpectedEof.remote_status().is_none());
  let error: Error = Status::new(Code::NotFound, "missing").into();
  assert_eq!(error.remote_status().unwrap().message, "missing");
}

#[test]
fn request_metadata_adds_grpc_web_headers() {
  let outgoing = metadata(&[
    ("Authorization", "Bearer token"),
    ("content-type", "text/plain"),
  ]);
  let request = request_metadata(&outgoing, "proto");

  assert_eq!(request.get("authorization"), Some("Bearer token"));
  assert_eq!(
    request.get_all("content-type"),
    &["application/grpc-web+proto".to_string()]
  );
  assert_eq!(request.get("x-grpc-web"), Some("1"));
  // The caller's metadata is untouched.
  assert_eq!(outgoing.get("content-type"), Some("text/plain"));
}

#[test]
fn header_map_conversion() {
  let mut source = metadata(&[("x-multi", "a"), ("x-single", "b")]);
  source.append("x-multi", "c");

  let headers = to_header_map(&source).unwrap();
  assert_eq!(
    headers
      .get_all("x-multi")
      .iter()
      .map(|value| value.to_str().unwrap())
      .collect::<Vec<_>>(),
    vec!["a", "c"]
  );

  let round_trip = from_header_map(&headers);
  assert_eq!(round_trip.get_all("x-multi"), &["a".to_string(), "c".to_string()]);
  assert_eq!(round_trip.get("x-single"), Some("b"));
}

#[test]
fn invalid_metadata_is_rejected() {
  assert_matches!(
    to_header_map(&metadata(&[("bad key", "value")])),
    Err(Error::InvalidMetadata(_))
  );
  assert_matches!(
    to_header_map(&metadata(&[("x-key", "line\nbreak")])),
    Err(Error::InvalidMetadata(_))
  );
}

#[test]
fn service_method_path() {
  let method = ServiceMethod::new("helloworld.Greeter", "SayHello");
  assert_eq!(method.full_path(), "/helloworld.Greeter/SayHello");
  assert_eq!(method.service_name(), "helloworld.Greeter");
  assert_eq!(method.method_name(), "SayHello");

  assert!(!RpcShape::Unary.uses_websocket());
  assert!(!RpcShape::ServerStreaming.uses_websocket());
  assert!(RpcShape::ClientStreaming.uses_websocket());
  assert!(RpcShape::BidiStreaming.uses_websocket());
}

#[test]
fn dial_options_from_config() {
  let defaults = DialOptions::default();
  assert!(!defaults.insecure);
  assert_eq!(defaults.connect_timeout, 10.seconds());
  assert_eq!(defaults.websocket_handshake_timeout, 45.seconds());

  let options: DialOptions =
    serde_json::from_str(r#"{"insecure": true, "connect_timeout": 2.5}"#).unwrap();
  assert!(options.insecure);
  assert_eq!(options.connect_timeout, Duration::milliseconds(2500));
  assert_eq!(options.websocket_handshake_timeout, 45.seconds());

  assert!(serde_json::from_str::<DialOptions>(r#"{"connect_timeout": -1}"#).is_err());
}

#[tokio::test(start_paused = true)]
async fn context_deadline() {
  let context = CallContext::background().with_timeout(5.seconds());
  assert_matches!(
    context.run(std::future::pending::<crate::Result<()>>()).await,
    Err(Error::DeadlineExceeded)
  );

  // The earlier deadline wins.
  let deadline = context.deadline().unwrap();
  let context = context.with_timeout(1.hours());
  assert_eq!(context.deadline(), Some(deadline));
}

#[tokio::test]
async fn context_cancellation() {
  let trigger = CallCancelTrigger::new();
  let context = trigger.make_context();
  assert!(!context.is_cancelled());
  assert_eq!(context.run(async { Ok(1) }).await.unwrap(), 1);

  trigger.cancel();
  assert!(context.is_cancelled());
  assert_matches!(
    context.run(async { Ok(1) }).await,
    Err(Error::Cancelled)
  );

  // A context without a trigger is never cancelled.
  assert!(!CallContext::background().is_cancelled());
}

#[tokio::test]
async fn dropped_trigger_does_not_cancel() {
  let context = CallCancelTrigger::new().make_context();
  assert_eq!(context.run(async { Ok("done") }).await.unwrap(), "done");
}
