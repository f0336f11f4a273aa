// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod grpc_web_server;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

const DEFAULT_FILTER_RULES: &str = "info";

// Installs logging for a test binary. Records emitted through the log facade are bridged into the
// tracing subscriber. Safe to call more than once.
pub fn test_global_init() {
  // Gate ANSI on whether BD_LOG_ANSI is set so CI output stays readable.
  let stderr = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_ansi(std::env::var("BD_LOG_ANSI").is_ok())
    .with_line_number(true)
    .with_thread_ids(true)
    .compact();

  let filter = EnvFilter::new(
    std::env::var("RUST_LOG")
      .as_deref()
      .unwrap_or(DEFAULT_FILTER_RULES),
  );

  if Registry::default()
    .with(filter)
    .with(stderr)
    .try_init()
    .is_err()
  {
    log::debug!("test logging already initialized");
  }
}
