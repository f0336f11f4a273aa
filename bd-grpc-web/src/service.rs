// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//
// ServiceMethod
//

// A gRPC service method, addressed on the wire as /<service>/<method>.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceMethod {
  service: String,
  method: String,
  full_path: String,
}

impl ServiceMethod {
  #[must_use]
  pub fn new(service_name: &str, method_name: &str) -> Self {
    Self {
      service: service_name.to_string(),
      method: method_name.to_string(),
      full_path: format!("/{service_name}/{method_name}"),
    }
  }

  #[must_use]
  pub fn service_name(&self) -> &str {
    &self.service
  }

  #[must_use]
  pub fn method_name(&self) -> &str {
    &self.method
  }

  #[must_use]
  pub fn full_path(&self) -> &str {
    &self.full_path
  }
}

//
// RpcShape
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcShape {
  Unary,
  ServerStreaming,
  ClientStreaming,
  BidiStreaming,
}

impl RpcShape {
  // Whether the shape needs the websocket transport. Only client originated streams do, a server
  // stream reads its response off a plain HTTP body.
  #[must_use]
  pub const fn uses_websocket(self) -> bool {
    matches!(self, Self::ClientStreaming | Self::BidiStreaming)
  }
}
