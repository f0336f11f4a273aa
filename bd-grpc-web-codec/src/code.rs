// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//
// Code
//

// The canonical gRPC status codes. Values that cannot be mapped resolve to Unknown.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum Code {
  Ok,
  Cancelled,
  Unknown,
  InvalidArgument,
  DeadlineExceeded,
  NotFound,
  AlreadyExists,
  PermissionDenied,
  ResourceExhausted,
  FailedPrecondition,
  Aborted,
  OutOfRange,
  Unimplemented,
  Internal,
  Unavailable,
  DataLoss,
  Unauthenticated,
}

impl Code {
  // Convert to an int via https://grpc.github.io/grpc/core/md_doc_statuscodes.html.
  #[must_use]
  pub const fn to_int(&self) -> i32 {
    match self {
      Self::Ok => 0,
      Self::Cancelled => 1,
      Self::Unknown => 2,
      Self::InvalidArgument => 3,
      Self::DeadlineExceeded => 4,
      Self::NotFound => 5,
      Self::AlreadyExists => 6,
      Self::PermissionDenied => 7,
      Self::ResourceExhausted => 8,
      Self::FailedPrecondition => 9,
      Self::Aborted => 10,
      Self::OutOfRange => 11,
      Self::Unimplemented => 12,
      Self::Internal => 13,
      Self::Unavailable => 14,
      Self::DataLoss => 15,
      Self::Unauthenticated => 16,
    }
  }

  #[must_use]
  pub const fn from_int(code: i32) -> Self {
    match code {
      0 => Self::Ok,
      1 => Self::Cancelled,
      3 => Self::InvalidArgument,
      4 => Self::DeadlineExceeded,
      5 => Self::NotFound,
      6 => Self::AlreadyExists,
      7 => Self::PermissionDenied,
      8 => Self::ResourceExhausted,
      9 => Self::FailedPrecondition,
      10 => Self::Aborted,
      11 => Self::OutOfRange,
      12 => Self::Unimplemented,
      13 => Self::Internal,
      14 => Self::Unavailable,
      15 => Self::DataLoss,
      16 => Self::Unauthenticated,
      _ => Self::Unknown,
    }
  }

  // Parse the decimal form carried in the grpc-status header. Returns None if the value is not a
  // number at all so that callers can report the raw value.
  #[must_use]
  pub fn parse(status: &str) -> Option<Self> {
    status.trim().parse::<u32>().ok().map(|code| {
      i32::try_from(code).map_or(Self::Unknown, Self::from_int)
    })
  }

  // Convert from a string via https://grpc.github.io/grpc/core/md_doc_statuscodes.html.
  #[must_use]
  pub fn from_string(status: &str) -> Self {
    Self::parse(status).unwrap_or(Self::Unknown)
  }
}

impl std::fmt::Display for Code {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Debug::fmt(self, f)
  }
}
