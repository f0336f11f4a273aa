// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::error::{Error, Result};
use bd_grpc_web_codec::Metadata;
use std::future::Future;
use time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

//
// CallContext
//

// Per call state threaded through every blocking operation of a call or stream: the outgoing
// metadata, an optional deadline, and an optional cancellation signal.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
  metadata: Metadata,
  deadline: Option<Instant>,
  cancel: Option<watch::Receiver<bool>>,
}

impl CallContext {
  // A context with no metadata, no deadline and no cancellation.
  #[must_use]
  pub fn background() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_metadata(mut self, metadata: Metadata) -> Self {
    self.metadata = metadata;
    self
  }

  // Bound the call by a timeout starting now. An earlier existing deadline wins.
  #[must_use]
  pub fn with_timeout(self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout.unsigned_abs())
  }

  #[must_use]
  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
    self
  }

  #[must_use]
  pub const fn metadata(&self) -> &Metadata {
    &self.metadata
  }

  #[must_use]
  pub const fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
  }

  // Run a call operation, abandoning it if the context is cancelled or its deadline passes first.
  pub async fn run<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
    let cancelled = async {
      let Some(cancel) = &self.cancel else {
        return std::future::pending().await;
      };
      let mut cancel = cancel.clone();
      // A dropped trigger can no longer cancel.
      if cancel.wait_for(|cancelled| *cancelled).await.map(|_| ()).is_err() {
        std::future::pending::<()>().await;
      }
    };
    let expired = async {
      match self.deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
      }
    };

    tokio::select! {
      biased;
      () = cancelled => {
        log::debug!("call cancelled");
        Err(Error::Cancelled)
      },
      () = expired => {
        log::debug!("call deadline exceeded");
        Err(Error::DeadlineExceeded)
      },
      result = future => result,
    }
  }
}

//
// CallCancelTrigger
//

// Owns the cancellation signal for any number of call contexts.
#[derive(Debug)]
pub struct CallCancelTrigger {
  sender: watch::Sender<bool>,
}

impl Default for CallCancelTrigger {
  fn default() -> Self {
    Self::new()
  }
}

impl CallCancelTrigger {
  #[must_use]
  pub fn new() -> Self {
    let (sender, _) = watch::channel(false);
    Self { sender }
  }

  // Make a new context that is cancelled when this trigger fires.
  #[must_use]
  pub fn make_context(&self) -> CallContext {
    CallContext {
      cancel: Some(self.sender.subscribe()),
      ..CallContext::default()
    }
  }

  pub fn cancel(&self) {
    self.sender.send_replace(true);
  }
}
