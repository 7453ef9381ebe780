// Copyright 2026 duplex-ws contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection tunables (`§6`, "Options"), plus the ambient
//! `Config`-shaped validation every connection-layer crate in this
//! corpus does once at construction rather than on every call.

use std::time::Duration;

pub use crate::ping::PingMode;

/// Which side of the handshake this connection is: the client masks
/// its outbound frames, the server does not (`§3`, "mask-outbound").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Client,
  Server,
}

impl Role {
  pub fn masks_outbound(self) -> bool {
    matches!(self, Role::Client)
  }
}

/// Snapshot of everything a [`crate::connection::Connection`] needs
/// besides the transport itself.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
  pub role: Role,
  pub ping_mode: PingMode,
  pub ping_interval: Duration,
  /// `None` means "infinite" — `§6`'s "PingTimeout (negative = infinite)"
  /// translated to an `Option` rather than a sentinel duration.
  pub ping_timeout: Option<Duration>,
  pub send_buffer_size: usize,
}

/// Raised when an option combination cannot produce a working
/// connection, caught once at [`crate::connection::Connection::new`]
/// rather than re-validated on every send.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
  #[error("send_buffer_size must be at least {min}, got {actual}")]
  SendBufferTooSmall { min: usize, actual: usize },
}

/// The smallest a send buffer may be: a header-sized prefix plus
/// enough body to hold an unfragmented control frame.
const MIN_SEND_BUFFER_SIZE: usize = 125;

impl ConnectionOptions {
  pub fn validate(&self) -> Result<(), OptionsError> {
    if self.send_buffer_size < MIN_SEND_BUFFER_SIZE {
      return Err(OptionsError::SendBufferTooSmall {
        min: MIN_SEND_BUFFER_SIZE,
        actual: self.send_buffer_size,
      });
    }
    Ok(())
  }

  pub fn client() -> Self {
    Self {
      role: Role::Client,
      ..Self::default()
    }
  }

  pub fn server() -> Self {
    Self {
      role: Role::Server,
      ..Self::default()
    }
  }

  pub fn with_ping_mode(mut self, mode: PingMode) -> Self {
    self.ping_mode = mode;
    self
  }

  pub fn with_ping_interval(mut self, interval: Duration) -> Self {
    self.ping_interval = interval;
    self
  }

  pub fn with_ping_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.ping_timeout = timeout;
    self
  }

  pub fn with_send_buffer_size(mut self, size: usize) -> Self {
    self.send_buffer_size = size;
    self
  }
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self {
      role: Role::Server,
      ping_mode: PingMode::LatencyControl,
      ping_interval: Duration::from_secs(20),
      ping_timeout: Some(Duration::from_secs(60)),
      send_buffer_size: 4096,
    }
  }
}

/// Flags modifying a single `send_frame` call (`§4.6`). Bitwise-
/// composable the way the corpus's own frame-send options are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFrameOptions {
  /// Skip write-permit acquisition because the caller already holds
  /// it. Nothing in this crate holds the permit across a nested send
  /// today (the error paths that used to need this release the
  /// permit before recursing instead), but the flag stays part of the
  /// public surface for callers building their own send sequences on
  /// top of [`crate::connection::Connection`].
  pub no_lock: bool,
  /// Send even if the close state would normally forbid it (used by
  /// the close handshake's own outbound frame, and the automatic
  /// pong reply).
  pub ignore_close: bool,
  /// Swallow I/O errors and report success/failure as a `bool`
  /// instead of propagating a [`crate::error::WebSocketError`].
  pub no_errors: bool,
}

impl SendFrameOptions {
  pub const NONE: Self = Self {
    no_lock: false,
    ignore_close: false,
    no_errors: false,
  };

  pub const CLOSE_HANDSHAKE: Self = Self {
    no_lock: false,
    ignore_close: true,
    no_errors: true,
  };

  /// The automatic pong reply to an inbound ping (`§4.6`: "emit a pong
  /// frame echoing the payload with NoErrors"). Unlike the close
  /// handshake's own frame, this does **not** ignore close state: a
  /// ping answered while `!can_send()` (e.g. `CloseSent`, where a peer
  /// ping can still legitimately arrive since `can_receive()` holds)
  /// should be dropped like any other send, not forced through.
  pub const PING_REPLY: Self = Self {
    no_lock: false,
    ignore_close: false,
    no_errors: true,
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_options_validate() {
    assert!(ConnectionOptions::default().validate().is_ok());
  }

  #[test]
  fn undersized_send_buffer_is_rejected() {
    let opts = ConnectionOptions::default().with_send_buffer_size(8);
    assert!(matches!(
      opts.validate(),
      Err(OptionsError::SendBufferTooSmall { .. })
    ));
  }

  #[test]
  fn role_masking() {
    assert!(Role::Client.masks_outbound());
    assert!(!Role::Server.masks_outbound());
  }
}
