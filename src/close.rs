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

//! The four-state closing handshake, expressed as a single atomic
//! integer with compare-and-swap transitions (`§4.5`).

use std::sync::atomic::{AtomicU8, Ordering};

/// A close status code, RFC 6455 §7.4.
///
/// Only the handful of codes this crate emits itself are named;
/// anything else round-trips through [`CloseCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
  Normal,
  GoingAway,
  ProtocolError,
  Unsupported,
  NoStatusReceived,
  Abnormal,
  InvalidPayload,
  PolicyViolation,
  MessageTooBig,
  MandatoryExtension,
  InternalError,
  ServiceRestart,
  TryAgainLater,
  TlsHandshake,
  Other(u16),
}

impl CloseCode {
  pub fn as_u16(self) -> u16 {
    match self {
      CloseCode::Normal => 1000,
      CloseCode::GoingAway => 1001,
      CloseCode::ProtocolError => 1002,
      CloseCode::Unsupported => 1003,
      CloseCode::NoStatusReceived => 1005,
      CloseCode::Abnormal => 1006,
      CloseCode::InvalidPayload => 1007,
      CloseCode::PolicyViolation => 1008,
      CloseCode::MessageTooBig => 1009,
      CloseCode::MandatoryExtension => 1010,
      CloseCode::InternalError => 1011,
      CloseCode::ServiceRestart => 1012,
      CloseCode::TryAgainLater => 1013,
      CloseCode::TlsHandshake => 1015,
      CloseCode::Other(code) => code,
    }
  }
}

impl From<u16> for CloseCode {
  fn from(code: u16) -> Self {
    match code {
      1000 => CloseCode::Normal,
      1001 => CloseCode::GoingAway,
      1002 => CloseCode::ProtocolError,
      1003 => CloseCode::Unsupported,
      1005 => CloseCode::NoStatusReceived,
      1006 => CloseCode::Abnormal,
      1007 => CloseCode::InvalidPayload,
      1008 => CloseCode::PolicyViolation,
      1009 => CloseCode::MessageTooBig,
      1010 => CloseCode::MandatoryExtension,
      1011 => CloseCode::InternalError,
      1012 => CloseCode::ServiceRestart,
      1013 => CloseCode::TryAgainLater,
      1015 => CloseCode::TlsHandshake,
      other => CloseCode::Other(other),
    }
  }
}

/// The close code and (if present) UTF-8 reason carried by a close
/// frame. Only the code is actually interpreted by the engine; the
/// reason is opaque payload the caller may inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
  pub code: CloseCode,
  pub message: Option<String>,
}

impl CloseReason {
  pub fn new(code: CloseCode, message: Option<String>) -> Self {
    Self { code, message }
  }
}

/// `Open → {CloseSent, CloseReceived} → Closed → Disposed`.
///
/// Represented as `u8` values so the whole machine fits in one
/// [`AtomicU8`] and every transition is a single compare-and-swap.
/// State is monotonic: the numeric values are chosen so "monotonic
/// non-decreasing" in `§8` is just `new >= old` once past `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseState {
  Open = 0,
  CloseSent = 1,
  CloseReceived = 2,
  Closed = 3,
  Disposed = 4,
}

impl CloseState {
  fn from_u8(v: u8) -> Self {
    match v {
      0 => CloseState::Open,
      1 => CloseState::CloseSent,
      2 => CloseState::CloseReceived,
      3 => CloseState::Closed,
      4 => CloseState::Disposed,
      _ => unreachable!("close state is only ever written through CloseStateCell"),
    }
  }

  /// `§4.5`: sending is allowed from `Open` (nothing sent yet) or
  /// `CloseReceived` (peer closed first, we still owe our close
  /// frame).
  pub fn can_send(self) -> bool {
    matches!(self, CloseState::Open | CloseState::CloseReceived)
  }

  /// `§4.5`: receiving is allowed from `Open` or `CloseSent` (we
  /// closed first, still waiting on the peer's close frame).
  pub fn can_receive(self) -> bool {
    matches!(self, CloseState::Open | CloseState::CloseSent)
  }

  pub fn is_closed(self) -> bool {
    matches!(self, CloseState::Closed | CloseState::Disposed)
  }
}

/// The atomic cell backing [`CloseState`]. All transitions are CAS
/// loops; there is no lock.
#[derive(Debug)]
pub struct CloseStateCell(AtomicU8);

impl CloseStateCell {
  pub fn new() -> Self {
    Self(AtomicU8::new(CloseState::Open as u8))
  }

  pub fn load(&self) -> CloseState {
    CloseState::from_u8(self.0.load(Ordering::Acquire))
  }

  /// Local `close()`: `Open -> CloseSent` or `CloseReceived -> Closed`.
  /// Returns the resulting state if a transition fired, `None` if
  /// neither precondition held (caller should treat this as a no-op).
  pub fn begin_local_close(&self) -> Option<CloseState> {
    if self
      .0
      .compare_exchange(
        CloseState::Open as u8,
        CloseState::CloseSent as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
    {
      return Some(CloseState::CloseSent);
    }
    if self
      .0
      .compare_exchange(
        CloseState::CloseReceived as u8,
        CloseState::Closed as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
    {
      return Some(CloseState::Closed);
    }
    None
  }

  /// Peer close frame arrives: `Open -> CloseReceived` or
  /// `CloseSent -> Closed`.
  pub fn on_peer_close(&self) -> Option<CloseState> {
    if self
      .0
      .compare_exchange(
        CloseState::Open as u8,
        CloseState::CloseReceived as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
    {
      return Some(CloseState::CloseReceived);
    }
    if self
      .0
      .compare_exchange(
        CloseState::CloseSent as u8,
        CloseState::Closed as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
    {
      return Some(CloseState::Closed);
    }
    None
  }

  /// `any -> Disposed`. Returns `true` the first time this fires;
  /// `dispose()` must be idempotent, so subsequent calls return
  /// `false` without touching anything.
  pub fn dispose(&self) -> bool {
    self.0.swap(CloseState::Disposed as u8, Ordering::AcqRel) != CloseState::Disposed as u8
  }
}

impl Default for CloseStateCell {
  fn default() -> Self {
    Self::new()
  }
}
