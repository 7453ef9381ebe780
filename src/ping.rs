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

//! Pluggable liveness strategies, `§4.4`.
//!
//! A [`PingHandler`] never touches the transport itself — `decide()`
//! is a synchronous, side-effect-free read of the handler's internal
//! clock state that returns what the connection engine should do
//! next. The engine (the only thing that can actually write to the
//! wire under the write permit) carries that decision out. This
//! keeps the three strategies trivially unit-testable without a
//! transport or an executor in sight.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::close::CloseCode;

/// Selects which [`PingHandler`] a [`crate::connection::Connection`]
/// is constructed with (`§6`, "Options: PingMode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMode {
  /// The caller supplies ping payloads explicitly and is
  /// responsible for pacing; the handler only tracks the
  /// pong-timeout clock.
  Manual,
  /// Round-trip latency is measured from a timestamp the handler
  /// embeds in each ping payload.
  LatencyControl,
  /// Like `Manual`, but skips a scheduled ping entirely when there
  /// has been other traffic recently — cheaper on idle-heavy
  /// connections at the cost of a coarser liveness signal.
  BandwidthSaving,
}

/// What [`crate::connection::Connection::ping`] should do, decided
/// by the handler and carried out by the connection.
#[derive(Debug)]
pub enum PingAction {
  /// Activity was recent enough (or no timer condition fired) —
  /// nothing to send this tick.
  Skip,
  /// Send a ping frame with `payload`, acquiring the write permit
  /// with `lock_timeout` (`None` waits indefinitely, `Some(Duration::ZERO)`
  /// degrades to a non-blocking "try" acquire per `§4.4 LatencyControl`).
  Send {
    payload: Vec<u8>,
    lock_timeout: Option<Duration>,
  },
  /// The peer has been silent too long — begin a graceful close.
  InitiateClose { code: CloseCode, reason: &'static str },
  /// The peer has been silent well past any grace period — give up
  /// on the connection outright.
  Dispose,
}

/// Round-trip latency, observable only under [`PingMode::LatencyControl`]
/// (`§6`, "Latency (only valid under LatencyControl)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
  /// No pong has been received yet.
  Unmeasured,
  Measured(Duration),
  /// The peer missed its ping-timeout deadline.
  Infinite,
}

pub trait PingHandler: Send + Sync {
  /// Called on any inbound header receipt (`§4.4`).
  fn notify_activity(&self);
  /// Called when a pong frame is received, with its (already
  /// unmasked) payload.
  fn notify_pong(&self, payload: &[u8]);
  /// Called on an external scheduler tick.
  fn decide(&self) -> PingAction;
  /// Stages a payload for the next `Manual` ping. No-op for the
  /// other two strategies.
  fn stage_payload(&self, _payload: &[u8]) {}
  /// Only meaningful under `LatencyControl`; other strategies report
  /// `Unmeasured` forever.
  fn latency(&self) -> Latency {
    Latency::Unmeasured
  }
  /// Called once when the owning connection is disposed, so a
  /// `LatencyControl` handler can report `Latency::Infinite` from
  /// then on even if disposal didn't come from its own `decide()`.
  fn mark_disposed(&self) {}
}

/// Builds the handler selected by `mode`, applying `ping_interval`/
/// `ping_timeout` the way `§6`'s `Options` does.
pub fn build_handler(
  mode: PingMode,
  ping_interval: Duration,
  ping_timeout: Option<Duration>,
) -> Box<dyn PingHandler> {
  match mode {
    PingMode::Manual => Box::new(ManualPing::new(ping_timeout)),
    PingMode::LatencyControl => Box::new(LatencyControlPing::new(ping_interval, ping_timeout)),
    PingMode::BandwidthSaving => Box::new(BandwidthSavingPing::new(ping_interval, ping_timeout)),
  }
}

pub struct ManualPing {
  ping_timeout: Option<Duration>,
  last_pong: Mutex<Instant>,
  pending_payload: Mutex<Vec<u8>>,
}

impl ManualPing {
  pub fn new(ping_timeout: Option<Duration>) -> Self {
    Self {
      ping_timeout,
      last_pong: Mutex::new(Instant::now()),
      pending_payload: Mutex::new(Vec::new()),
    }
  }
}

impl PingHandler for ManualPing {
  fn notify_activity(&self) {}

  fn notify_pong(&self, _payload: &[u8]) {
    *self.last_pong.lock() = Instant::now();
  }

  fn decide(&self) -> PingAction {
    let now = Instant::now();
    if let Some(timeout) = self.ping_timeout {
      if now.duration_since(*self.last_pong.lock()) > timeout {
        return PingAction::InitiateClose {
          code: CloseCode::GoingAway,
          reason: "Going Away",
        };
      }
    }
    let payload = std::mem::take(&mut *self.pending_payload.lock());
    PingAction::Send {
      payload,
      lock_timeout: None,
    }
  }

  fn stage_payload(&self, payload: &[u8]) {
    *self.pending_payload.lock() = payload.to_vec();
  }
}

pub struct BandwidthSavingPing {
  ping_timeout: Option<Duration>,
  ping_interval: Duration,
  last_activity: Mutex<Instant>,
  last_pong: Mutex<Instant>,
}

impl BandwidthSavingPing {
  pub fn new(ping_interval: Duration, ping_timeout: Option<Duration>) -> Self {
    let now = Instant::now();
    Self {
      ping_timeout,
      ping_interval,
      last_activity: Mutex::new(now),
      last_pong: Mutex::new(now),
    }
  }
}

impl PingHandler for BandwidthSavingPing {
  fn notify_activity(&self) {
    *self.last_activity.lock() = Instant::now();
  }

  fn notify_pong(&self, _payload: &[u8]) {
    *self.last_pong.lock() = Instant::now();
  }

  fn decide(&self) -> PingAction {
    let now = Instant::now();
    if let Some(timeout) = self.ping_timeout {
      if now.duration_since(*self.last_pong.lock()) > timeout {
        return PingAction::InitiateClose {
          code: CloseCode::GoingAway,
          reason: "Going Away",
        };
      }
    }
    if now.duration_since(*self.last_activity.lock()) < self.ping_interval {
      return PingAction::Skip;
    }
    PingAction::Send {
      payload: Vec::new(),
      lock_timeout: None,
    }
  }
}

pub struct LatencyControlPing {
  origin: Instant,
  ping_interval: Duration,
  ping_timeout: Option<Duration>,
  last_activity: Mutex<Instant>,
  // Nanoseconds; -1 means "unmeasured".
  latency_nanos: AtomicI64,
  timed_out: std::sync::atomic::AtomicBool,
}

const LATENCY_UNMEASURED: i64 = -1;

impl LatencyControlPing {
  pub fn new(ping_interval: Duration, ping_timeout: Option<Duration>) -> Self {
    Self {
      origin: Instant::now(),
      ping_interval,
      ping_timeout,
      last_activity: Mutex::new(Instant::now()),
      latency_nanos: AtomicI64::new(LATENCY_UNMEASURED),
      timed_out: std::sync::atomic::AtomicBool::new(false),
    }
  }

  fn elapsed_since_origin(&self, now: Instant) -> u64 {
    now.saturating_duration_since(self.origin).as_nanos() as u64
  }
}

impl PingHandler for LatencyControlPing {
  fn notify_activity(&self) {
    *self.last_activity.lock() = Instant::now();
  }

  fn notify_pong(&self, payload: &[u8]) {
    if payload.len() < 8 {
      return;
    }
    let sent_nanos = u64::from_le_bytes(payload[0..8].try_into().unwrap());
    let now_nanos = self.elapsed_since_origin(Instant::now());
    let rtt_nanos = now_nanos.saturating_sub(sent_nanos);
    self
      .latency_nanos
      .store((rtt_nanos / 2) as i64, Ordering::Release);
  }

  fn decide(&self) -> PingAction {
    let now = Instant::now();
    let since_activity = now.duration_since(*self.last_activity.lock());

    if let Some(timeout) = self.ping_timeout {
      if since_activity > timeout {
        self.timed_out.store(true, Ordering::Release);
        return PingAction::Dispose;
      }
    }

    let payload = self.elapsed_since_origin(now).to_le_bytes().to_vec();
    let lock_timeout = if since_activity < self.ping_interval {
      Some(Duration::ZERO)
    } else {
      None
    };
    PingAction::Send {
      payload,
      lock_timeout,
    }
  }

  fn latency(&self) -> Latency {
    if self.timed_out.load(Ordering::Acquire) {
      return Latency::Infinite;
    }
    match self.latency_nanos.load(Ordering::Acquire) {
      LATENCY_UNMEASURED => Latency::Unmeasured,
      nanos => Latency::Measured(Duration::from_nanos(nanos as u64)),
    }
  }

  /// Disposal that didn't arrive through `decide()`'s own
  /// `PingAction::Dispose` (a caller-initiated `dispose()`, or one
  /// following a protocol/transport error) still must make `latency()`
  /// report `Infinite` from then on, per the trait's contract.
  fn mark_disposed(&self) {
    self.timed_out.store(true, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_sends_staged_payload() {
    let handler = ManualPing::new(None);
    handler.stage_payload(b"hi");
    match handler.decide() {
      PingAction::Send { payload, .. } => assert_eq!(payload, b"hi"),
      other => panic!("expected Send, got {other:?}"),
    }
    // Payload is consumed, not re-sent.
    match handler.decide() {
      PingAction::Send { payload, .. } => assert!(payload.is_empty()),
      other => panic!("expected Send, got {other:?}"),
    }
  }

  #[test]
  fn manual_initiates_close_after_pong_timeout() {
    let handler = ManualPing::new(Some(Duration::from_millis(1)));
    std::thread::sleep(Duration::from_millis(5));
    match handler.decide() {
      PingAction::InitiateClose { code, .. } => assert_eq!(code, CloseCode::GoingAway),
      other => panic!("expected InitiateClose, got {other:?}"),
    }
  }

  #[test]
  fn manual_pong_resets_timer() {
    let handler = ManualPing::new(Some(Duration::from_millis(50)));
    std::thread::sleep(Duration::from_millis(20));
    handler.notify_pong(&[]);
    // Should not have timed out: the pong reset the clock.
    match handler.decide() {
      PingAction::Send { .. } => {}
      other => panic!("expected Send, got {other:?}"),
    }
  }

  #[test]
  fn bandwidth_saving_skips_when_recently_active() {
    let handler = BandwidthSavingPing::new(Duration::from_secs(60), None);
    handler.notify_activity();
    assert!(matches!(handler.decide(), PingAction::Skip));
  }

  #[test]
  fn bandwidth_saving_sends_empty_payload_once_idle() {
    let handler = BandwidthSavingPing::new(Duration::from_millis(1), None);
    std::thread::sleep(Duration::from_millis(5));
    match handler.decide() {
      PingAction::Send { payload, .. } => assert!(payload.is_empty()),
      other => panic!("expected Send, got {other:?}"),
    }
  }

  #[test]
  fn latency_control_disposes_after_timeout() {
    let handler = LatencyControlPing::new(Duration::from_secs(30), Some(Duration::from_millis(1)));
    std::thread::sleep(Duration::from_millis(5));
    assert!(matches!(handler.decide(), PingAction::Dispose));
    assert_eq!(handler.latency(), Latency::Infinite);
  }

  #[test]
  fn latency_control_reports_infinite_after_direct_disposal() {
    let handler = LatencyControlPing::new(Duration::from_secs(60), None);
    let payload = match handler.decide() {
      PingAction::Send { payload, .. } => payload,
      other => panic!("expected Send, got {other:?}"),
    };
    std::thread::sleep(Duration::from_millis(2));
    handler.notify_pong(&payload);
    assert!(matches!(handler.latency(), Latency::Measured(_)));

    // Disposal that never went through decide()'s own PingAction::Dispose
    // (e.g. a caller-initiated dispose(), or one following a protocol
    // error) must still make latency() report Infinite from then on.
    handler.mark_disposed();
    assert_eq!(handler.latency(), Latency::Infinite);
  }

  #[test]
  fn latency_control_embeds_timestamp_and_measures_rtt() {
    let handler = LatencyControlPing::new(Duration::from_millis(0), None);
    let payload = match handler.decide() {
      PingAction::Send { payload, .. } => payload,
      other => panic!("expected Send, got {other:?}"),
    };
    assert_eq!(payload.len(), 8);
    std::thread::sleep(Duration::from_millis(2));
    handler.notify_pong(&payload);
    match handler.latency() {
      Latency::Measured(d) => assert!(d >= Duration::from_micros(500)),
      other => panic!("expected Measured, got {other:?}"),
    }
  }

  #[test]
  fn latency_control_degrades_to_try_lock_within_interval() {
    let handler = LatencyControlPing::new(Duration::from_secs(60), None);
    match handler.decide() {
      PingAction::Send { lock_timeout, .. } => assert_eq!(lock_timeout, Some(Duration::ZERO)),
      other => panic!("expected Send, got {other:?}"),
    }
  }
}
