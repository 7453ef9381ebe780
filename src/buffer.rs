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

//! Buffer lifecycle, `§4.2`.
//!
//! The engine never allocates its working buffers directly — it asks
//! an injected [`BufferPool`] for them and returns them exactly once,
//! at `Disposed`. The control scratch space is pooled as two
//! independently-owned allocations, one per direction ([`RecvBuffers`],
//! [`SendBuffers`]), rather than a single combined block, so the
//! receive path and the send path never contend for the same lock
//! (`§5`: "readers and writers may proceed concurrently because they
//! touch disjoint regions"). See `DESIGN.md` for the reasoning.

use bytes::BytesMut;
use parking_lot::Mutex;

/// `take`/`return` collaborator for pooled byte buffers (`§6`,
/// "Consumed interfaces: BufferPool"). The engine treats this purely
/// as capacity recycling — a pool that is empty or disabled simply
/// falls back to a fresh allocation, it never blocks the caller.
pub trait BufferPool: Send + Sync {
  fn take(&self, size: usize) -> BytesMut;
  fn give_back(&self, buf: BytesMut);
}

/// A bounded, size-classed free list. Good enough for a single
/// process; callers with sharper memory requirements (arena
/// allocators, NUMA-aware pools) supply their own [`BufferPool`].
pub struct FreeListPool {
  // One free list per size class, keyed by the power-of-two bucket
  // the requested size rounds up to.
  buckets: Mutex<Vec<Vec<BytesMut>>>,
  max_per_bucket: usize,
}

const BUCKET_COUNT: usize = 24; // covers up to 2^23 bytes (8 MiB)

impl FreeListPool {
  pub fn new(max_per_bucket: usize) -> Self {
    Self {
      buckets: Mutex::new((0..BUCKET_COUNT).map(|_| Vec::new()).collect()),
      max_per_bucket,
    }
  }

  fn bucket_for(size: usize) -> usize {
    let size = size.max(1);
    (usize::BITS - (size - 1).leading_zeros()) as usize
  }
}

impl Default for FreeListPool {
  fn default() -> Self {
    Self::new(16)
  }
}

impl BufferPool for FreeListPool {
  fn take(&self, size: usize) -> BytesMut {
    let bucket = Self::bucket_for(size).min(BUCKET_COUNT - 1);
    let mut buckets = self.buckets.lock();
    if let Some(mut buf) = buckets[bucket].pop() {
      buf.clear();
      buf.reserve(size);
      return buf;
    }
    BytesMut::with_capacity(size)
  }

  fn give_back(&self, mut buf: BytesMut) {
    buf.clear();
    let bucket = Self::bucket_for(buf.capacity()).min(BUCKET_COUNT - 1);
    let mut buckets = self.buckets.lock();
    if buckets[bucket].len() < self.max_per_bucket {
      buckets[bucket].push(buf);
    }
  }
}

/// Per-direction control-frame payload slot: 16 bytes of headroom
/// over the 125-byte protocol maximum (`16 + 128` per slot).
const CONTROL_SLOT_LEN: usize = 16 + 128;
const CLOSE_CODE_LEN: usize = 2;
const HEADER_SCRATCH_LEN: usize = 16;

const RECV_HEADER_SCRATCH: (usize, usize) = (0, HEADER_SCRATCH_LEN);
const RECV_IN_PONG: (usize, usize) = (RECV_HEADER_SCRATCH.1, RECV_HEADER_SCRATCH.1 + CONTROL_SLOT_LEN);
const RECV_IN_PING: (usize, usize) = (RECV_IN_PONG.1, RECV_IN_PONG.1 + CONTROL_SLOT_LEN);
const RECV_IN_CLOSE: (usize, usize) = (RECV_IN_PING.1, RECV_IN_PING.1 + CONTROL_SLOT_LEN);
const RECV_TOTAL_LEN: usize = RECV_IN_CLOSE.1;

const SEND_OUT_PONG: (usize, usize) = (0, CONTROL_SLOT_LEN);
const SEND_OUT_PING: (usize, usize) = (SEND_OUT_PONG.1, SEND_OUT_PONG.1 + CONTROL_SLOT_LEN);
const SEND_OUT_CLOSE: (usize, usize) = (SEND_OUT_PING.1, SEND_OUT_PING.1 + CONTROL_SLOT_LEN + CLOSE_CODE_LEN);
const SEND_CTRL_TOTAL_LEN: usize = SEND_OUT_CLOSE.1;

/// Total control-scratch bytes across both allocations combined
/// (`RECV_TOTAL_LEN` + `SEND_CTRL_TOTAL_LEN`), for sizing tests that
/// check the byte budget against the per-slot layout above.
pub const COMBINED_CONTROL_SCRATCH_LEN: usize = HEADER_SCRATCH_LEN + CONTROL_SLOT_LEN * 4 + CLOSE_CODE_LEN;

/// The receive-side control scratch: header bytes plus the inbound
/// ping/pong/close payload slots. Touched only while the `reading`
/// CAS flag is held, so [`crate::connection::Connection`] keeps
/// exactly one of these behind one lock.
pub struct RecvBuffers {
  buf: BytesMut,
}

impl RecvBuffers {
  fn acquire(pool: &dyn BufferPool) -> Self {
    let mut buf = pool.take(RECV_TOTAL_LEN);
    buf.resize(RECV_TOTAL_LEN, 0);
    Self { buf }
  }

  pub fn header_scratch(&mut self) -> &mut [u8] {
    &mut self.buf[RECV_HEADER_SCRATCH.0..RECV_HEADER_SCRATCH.1]
  }

  pub fn in_pong(&mut self) -> &mut [u8] {
    &mut self.buf[RECV_IN_PONG.0..RECV_IN_PONG.1]
  }

  pub fn in_ping(&mut self) -> &mut [u8] {
    &mut self.buf[RECV_IN_PING.0..RECV_IN_PING.1]
  }

  pub fn in_close(&mut self) -> &mut [u8] {
    &mut self.buf[RECV_IN_CLOSE.0..RECV_IN_CLOSE.1]
  }

  fn release(self, pool: &dyn BufferPool) {
    pool.give_back(self.buf);
  }
}

/// The send-side control scratch (outbound ping/pong/close payload
/// staging) plus the send buffer itself, which reserves a
/// [`crate::frame::HEADER_PREFIX_LEN`]-byte prefix so
/// [`crate::frame::emit_into`] never has to shift a payload to make
/// room for its header (`§4.2`, `§9`). Touched only while the
/// `writing` CAS flag / write permit is held.
pub struct SendBuffers {
  ctrl: BytesMut,
  pub send: BytesMut,
}

impl SendBuffers {
  fn acquire(pool: &dyn BufferPool, send_buffer_size: usize) -> Self {
    let mut ctrl = pool.take(SEND_CTRL_TOTAL_LEN);
    ctrl.resize(SEND_CTRL_TOTAL_LEN, 0);

    let mut send = pool.take(crate::frame::HEADER_PREFIX_LEN + send_buffer_size);
    send.resize(crate::frame::HEADER_PREFIX_LEN + send_buffer_size, 0);

    Self { ctrl, send }
  }

  pub fn out_pong(&mut self) -> &mut [u8] {
    &mut self.ctrl[SEND_OUT_PONG.0..SEND_OUT_PONG.1]
  }

  pub fn out_ping(&mut self) -> &mut [u8] {
    &mut self.ctrl[SEND_OUT_PING.0..SEND_OUT_PING.1]
  }

  pub fn out_close(&mut self) -> &mut [u8] {
    &mut self.ctrl[SEND_OUT_CLOSE.0..SEND_OUT_CLOSE.1]
  }

  fn release(self, pool: &dyn BufferPool) {
    pool.give_back(self.ctrl);
    pool.give_back(self.send);
  }
}

/// The full set of pooled buffers a [`crate::connection::Connection`]
/// owns, split across the two locks its reader and writer paths use
/// independently (`§3`, `§4.2`).
pub struct ConnectionBuffers {
  pub recv: RecvBuffers,
  pub send: SendBuffers,
}

impl ConnectionBuffers {
  pub fn acquire(pool: &dyn BufferPool, send_buffer_size: usize) -> Self {
    Self {
      recv: RecvBuffers::acquire(pool),
      send: SendBuffers::acquire(pool, send_buffer_size),
    }
  }

  /// Returns every pooled allocation to `pool`. The caller is
  /// expected to call this exactly once, from `dispose()`, behind
  /// the connection's own CAS-guarded dispose-once check.
  pub fn release(self, pool: &dyn BufferPool) {
    self.recv.release(pool);
    self.send.release(pool);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn combined_control_scratch_matches_budget_formula() {
    assert_eq!(COMBINED_CONTROL_SCRATCH_LEN, 16 + (16 + 128) * 4 + 2);
  }

  #[test]
  fn recv_slots_are_disjoint_and_contiguous() {
    let ranges = [RECV_HEADER_SCRATCH, RECV_IN_PONG, RECV_IN_PING, RECV_IN_CLOSE];
    let mut cursor = 0;
    for (start, end) in ranges {
      assert_eq!(start, cursor);
      assert!(end > start);
      cursor = end;
    }
    assert_eq!(cursor, RECV_TOTAL_LEN);
  }

  #[test]
  fn send_ctrl_slots_are_disjoint_and_contiguous() {
    let ranges = [SEND_OUT_PONG, SEND_OUT_PING, SEND_OUT_CLOSE];
    let mut cursor = 0;
    for (start, end) in ranges {
      assert_eq!(start, cursor);
      assert!(end > start);
      cursor = end;
    }
    assert_eq!(cursor, SEND_CTRL_TOTAL_LEN);
  }

  #[test]
  fn free_list_pool_round_trips_a_buffer() {
    let pool = FreeListPool::default();
    let buf = pool.take(64);
    assert!(buf.capacity() >= 64);
    pool.give_back(buf);
    let buf2 = pool.take(64);
    assert!(buf2.capacity() >= 64);
  }

  #[test]
  fn send_buffer_reserves_header_prefix() {
    let pool = FreeListPool::default();
    let buffers = ConnectionBuffers::acquire(&pool, 4096);
    assert_eq!(buffers.send.send.len(), crate::frame::HEADER_PREFIX_LEN + 4096);
  }

  #[test]
  fn control_slots_hold_a_full_control_frame_payload() {
    let pool = FreeListPool::default();
    let mut buffers = ConnectionBuffers::acquire(&pool, 4096);
    assert!(buffers.recv.in_ping().len() >= 125);
    assert!(buffers.send.out_pong().len() >= 125);
  }
}
