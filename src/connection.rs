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

//! The connection engine, `§4.6` — the orchestrator that ties the
//! frame codec, buffer layout, transport adapter, ping handler and
//! close state machine together into one full-duplex WebSocket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn, Span};

use crate::buffer::{BufferPool, ConnectionBuffers, RecvBuffers, SendBuffers};
use crate::close::{CloseCode, CloseReason, CloseState, CloseStateCell};
use crate::error::{ProtocolError, StateError, TransportError, WebSocketError};
use crate::frame::{self, FrameHeader, OpCode, HEADER_PREFIX_LEN};
use crate::mask;
use crate::options::{ConnectionOptions, OptionsError, SendFrameOptions};
use crate::ping::{self, Latency, PingAction, PingHandler, PingMode};
use crate::transport::Transport;

enum FillOutcome {
  Full,
  Eof { filled: usize },
}

/// An RAII drop guard that restores a CAS flag to `false`, used by
/// both [`Connection::await_header`] and [`Connection::begin_write`]
/// so the flag is released on every return path, including early
/// returns on error (`§5`, "at most one concurrent reader/writer").
struct CasGuard<'a>(&'a AtomicBool);

impl Drop for CasGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// The full-duplex WebSocket connection engine, `§3` "Connection".
///
/// Every public method takes `&self`: the reader and writer paths
/// run concurrently from different tasks in the common case (a
/// background task draining inbound frames while the caller sends),
/// so exclusivity is enforced with the `reading`/`writing` CAS flags
/// and the write permit rather than with `&mut self`.
pub struct Connection<T: Transport> {
  transport: T,
  pool: Arc<dyn BufferPool>,
  options: ConnectionOptions,
  mask_outbound: bool,

  recv_buffers: AsyncMutex<Option<RecvBuffers>>,
  send_buffers: AsyncMutex<Option<SendBuffers>>,

  write_permit: Semaphore,
  reading: AtomicBool,
  writing: AtomicBool,
  /// Tracks whether a fragmented data message (FIN=0) is in progress,
  /// so a fresh `Text`/`Binary` header while one is open, or a
  /// `Continuation` header while none is open, is rejected as a
  /// protocol violation rather than silently accepted.
  fragment_active: AtomicBool,

  close_state: CloseStateCell,
  current_header: SyncMutex<Option<FrameHeader>>,
  close_reason: SyncMutex<Option<CloseReason>>,

  ping_handler: Box<dyn PingHandler>,

  /// Opaque extension/subprotocol bytes, set once at construction and
  /// never interpreted — the "reserved extension bits... carried
  /// through" invariant (`§3`) extended to a small passthrough slot
  /// for whatever the HTTP Upgrade handshake negotiated upstream.
  extensions: Bytes,

  span: Span,
}

impl<T: Transport> Connection<T> {
  /// Builds a connection around an already-open transport, `§3`
  /// "Lifecycle: constructed around an already-open transport."
  pub fn new(
    transport: T,
    pool: Arc<dyn BufferPool>,
    options: ConnectionOptions,
  ) -> Result<Self, OptionsError> {
    options.validate()?;

    let buffers = ConnectionBuffers::acquire(pool.as_ref(), options.send_buffer_size);
    let mask_outbound = options.role.masks_outbound();
    let ping_handler = ping::build_handler(options.ping_mode, options.ping_interval, options.ping_timeout);
    let span = tracing::info_span!("websocket_connection", role = ?options.role, ping_mode = ?options.ping_mode);

    Ok(Self {
      transport,
      pool,
      options,
      mask_outbound,
      recv_buffers: AsyncMutex::new(Some(buffers.recv)),
      send_buffers: AsyncMutex::new(Some(buffers.send)),
      write_permit: Semaphore::new(1),
      reading: AtomicBool::new(false),
      writing: AtomicBool::new(false),
      fragment_active: AtomicBool::new(false),
      close_state: CloseStateCell::new(),
      current_header: SyncMutex::new(None),
      close_reason: SyncMutex::new(None),
      ping_handler,
      extensions: Bytes::new(),
      span,
    })
  }

  /// Attaches opaque extension/subprotocol bytes the caller
  /// negotiated during the HTTP Upgrade (out of scope for this
  /// engine, `§1`). Stored but never interpreted.
  pub fn with_extensions(mut self, extensions: impl Into<Bytes>) -> Self {
    self.extensions = extensions.into();
    self
  }

  pub fn extensions(&self) -> &[u8] {
    &self.extensions
  }

  pub fn options(&self) -> &ConnectionOptions {
    &self.options
  }

  // ---------------------------------------------------------------
  // Observable properties, `§6` "Exposed interfaces"
  // ---------------------------------------------------------------

  pub fn current_header(&self) -> Option<FrameHeader> {
    *self.current_header.lock()
  }

  pub fn close_reason(&self) -> Option<CloseReason> {
    self.close_reason.lock().clone()
  }

  pub fn can_send(&self) -> bool {
    self.close_state.load().can_send()
  }

  pub fn can_receive(&self) -> bool {
    self.close_state.load().can_receive()
  }

  pub fn is_closed(&self) -> bool {
    self.close_state.load().is_closed()
  }

  /// Round-trip latency, only tracked under [`PingMode::LatencyControl`]
  /// (`§6`).
  pub fn latency(&self) -> Result<Latency, WebSocketError> {
    if self.options.ping_mode != PingMode::LatencyControl {
      return Err(StateError::LatencyNotTracked.into());
    }
    Ok(self.ping_handler.latency())
  }

  // ---------------------------------------------------------------
  // Receive path, `§4.6`
  // ---------------------------------------------------------------

  /// Advances the receive side to the start of the next
  /// caller-visible data frame. Returns `Ok(true)` once
  /// [`Connection::current_header`] names a data frame ready for
  /// [`Connection::receive`], `Ok(false)` if the transport ended
  /// cleanly at a frame boundary with nothing more to read.
  #[instrument(skip_all, parent = &self.span)]
  pub async fn await_header(&self, cancel: &CancellationToken) -> Result<bool, WebSocketError> {
    self.dispose_header_if_finished();
    if let Some(header) = *self.current_header.lock() {
      if header.remaining != 0 {
        return Err(StateError::ConcurrentRead.into());
      }
    }

    if self.reading.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
      return Err(StateError::ConcurrentRead.into());
    }
    let _guard = CasGuard(&self.reading);

    self.await_header_inner(cancel).await
  }

  async fn await_header_inner(&self, cancel: &CancellationToken) -> Result<bool, WebSocketError> {
    let mut recv_guard = self.recv_buffers.lock().await;
    let recv = match recv_guard.as_mut() {
      Some(recv) => recv,
      None => return Err(StateError::Disposed.into()),
    };

    loop {
      let mut first_two = [0u8; 2];
      match self.fill_exact(&mut first_two, cancel).await {
        Ok(FillOutcome::Full) => {}
        Ok(FillOutcome::Eof { filled: 0 }) => return Ok(false),
        Ok(FillOutcome::Eof { .. }) => {
          return Err(self.fail_read(TransportError::UnexpectedEof.into(), cancel).await);
        }
        Err(e) => return Err(self.fail_read(e.into(), cancel).await),
      }

      let total_len = frame::header_length(first_two);
      {
        let scratch = recv.header_scratch();
        scratch[0..2].copy_from_slice(&first_two);
      }
      if total_len > 2 {
        let scratch = recv.header_scratch();
        match self.fill_exact(&mut scratch[2..total_len], cancel).await {
          Ok(FillOutcome::Full) => {}
          Ok(FillOutcome::Eof { .. }) => {
            return Err(self.fail_read(TransportError::UnexpectedEof.into(), cancel).await);
          }
          Err(e) => return Err(self.fail_read(e.into(), cancel).await),
        }
      }

      let header = match frame::parse(&recv.header_scratch()[..total_len]) {
        Ok(header) => header,
        Err(e) => return Err(self.fail_read(e.into(), cancel).await),
      };

      self.ping_handler.notify_activity();

      if header.opcode.is_control() {
        if let Err(e) = self.process_control(recv, header, cancel).await {
          return Err(self.fail_read(e, cancel).await);
        }
        continue;
      }

      if let Err(e) = self.check_fragmentation_sequence(header.opcode, header.fin) {
        return Err(self.fail_read(e.into(), cancel).await);
      }

      trace!(opcode = ?header.opcode, len = header.payload_len, "data header ready");
      *self.current_header.lock() = Some(header);
      return Ok(true);
    }
  }

  fn check_fragmentation_sequence(&self, opcode: OpCode, fin: bool) -> Result<(), ProtocolError> {
    let fragment_active = self.fragment_active.load(Ordering::Acquire);
    match (opcode, fragment_active) {
      (OpCode::Continuation, false) => return Err(ProtocolError::UnexpectedContinuation),
      (OpCode::Continuation, true) => {}
      (_, true) => return Err(ProtocolError::FragmentedMessageInProgress),
      (_, false) => {}
    }
    self.fragment_active.store(!fin, Ordering::Release);
    Ok(())
  }

  /// Reads `dst.len()` bytes (clamped to the current header's
  /// remaining count) and unmasks in place, `§4.6`.
  pub async fn receive(&self, dst: &mut [u8], cancel: &CancellationToken) -> Result<usize, WebSocketError> {
    let header = match *self.current_header.lock() {
      Some(header) if header.opcode.is_data() => header,
      _ => return Err(StateError::CannotReceive.into()),
    };

    if header.remaining == 0 || dst.is_empty() {
      return Ok(0);
    }

    let max = (header.remaining as usize).min(dst.len());
    let n = match self.transport.read(&mut dst[..max], cancel).await {
      Ok(n) => n,
      Err(e) => return Err(self.fail_receive(e.into(), cancel).await),
    };
    if n == 0 {
      return Err(self.fail_receive(TransportError::UnexpectedEof.into(), cancel).await);
    }

    if let Some(key) = header.mask_key {
      let stream_pos = (header.payload_len as i64 - header.remaining) as u64;
      mask::apply_mask(&mut dst[..n], key, stream_pos);
    }

    let mut updated = header;
    updated.remaining -= n as i64;
    if updated.remaining < 0 {
      debug_assert!(false, "remaining byte count went negative");
      return Err(StateError::NegativeRemaining.into());
    }
    *self.current_header.lock() = Some(updated);
    self.dispose_header_if_finished();
    Ok(n)
  }

  /// `§4.6`: clears `CurrentHeader` once its payload has been fully
  /// delivered to the caller.
  pub fn dispose_header_if_finished(&self) {
    let mut guard = self.current_header.lock();
    if let Some(header) = *guard {
      if header.remaining == 0 {
        *guard = None;
      } else {
        debug_assert!(header.remaining > 0, "remaining byte count went negative");
      }
    }
  }

  async fn fill_exact(&self, buf: &mut [u8], cancel: &CancellationToken) -> Result<FillOutcome, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
      let n = self.transport.read(&mut buf[filled..], cancel).await?;
      if n == 0 {
        return Ok(FillOutcome::Eof { filled });
      }
      filled += n;
    }
    Ok(FillOutcome::Full)
  }

  // ---------------------------------------------------------------
  // Control-frame handling, `§4.6`
  // ---------------------------------------------------------------

  async fn process_control(
    &self,
    recv: &mut RecvBuffers,
    header: FrameHeader,
    cancel: &CancellationToken,
  ) -> Result<(), WebSocketError> {
    let len = header.payload_len as usize;
    debug_assert!(len <= 125);

    match header.opcode {
      OpCode::Close => {
        if len > 0 {
          let slot = &mut recv.in_close()[..len];
          match self.fill_exact(slot, cancel).await {
            Ok(FillOutcome::Full) => {}
            Ok(FillOutcome::Eof { .. }) => return Err(TransportError::UnexpectedEof.into()),
            Err(e) => return Err(e.into()),
          }
          if let Some(key) = header.mask_key {
            mask::apply_mask(slot, key, 0);
          }
        }

        let (code, message) = if len >= 2 {
          let payload = &recv.in_close()[..len];
          let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
          let message = if len > 2 {
            std::str::from_utf8(&payload[2..]).ok().map(str::to_owned)
          } else {
            None
          };
          (code, message)
        } else {
          (CloseCode::Normal, None)
        };

        debug!(?code, "close frame received");
        *self.close_reason.lock() = Some(CloseReason::new(code, message));
        if let Some(CloseState::Closed) = self.close_state.on_peer_close() {
          let _ = self.transport.close().await;
        }
      }

      OpCode::Ping => {
        let mut stack = [0u8; 125];
        if len > 0 {
          let slot = &mut recv.in_ping()[..len];
          match self.fill_exact(slot, cancel).await {
            Ok(FillOutcome::Full) => {}
            Ok(FillOutcome::Eof { .. }) => return Err(TransportError::UnexpectedEof.into()),
            Err(e) => return Err(e.into()),
          }
          if let Some(key) = header.mask_key {
            mask::apply_mask(slot, key, 0);
          }
          stack[..len].copy_from_slice(slot);
        }
        let _ = self
          .send_control_frame(OpCode::Pong, &stack[..len], SendFrameOptions::PING_REPLY, None, cancel)
          .await;
      }

      OpCode::Pong => {
        if len > 0 {
          let slot = &mut recv.in_pong()[..len];
          match self.fill_exact(slot, cancel).await {
            Ok(FillOutcome::Full) => {}
            Ok(FillOutcome::Eof { .. }) => return Err(TransportError::UnexpectedEof.into()),
            Err(e) => return Err(e.into()),
          }
          if let Some(key) = header.mask_key {
            mask::apply_mask(slot, key, 0);
          }
          self.ping_handler.notify_pong(slot);
        } else {
          self.ping_handler.notify_pong(&[]);
        }
      }

      data => return Err(ProtocolError::UnexpectedDataOpCode(data).into()),
    }

    Ok(())
  }

  // ---------------------------------------------------------------
  // Send path, `§4.6`
  // ---------------------------------------------------------------

  fn begin_write(&self) -> Result<CasGuard<'_>, WebSocketError> {
    if self.writing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
      return Err(StateError::ConcurrentWrite.into());
    }
    Ok(CasGuard(&self.writing))
  }

  fn choose_mask_key(&self) -> Option<[u8; 4]> {
    if !self.mask_outbound {
      return None;
    }
    loop {
      let key: u32 = rand::random();
      if key != 0 {
        return Some(key.to_be_bytes());
      }
    }
  }

  /// Emits `header` right-aligned into the 16-byte prefix immediately
  /// before `slot[16..]`, masking the payload already staged there in
  /// place. Returns the byte range within `slot` that is ready to
  /// write to the wire (`§4.1`, `§9`: no payload copy).
  fn prepare_frame(slot: &mut [u8], opcode: OpCode, fin: bool, payload_len: usize, mask_key: Option<[u8; 4]>) -> std::ops::Range<usize> {
    debug_assert!(slot.len() >= HEADER_PREFIX_LEN + payload_len);
    let header = FrameHeader::new(fin, opcode, mask_key, payload_len as u64);
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    let header_len = frame::emit_into(&header, &mut prefix);

    slot[HEADER_PREFIX_LEN - header_len..HEADER_PREFIX_LEN].copy_from_slice(&prefix[HEADER_PREFIX_LEN - header_len..]);
    if let Some(key) = mask_key {
      mask::apply_mask(&mut slot[HEADER_PREFIX_LEN..HEADER_PREFIX_LEN + payload_len], key, 0);
    }
    (HEADER_PREFIX_LEN - header_len)..(HEADER_PREFIX_LEN + payload_len)
  }

  /// Writes a data frame. The payload is copied into the send buffer
  /// so it can be masked and prefixed with a header in place, then
  /// copied out again to release the send-buffer lock before the
  /// transport write (see the comment below on why that lock can't be
  /// held across it).
  #[instrument(skip_all, fields(opcode = ?opcode, len = payload.len()), parent = &self.span)]
  pub async fn write_frame(
    &self,
    opcode: OpCode,
    fin: bool,
    payload: &[u8],
    cancel: &CancellationToken,
  ) -> Result<(), WebSocketError> {
    if opcode.is_control() && payload.len() > 125 {
      return Err(
        ProtocolError::ControlFramePayloadTooLarge {
          opcode,
          len: payload.len() as u64,
        }
        .into(),
      );
    }
    if !self.close_state.load().can_send() {
      return Err(StateError::CannotSend.into());
    }

    let _guard = self.begin_write()?;
    let mut send_guard = self.send_buffers.lock().await;
    let send = send_guard.as_mut().ok_or(StateError::Disposed)?;

    let capacity = send.send.len() - HEADER_PREFIX_LEN;
    if payload.len() > capacity {
      return Err(StateError::CannotSend.into());
    }

    send.send[HEADER_PREFIX_LEN..HEADER_PREFIX_LEN + payload.len()].copy_from_slice(payload);
    let mask_key = self.choose_mask_key();
    let range = Self::prepare_frame(&mut send.send, opcode, fin, payload.len(), mask_key);

    // Copy the framed bytes out and release the send-buffer lock before
    // writing to the transport: a failed write below calls fail_send ->
    // close -> send_control_frame, which itself locks `send_buffers` to
    // stage its close frame. Holding `send_guard` across that call would
    // deadlock on this same non-reentrant mutex (data frames have no
    // fixed upper size the way control frames do, so unlike
    // send_control_frame's stack array this has to be a fresh Vec).
    let wire = send.send[range].to_vec();
    drop(send_guard);

    let ok = self
      .send_frame_bytes(&wire, None, SendFrameOptions::NONE, cancel)
      .await?;
    if !ok {
      return Err(StateError::CannotSend.into());
    }
    Ok(())
  }

  /// Builds and sends a control frame (ping/pong/close) from a
  /// dedicated small slot, independent of the data send buffer so a
  /// control reply never contends with an in-progress data write for
  /// buffer space (`§4.2`).
  async fn send_control_frame(
    &self,
    opcode: OpCode,
    payload: &[u8],
    options: SendFrameOptions,
    lock_timeout: Option<Duration>,
    cancel: &CancellationToken,
  ) -> bool {
    debug_assert!(payload.len() <= 125);
    let mut send_guard = self.send_buffers.lock().await;
    let Some(send) = send_guard.as_mut() else {
      return false;
    };

    let slot = match opcode {
      OpCode::Ping => send.out_ping(),
      OpCode::Pong => send.out_pong(),
      OpCode::Close => send.out_close(),
      _ => unreachable!("send_control_frame only handles control opcodes"),
    };
    slot[HEADER_PREFIX_LEN..HEADER_PREFIX_LEN + payload.len()].copy_from_slice(payload);
    let mask_key = self.choose_mask_key();
    let range = Self::prepare_frame(slot, opcode, true, payload.len(), mask_key);

    let mut wire = [0u8; HEADER_PREFIX_LEN + 125];
    let wire_len = range.len();
    wire[..wire_len].copy_from_slice(&slot[range]);
    drop(send_guard);

    matches!(
      self.send_frame_bytes(&wire[..wire_len], lock_timeout, options, cancel).await,
      Ok(true)
    )
  }

  /// Acquires the write permit (serializing every wire write
  /// regardless of logical role, `§5`) and writes `bytes`.
  async fn send_frame_bytes(
    &self,
    bytes: &[u8],
    lock_timeout: Option<Duration>,
    options: SendFrameOptions,
    cancel: &CancellationToken,
  ) -> Result<bool, WebSocketError> {
    if !options.ignore_close && !self.close_state.load().can_send() {
      return if options.no_errors {
        Ok(false)
      } else {
        Err(StateError::CannotSend.into())
      };
    }

    let permit = if options.no_lock {
      None
    } else {
      match lock_timeout {
        None => match self.write_permit.acquire().await {
          Ok(p) => Some(p),
          Err(_) => return Err(StateError::Disposed.into()),
        },
        Some(d) if d.is_zero() => match self.write_permit.try_acquire() {
          Ok(p) => Some(p),
          Err(_) => return Ok(false),
        },
        Some(d) => match tokio::time::timeout(d, self.write_permit.acquire()).await {
          Ok(Ok(p)) => Some(p),
          _ => return Ok(false),
        },
      }
    };

    let result = self.transport.write(bytes, cancel).await;
    // Release the permit before touching the failure path below: a
    // failed write calls `fail_send` -> `close` -> `send_control_frame`,
    // which acquires this same capacity-1 permit to send the close
    // frame. Holding it here across that call would be a self-deadlock.
    drop(permit);

    match result {
      Ok(()) => Ok(true),
      Err(e) => {
        if options.no_errors {
          Ok(false)
        } else {
          Err(self.fail_send(e.into(), cancel).await)
        }
      }
    }
  }

  // ---------------------------------------------------------------
  // Close handshake, `§4.5`, `§4.6`
  // ---------------------------------------------------------------

  /// Initiates or completes the close handshake, `§4.5`. A no-op
  /// (returning the connection's current state) if neither
  /// `Open -> CloseSent` nor `CloseReceived -> Closed` applies — the
  /// caller has nothing left to do.
  #[instrument(skip_all, fields(code = ?code), parent = &self.span)]
  pub async fn close(&self, code: CloseCode, cancel: &CancellationToken) -> CloseState {
    self.close_inner(code, None, cancel).await
  }

  /// As [`Connection::close`], but appends a UTF-8 reason after the
  /// 2-byte status code (`§6`: the wire format allows it even though
  /// this crate never surfaces a received reason back to the caller).
  pub async fn close_with_message(&self, code: CloseCode, message: &str, cancel: &CancellationToken) -> CloseState {
    self.close_inner(code, Some(message), cancel).await
  }

  async fn close_inner(&self, code: CloseCode, message: Option<&str>, cancel: &CancellationToken) -> CloseState {
    let Some(_transition) = self.close_state.begin_local_close() else {
      return self.close_state.load();
    };

    *self.close_reason.lock() = Some(CloseReason::new(code, message.map(str::to_owned)));

    let message_bytes = message.map(str::as_bytes).unwrap_or(&[]);
    let mut payload = [0u8; 125];
    payload[0..2].copy_from_slice(&code.as_u16().to_be_bytes());
    let message_len = message_bytes.len().min(123);
    payload[2..2 + message_len].copy_from_slice(&message_bytes[..message_len]);
    let payload_len = 2 + message_len;

    let sent = self
      .send_control_frame(OpCode::Close, &payload[..payload_len], SendFrameOptions::CLOSE_HANDSHAKE, None, cancel)
      .await;
    if !sent {
      warn!("failed to write close frame, proceeding with teardown anyway");
    }
    let _ = self.transport.flush(cancel).await;

    let final_state = self.close_state.load();
    if final_state == CloseState::Closed {
      let _ = self.transport.close().await;
    }
    final_state
  }

  async fn fail_read(&self, err: WebSocketError, cancel: &CancellationToken) -> WebSocketError {
    if cancel.is_cancelled() {
      return WebSocketError::Cancelled;
    }
    self.close(CloseCode::ProtocolError, cancel).await;
    err
  }

  async fn fail_receive(&self, err: WebSocketError, cancel: &CancellationToken) -> WebSocketError {
    if cancel.is_cancelled() {
      return WebSocketError::Cancelled;
    }
    self.close(CloseCode::InternalError, cancel).await;
    err
  }

  async fn fail_send(&self, err: WebSocketError, cancel: &CancellationToken) -> WebSocketError {
    if cancel.is_cancelled() {
      return WebSocketError::Cancelled;
    }
    self.close(CloseCode::InternalError, cancel).await;
    err
  }

  // ---------------------------------------------------------------
  // Ping, `§4.4`, `§4.6`
  // ---------------------------------------------------------------

  /// Invoked by an external scheduler tick (`§6`). `manual_payload`
  /// is only consumed by [`PingMode::Manual`]; the other strategies
  /// ignore it. No-op if the connection cannot currently send.
  pub async fn ping(&self, manual_payload: Option<&[u8]>, cancel: &CancellationToken) {
    if !self.close_state.load().can_send() {
      return;
    }
    if let Some(payload) = manual_payload {
      self.ping_handler.stage_payload(payload);
    }
    match self.ping_handler.decide() {
      PingAction::Skip => {}
      PingAction::Send { payload, lock_timeout } => {
        let _ = self
          .send_control_frame(OpCode::Ping, &payload, SendFrameOptions::NONE, lock_timeout, cancel)
          .await;
      }
      PingAction::InitiateClose { code, reason } => {
        self.close_with_message(code, reason, cancel).await;
      }
      PingAction::Dispose => {
        self.dispose().await;
      }
    }
  }

  // ---------------------------------------------------------------
  // Disposal, `§3`, `§4.6`, `§5`
  // ---------------------------------------------------------------

  /// Releases both pooled buffers and closes the transport.
  /// Idempotent: only the first call does anything.
  #[instrument(skip_all, parent = &self.span)]
  pub async fn dispose(&self) {
    if !self.close_state.dispose() {
      return;
    }
    self.ping_handler.mark_disposed();
    self.write_permit.close();
    let _ = self.transport.close().await;

    let recv = self.recv_buffers.lock().await.take();
    let send = self.send_buffers.lock().await.take();
    if let Some(recv) = recv {
      recv.release(self.pool.as_ref());
    }
    if let Some(send) = send {
      send.release(self.pool.as_ref());
    }
  }
}
