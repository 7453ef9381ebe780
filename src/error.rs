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

use crate::frame::OpCode;

/// Every failure mode the connection engine can surface.
///
/// Grouped the way `§7 Error handling design` groups them: protocol
/// violations, transport failures, local state misuse, and
/// cooperative cancellation. None of these are ever double-wrapped —
/// a [`WebSocketError`] that crosses an `await` point is already in
/// its final shape.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
  /// The peer sent bytes that don't form a valid RFC 6455 frame.
  #[error("protocol error: {0}")]
  Protocol(#[from] ProtocolError),

  /// The underlying transport failed, or closed mid-frame.
  #[error("transport error: {0}")]
  Transport(#[from] TransportError),

  /// The caller misused the connection (concurrent read/write,
  /// operating on a closed or disposed connection).
  #[error("state error: {0}")]
  State(#[from] StateError),

  /// The operation was cancelled before it completed.
  #[error("operation cancelled")]
  Cancelled,
}

/// Malformed wire data or a disallowed protocol sequence.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
  #[error("reserved bits set in frame header")]
  ReservedBitsSet,
  #[error("unknown opcode {0:#x}")]
  UnknownOpCode(u8),
  #[error("control frame {opcode:?} was fragmented (FIN=0)")]
  ControlFrameFragmented { opcode: OpCode },
  #[error("control frame {opcode:?} payload of {len} bytes exceeds 125-byte limit")]
  ControlFramePayloadTooLarge { opcode: OpCode, len: u64 },
  #[error("64-bit length field has its top bit set")]
  LengthTooLarge,
  #[error("data opcode {0:?} observed while resolving a control frame")]
  UnexpectedDataOpCode(OpCode),
  #[error("continuation frame received with no fragmented message in progress")]
  UnexpectedContinuation,
  #[error("data frame received while a fragmented message is already in progress")]
  FragmentedMessageInProgress,
}

/// I/O failure on the abstract transport, or an unexpected EOF.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("transport ended unexpectedly while a frame was still in progress")]
  UnexpectedEof,
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// The caller asked for something the connection's current state
/// does not allow.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
  #[error("a read is already in progress on this connection")]
  ConcurrentRead,
  #[error("a write is already in progress on this connection")]
  ConcurrentWrite,
  #[error("cannot receive: connection close state does not permit it")]
  CannotReceive,
  #[error("cannot send: connection close state does not permit it")]
  CannotSend,
  #[error("connection has been disposed")]
  Disposed,
  #[error("latency is only tracked under PingMode::LatencyControl")]
  LatencyNotTracked,
  #[error("remaining byte count went negative for the current frame (internal bug)")]
  NegativeRemaining,
}

impl From<std::io::Error> for WebSocketError {
  fn from(err: std::io::Error) -> Self {
    WebSocketError::Transport(TransportError::Io(err))
  }
}
