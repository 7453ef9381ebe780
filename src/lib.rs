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

//! _duplex-ws_ is a full-duplex RFC 6455 WebSocket connection engine
//! over an abstract byte transport.
//!
//! It owns a single bidirectional transport and multiplexes data
//! frames, control traffic (ping/pong/close) and liveness monitoring
//! over it. It does not perform the HTTP Upgrade handshake, establish
//! a TCP/TLS connection, or offer a listener/client wrapper — those
//! are left to the caller. What it does own: the frame codec, the
//! masking, the closing handshake, write-exclusion on the shared
//! transport, and pluggable ping strategies.
//!
//! # Example
//!
//! ```no_run
//! use duplex_ws::{Connection, ConnectionOptions, DuplexTransport, OpCode};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn handle(socket: tokio::net::TcpStream) -> Result<(), duplex_ws::WebSocketError> {
//! let transport = DuplexTransport::new(socket);
//! let pool = Arc::new(duplex_ws::FreeListPool::default());
//! let conn = Connection::new(transport, pool, ConnectionOptions::server())?;
//! let cancel = CancellationToken::new();
//!
//! while conn.await_header(&cancel).await? {
//!   let header = conn.current_header().unwrap();
//!   let mut buf = vec![0u8; header.payload_len as usize];
//!   let mut read = 0;
//!   while read < buf.len() {
//!     read += conn.receive(&mut buf[read..], &cancel).await?;
//!   }
//!   if header.opcode == OpCode::Text || header.opcode == OpCode::Binary {
//!     conn.write_frame(header.opcode, true, &buf, &cancel).await?;
//!   }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Fragmentation
//!
//! Like the lower-level raw-frame WebSocket engines this crate is
//! built in the style of, [`Connection`] hands the caller one header
//! per call to [`Connection::await_header`] exactly as it arrives on
//! the wire — a fragmented message surfaces as a `FIN=0` header
//! followed by one or more `Continuation` headers, the last with
//! `FIN=1`. Reassembling those into a single logical message is a
//! higher-layer concern this crate deliberately leaves out (`§1`
//! "higher-level message-stream adapters").
//!
//! ## Liveness
//!
//! Three interchangeable [`PingMode`] strategies ride on the same
//! connection: `Manual` (caller supplies payloads and paces sends),
//! `LatencyControl` (embeds a timestamp and measures round-trip
//! latency, degrading to disposal on timeout), and `BandwidthSaving`
//! (skips scheduled pings on connections with recent traffic). An
//! external scheduler is expected to call [`Connection::ping`] on a
//! tick; this crate does not run its own timer loop.
//!
//! _WebSocket extensions and per-message compression are not
//! supported; only a passthrough extension-bytes slot is reserved._

mod buffer;
mod close;
mod connection;
mod error;
mod frame;
mod mask;
mod options;
mod ping;
mod transport;

pub use buffer::{BufferPool, FreeListPool};
pub use close::{CloseCode, CloseReason, CloseState};
pub use connection::Connection;
pub use error::{ProtocolError, StateError, TransportError, WebSocketError};
pub use frame::{emit_into, header_length, parse as parse_header, FrameHeader, OpCode, HEADER_PREFIX_LEN};
pub use mask::apply_mask;
pub use options::{ConnectionOptions, OptionsError, Role, SendFrameOptions};
pub use ping::{Latency, PingAction, PingHandler, PingMode};
pub use transport::{DuplexTransport, Transport};
