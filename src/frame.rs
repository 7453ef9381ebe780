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

//! The RFC 6455 frame header codec, `§4.1`.
//!
//! This module only knows about the header — FIN/RSV/opcode/mask/
//! length — bit-exactly. It does not read or write payload bytes;
//! that's [`crate::connection`]'s job, so the payload never has to
//! be copied through here.

use crate::error::ProtocolError;

/// The send buffer always reserves this many bytes immediately
/// before the payload so [`emit_into`] can write a header without
/// ever shifting the payload to make room (`§4.1`, `§9`).
pub const HEADER_PREFIX_LEN: usize = 16;

/// The longest a frame header can actually be: 2 base bytes + 8
/// extended-length bytes + 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

/// RFC 6455 §5.2 opcodes. Only the six values the protocol defines
/// are representable; anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
  Continuation,
  Text,
  Binary,
  Close,
  Ping,
  Pong,
}

impl OpCode {
  pub fn is_control(self) -> bool {
    matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
  }

  pub fn is_data(self) -> bool {
    !self.is_control()
  }

  pub(crate) fn as_u8(self) -> u8 {
    match self {
      OpCode::Continuation => 0x0,
      OpCode::Text => 0x1,
      OpCode::Binary => 0x2,
      OpCode::Close => 0x8,
      OpCode::Ping => 0x9,
      OpCode::Pong => 0xA,
    }
  }
}

impl TryFrom<u8> for OpCode {
  type Error = ProtocolError;

  fn try_from(raw: u8) -> Result<Self, Self::Error> {
    match raw {
      0x0 => Ok(OpCode::Continuation),
      0x1 => Ok(OpCode::Text),
      0x2 => Ok(OpCode::Binary),
      0x8 => Ok(OpCode::Close),
      0x9 => Ok(OpCode::Ping),
      0xA => Ok(OpCode::Pong),
      other => Err(ProtocolError::UnknownOpCode(other)),
    }
  }
}

/// A parsed (or about-to-be-emitted) frame header, `§3`.
///
/// `remaining` starts equal to `payload_len` and is decremented by
/// [`crate::connection::Connection::receive`] as payload bytes are
/// delivered to the caller; it is the single source of truth for
/// "how much of this frame is left", including across multiple
/// `receive` calls and across the mask stream offset (`§4.1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub fin: bool,
  /// RSV1..3, carried through but required to be zero until this
  /// crate negotiates an extension (it currently negotiates none).
  pub rsv: u8,
  pub opcode: OpCode,
  pub mask_key: Option<[u8; 4]>,
  pub payload_len: u64,
  pub remaining: i64,
}

impl FrameHeader {
  pub fn new(fin: bool, opcode: OpCode, mask_key: Option<[u8; 4]>, payload_len: u64) -> Self {
    Self {
      fin,
      rsv: 0,
      opcode,
      mask_key,
      payload_len,
      remaining: payload_len as i64,
    }
  }

  pub fn is_finished(&self) -> bool {
    self.remaining == 0
  }
}

/// Given the first two bytes already read off the wire, returns how
/// many header bytes follow in total (including those two),
/// `§4.1 header-length`.
pub fn header_length(first_two: [u8; 2]) -> usize {
  let masked = first_two[1] & 0b1000_0000 != 0;
  let length7 = first_two[1] & 0b0111_1111;
  let extra = match length7 {
    126 => 2,
    127 => 8,
    _ => 0,
  };
  2 + extra + if masked { 4 } else { 0 }
}

/// Parses a complete header from exactly `header_length(bytes[0..2])`
/// bytes. Rejects: nonzero RSV bits (no extension negotiated),
/// unknown opcodes, fragmented control frames, a control frame using
/// the length7==126/127 extended-length marker at all (regardless of
/// what the extended bytes decode to), oversized control payloads,
/// and a 64-bit length field with its top bit set.
pub fn parse(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
  debug_assert!(bytes.len() >= 2);

  let fin = bytes[0] & 0b1000_0000 != 0;
  let rsv = (bytes[0] & 0b0111_0000) >> 4;
  if rsv != 0 {
    return Err(ProtocolError::ReservedBitsSet);
  }
  let opcode = OpCode::try_from(bytes[0] & 0b0000_1111)?;

  let masked = bytes[1] & 0b1000_0000 != 0;
  let length7 = bytes[1] & 0b0111_1111;

  let (payload_len, header_len_without_mask) = match length7 {
    126 => {
      let len = u16::from_be_bytes([bytes[2], bytes[3]]) as u64;
      (len, 4)
    }
    127 => {
      let raw = u64::from_be_bytes(bytes[2..10].try_into().unwrap());
      if raw & (1 << 63) != 0 {
        return Err(ProtocolError::LengthTooLarge);
      }
      (raw, 10)
    }
    short => (short as u64, 2),
  };

  let mask_key = if masked {
    let start = header_len_without_mask;
    Some([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]])
  } else {
    None
  };

  if opcode.is_control() {
    if !fin {
      return Err(ProtocolError::ControlFrameFragmented { opcode });
    }
    // Reject the extended-length markers themselves, not just an
    // oversized decoded value: a control frame using length7==126/127
    // is malformed even if the bytes it points at happen to decode to
    // a value <=125 (`§8`: "Control frame with length == 126 → parse
    // fails" is its own boundary case, distinct from an oversized
    // payload).
    if length7 >= 126 || payload_len > 125 {
      return Err(ProtocolError::ControlFramePayloadTooLarge {
        opcode,
        len: payload_len,
      });
    }
  }

  Ok(FrameHeader {
    fin,
    rsv: 0,
    opcode,
    mask_key,
    payload_len,
    remaining: payload_len as i64,
  })
}

/// Serializes `header` right-aligned into `prefix` so that the
/// payload (assumed to immediately follow `prefix` in memory) starts
/// exactly at `prefix[HEADER_PREFIX_LEN]`. Returns the header length,
/// i.e. the caller should transmit `prefix[HEADER_PREFIX_LEN - len..]`
/// followed by the payload.
pub fn emit_into(header: &FrameHeader, prefix: &mut [u8; HEADER_PREFIX_LEN]) -> usize {
  let masked = header.mask_key.is_some();
  let len = header.payload_len;

  let extra = if len <= 125 {
    0
  } else if len <= 0xFFFF {
    2
  } else {
    8
  };
  let header_len = 2 + extra + if masked { 4 } else { 0 };
  let start = HEADER_PREFIX_LEN - header_len;

  let mut byte0 = (header.fin as u8) << 7;
  byte0 |= header.rsv << 4;
  byte0 |= header.opcode.as_u8();
  prefix[start] = byte0;

  let length7: u8 = if len <= 125 {
    len as u8
  } else if len <= 0xFFFF {
    126
  } else {
    127
  };
  prefix[start + 1] = ((masked as u8) << 7) | length7;

  let mut cursor = start + 2;
  match extra {
    2 => {
      prefix[cursor..cursor + 2].copy_from_slice(&(len as u16).to_be_bytes());
      cursor += 2;
    }
    8 => {
      prefix[cursor..cursor + 8].copy_from_slice(&len.to_be_bytes());
      cursor += 8;
    }
    _ => {}
  }

  if let Some(key) = header.mask_key {
    prefix[cursor..cursor + 4].copy_from_slice(&key);
  }

  header_len
}

#[cfg(test)]
mod tests {
  use super::*;

  fn round_trip(header: FrameHeader) {
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    let len = emit_into(&header, &mut prefix);
    let encoded = &prefix[HEADER_PREFIX_LEN - len..];
    assert_eq!(header_length([encoded[0], encoded[1]]), len);
    let parsed = parse(encoded).unwrap();
    assert_eq!(parsed, header);
  }

  #[test]
  fn round_trips_short_unmasked() {
    round_trip(FrameHeader::new(true, OpCode::Text, None, 2));
  }

  #[test]
  fn round_trips_short_masked() {
    round_trip(FrameHeader::new(true, OpCode::Binary, Some([1, 2, 3, 4]), 125));
  }

  #[test]
  fn round_trips_u16_length() {
    round_trip(FrameHeader::new(true, OpCode::Binary, None, 126));
    round_trip(FrameHeader::new(true, OpCode::Binary, None, 65535));
  }

  #[test]
  fn round_trips_u64_length() {
    round_trip(FrameHeader::new(true, OpCode::Binary, Some([9, 8, 7, 6]), 65536));
    round_trip(FrameHeader::new(false, OpCode::Continuation, None, 1 << 32));
  }

  #[test]
  fn length7_boundaries() {
    assert_eq!(header_length([0x82, 125]), 2);
    assert_eq!(header_length([0x82, 126]), 4);
    assert_eq!(header_length([0x82, 127]), 10);
    assert_eq!(header_length([0x82, 0x80 | 125]), 2 + 4);
  }

  #[test]
  fn rejects_top_bit_set_on_64bit_length() {
    let mut bytes = vec![0x82u8, 127];
    bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());
    assert!(matches!(
      parse(&bytes),
      Err(ProtocolError::LengthTooLarge)
    ));
  }

  #[test]
  fn rejects_fragmented_control_frame() {
    // FIN=0, opcode=Ping
    let bytes = [0x09, 0x00];
    assert!(matches!(
      parse(&bytes),
      Err(ProtocolError::ControlFrameFragmented { opcode: OpCode::Ping })
    ));
  }

  #[test]
  fn rejects_oversized_control_frame() {
    // FIN=1, opcode=Ping, length7=126 (control frame claiming >125 bytes)
    let bytes = [0x89, 126, 0, 200];
    assert!(matches!(
      parse(&bytes),
      Err(ProtocolError::ControlFramePayloadTooLarge { .. })
    ));
  }

  #[test]
  fn rejects_control_frame_using_extended_length_marker_even_if_decoded_value_is_small() {
    // FIN=1, opcode=Ping, length7=126, decoded extended length = 5 (<=125).
    // The marker itself is disallowed on a control frame regardless of
    // what it decodes to.
    let bytes = [0x89, 126, 0x00, 0x05];
    assert!(matches!(
      parse(&bytes),
      Err(ProtocolError::ControlFramePayloadTooLarge { opcode: OpCode::Ping, len: 5 })
    ));
  }

  #[test]
  fn rejects_reserved_bits() {
    let bytes = [0b1111_0001, 0x00];
    assert!(matches!(parse(&bytes), Err(ProtocolError::ReservedBitsSet)));
  }

  #[test]
  fn rejects_unknown_opcode() {
    let bytes = [0x83, 0x00];
    assert!(matches!(parse(&bytes), Err(ProtocolError::UnknownOpCode(3))));
  }

  #[test]
  fn client_text_hi_matches_rfc_style_wire_bytes() {
    // Client sends "Hi" with mask key 0x37FA213D.
    let header = FrameHeader::new(true, OpCode::Text, Some([0x37, 0xfa, 0x21, 0x3d]), 2);
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    let len = emit_into(&header, &mut prefix);
    assert_eq!(len, 6);
    assert_eq!(
      &prefix[HEADER_PREFIX_LEN - len..],
      &[0x81, 0x82, 0x37, 0xfa, 0x21, 0x3d]
    );
  }
}
