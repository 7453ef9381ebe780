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

//! XOR masking, `§4.1`. The same routine encodes and decodes: XOR is
//! its own inverse, so `mask(mask(x, k), k) == x`.

/// XORs `buf` in place with `key`, cycling over the four mask bytes
/// starting at `stream_offset` (not always zero — a frame's payload
/// may be delivered to the caller across several `receive` calls,
/// and `stream_offset` is the number of payload bytes already
/// consumed for this frame, so the mask stream continues correctly).
pub fn apply_mask(buf: &mut [u8], key: [u8; 4], stream_offset: u64) {
  let start = (stream_offset % 4) as usize;
  for (i, byte) in buf.iter_mut().enumerate() {
    *byte ^= key[(start + i) % 4];
  }
}
