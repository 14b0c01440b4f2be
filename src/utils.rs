//! Sequence-number arithmetic and clock helpers shared across the crate
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01)
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// Modular addition of 16-bit sequence numbers
pub fn uint16_add(a: u16, b: u16) -> u16 {
    a.wrapping_add(b)
}

/// Modular subtraction of 16-bit sequence numbers
pub fn uint16_sub(a: u16, b: u16) -> u16 {
    a.wrapping_sub(b)
}

/// Modular ordering of 16-bit sequence numbers.
///
/// `a` is considered newer than `b` iff `(a - b) mod 2^16` lies in
/// `(0, 2^15)`, so the comparison survives wraparound.
pub fn uint16_gt(a: u16, b: u16) -> bool {
    let delta = a.wrapping_sub(b);
    delta != 0 && delta < 0x8000
}

/// Random initial sequence number
pub fn random16() -> u16 {
    rand::thread_rng().gen()
}

/// Random SSRC
pub fn random32() -> u32 {
    rand::thread_rng().gen()
}

/// Current wall-clock time as a 64-bit NTP timestamp (32.32 fixed point)
pub fn current_ntp_time() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seconds = now.as_secs() + NTP_EPOCH_OFFSET;
    let fraction = (u64::from(now.subsec_nanos()) << 32) / 1_000_000_000;
    (seconds << 32) | fraction
}
