//! Missing-packet tracking for NACK feedback
//!
//! Deduces lost sequence numbers from the stream of received packets so
//! that Generic NACK feedback can be generated. The missing set is
//! bounded, otherwise feedback messages would grow without limit.
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


use crate::rtp::RtpPacket;
use crate::utils::{uint16_add, uint16_gt, uint16_sub};
use std::collections::BTreeSet;

/// How many sequence numbers behind the newest packet are still tracked
pub const RTP_HISTORY_SIZE: u16 = 2000;

/// Tracks the highest sequence seen and the set of missing sequences
#[derive(Debug, Default)]
pub struct NackGenerator {
    /// Highest sequence number received
    pub max_seq: Option<u16>,
    /// Sequence numbers presumed lost
    pub missing: BTreeSet<u16>,
}

impl NackGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received packet; returns true iff new losses were detected
    pub fn add(&mut self, packet: &RtpPacket) -> bool {
        let mut missed = false;

        let Some(max_seq) = self.max_seq else {
            self.max_seq = Some(packet.sequence_number);
            return missed;
        };

        if uint16_gt(packet.sequence_number, max_seq) {
            let mut seq = uint16_add(max_seq, 1);
            while uint16_gt(packet.sequence_number, seq) {
                self.missing.insert(seq);
                missed = true;
                seq = uint16_add(seq, 1);
            }
            self.max_seq = Some(packet.sequence_number);
        } else {
            self.missing.remove(&packet.sequence_number);
        }

        self.truncate();
        missed
    }

    /// Drop missing sequences that fell out of the history window
    fn truncate(&mut self) {
        if let Some(max_seq) = self.max_seq {
            let min_seq = uint16_sub(max_seq, RTP_HISTORY_SIZE);
            self.missing.retain(|&seq| !uint16_gt(min_seq, seq));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16) -> RtpPacket {
        RtpPacket {
            sequence_number: seq,
            ..Default::default()
        }
    }

    #[test]
    fn test_sequential() {
        let mut nack = NackGenerator::new();
        assert!(!nack.add(&packet(0)));
        assert!(!nack.add(&packet(1)));
        assert!(!nack.add(&packet(2)));
        assert!(nack.missing.is_empty());
    }

    #[test]
    fn test_gap() {
        let mut nack = NackGenerator::new();
        assert!(!nack.add(&packet(0)));
        assert!(nack.add(&packet(2)));
        assert_eq!(nack.missing, BTreeSet::from([1]));
    }

    #[test]
    fn test_gap_then_fill() {
        let mut nack = NackGenerator::new();
        assert!(!nack.add(&packet(0)));
        assert!(nack.add(&packet(3)));
        assert_eq!(nack.missing, BTreeSet::from([1, 2]));
        assert!(!nack.add(&packet(1)));
        assert_eq!(nack.missing, BTreeSet::from([2]));
    }

    #[test]
    fn test_first_packet() {
        let mut nack = NackGenerator::new();
        assert!(!nack.add(&packet(100)));
        assert_eq!(nack.max_seq, Some(100));
        assert!(nack.missing.is_empty());
    }

    #[test]
    fn test_wraparound_gap() {
        let mut nack = NackGenerator::new();
        assert!(!nack.add(&packet(65534)));
        assert!(!nack.add(&packet(65535)));
        // seq 0 skipped
        assert!(nack.add(&packet(1)));
        assert_eq!(nack.missing, BTreeSet::from([0]));

        assert!(!nack.add(&packet(0)));
        assert!(nack.missing.is_empty());
    }

    #[test]
    fn test_history_window_truncates() {
        let mut nack = NackGenerator::new();
        nack.add(&packet(0));
        nack.add(&packet(2));
        assert_eq!(nack.missing, BTreeSet::from([1]));

        // jumping far ahead pushes seq 1 out of the history window
        nack.add(&packet(RTP_HISTORY_SIZE + 100));
        assert!(!nack.missing.contains(&1));
        // the freshly created gap is bounded by the window too
        for &seq in &nack.missing {
            assert!(!uint16_gt(
                uint16_sub(RTP_HISTORY_SIZE + 100, RTP_HISTORY_SIZE),
                seq
            ));
        }
    }
}
