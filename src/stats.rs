//! Per-source reception statistics
//!
//! Tracks loss, sequence cycles and interarrival jitter for one incoming
//! stream, following the algorithms of RFC 3550 Appendix A.
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


use crate::rtcp::clamp_packets_lost;
use crate::rtp::RtpPacket;
use crate::utils::uint16_gt;
use std::time::Instant;

/// Reception statistics for a single SSRC
pub struct StreamStatistics {
    base_seq: Option<u16>,
    max_seq: Option<u16>,
    cycles: i64,
    packets_received: u64,

    // jitter, RFC 3550 Section A.8
    clockrate: u32,
    jitter_q4: i64,
    last_arrival: Option<i64>,
    last_timestamp: Option<u32>,
    epoch: Instant,

    // fraction lost
    expected_prior: i64,
    received_prior: i64,
}

impl StreamStatistics {
    /// Create statistics measuring arrival times at `clockrate` units per second
    pub fn new(clockrate: u32) -> Self {
        StreamStatistics {
            base_seq: None,
            max_seq: None,
            cycles: 0,
            packets_received: 0,
            clockrate,
            jitter_q4: 0,
            last_arrival: None,
            last_timestamp: None,
            epoch: Instant::now(),
            expected_prior: 0,
            received_prior: 0,
        }
    }

    /// Record a received packet
    pub fn add(&mut self, packet: &RtpPacket) {
        let arrival =
            (self.epoch.elapsed().as_secs_f64() * f64::from(self.clockrate)) as i64;
        self.add_with_arrival(packet, arrival);
    }

    fn add_with_arrival(&mut self, packet: &RtpPacket, arrival: i64) {
        let in_order = self
            .max_seq
            .map_or(true, |max| uint16_gt(packet.sequence_number, max));
        self.packets_received += 1;

        if self.base_seq.is_none() {
            self.base_seq = Some(packet.sequence_number);
        }

        if in_order {
            if let Some(max) = self.max_seq {
                if packet.sequence_number < max {
                    self.cycles += 1 << 16;
                }
            }
            self.max_seq = Some(packet.sequence_number);

            if self.packets_received > 1 && Some(packet.timestamp) != self.last_timestamp {
                if let (Some(last_arrival), Some(last_timestamp)) =
                    (self.last_arrival, self.last_timestamp)
                {
                    let transit = arrival - last_arrival;
                    let advance =
                        i64::from(packet.timestamp) - i64::from(last_timestamp);
                    let deviation = (transit - advance).abs();
                    self.jitter_q4 += deviation - ((self.jitter_q4 + 8) >> 4);
                }
            }

            self.last_arrival = Some(arrival);
            self.last_timestamp = Some(packet.timestamp);
        }
    }

    /// Smoothed interarrival jitter in clock-rate units
    pub fn jitter(&self) -> u32 {
        (self.jitter_q4 >> 4).max(0) as u32
    }

    /// Packets received so far
    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Packets the sequence numbers say should have arrived
    pub fn packets_expected(&self) -> i64 {
        match (self.base_seq, self.max_seq) {
            (Some(base), Some(max)) => {
                self.cycles + i64::from(max) - i64::from(base) + 1
            }
            _ => 0,
        }
    }

    /// Cumulative packets lost, clamped to the signed 24-bit report range
    pub fn packets_lost(&self) -> i32 {
        clamp_packets_lost(self.packets_expected() - self.packets_received as i64)
    }

    /// Loss fraction since the previous call, in 1/256 units.
    ///
    /// Stateful: each call closes the current report interval.
    pub fn fraction_lost(&mut self) -> u8 {
        let expected = self.packets_expected();
        let expected_interval = expected - self.expected_prior;
        self.expected_prior = expected;

        let received = self.packets_received as i64;
        let received_interval = received - self.received_prior;
        self.received_prior = received;

        let lost_interval = expected_interval - received_interval;
        if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval) as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16, ts: u32) -> RtpPacket {
        RtpPacket {
            sequence_number: seq,
            timestamp: ts,
            ..Default::default()
        }
    }

    #[test]
    fn test_sequential() {
        let mut stats = StreamStatistics::new(8000);
        stats.add(&packet(0, 0));
        stats.add(&packet(1, 160));
        stats.add(&packet(2, 320));

        assert_eq!(stats.packets_received(), 3);
        assert_eq!(stats.packets_expected(), 3);
        assert_eq!(stats.packets_lost(), 0);
        assert_eq!(stats.base_seq, Some(0));
        assert_eq!(stats.max_seq, Some(2));
    }

    #[test]
    fn test_with_loss() {
        let mut stats = StreamStatistics::new(8000);
        stats.add(&packet(0, 0));
        stats.add(&packet(1, 160));
        // seq 2 lost
        stats.add(&packet(3, 480));

        assert_eq!(stats.packets_received(), 3);
        assert_eq!(stats.packets_expected(), 4);
        assert_eq!(stats.packets_lost(), 1);
    }

    #[test]
    fn test_reordered_does_not_regress() {
        let mut stats = StreamStatistics::new(8000);
        stats.add(&packet(0, 0));
        stats.add(&packet(2, 320));
        stats.add(&packet(1, 160));

        assert_eq!(stats.packets_received(), 3);
        assert_eq!(stats.max_seq, Some(2));
        assert_eq!(stats.packets_lost(), 0);
    }

    #[test]
    fn test_sequence_wrap_adds_cycle() {
        let mut stats = StreamStatistics::new(8000);
        stats.add(&packet(65534, 0));
        stats.add(&packet(65535, 160));
        stats.add(&packet(0, 320));

        assert_eq!(stats.cycles, 1 << 16);
        assert_eq!(stats.packets_expected(), 3);
        assert_eq!(stats.packets_lost(), 0);
    }

    #[test]
    fn test_fraction_lost() {
        let mut stats = StreamStatistics::new(8000);
        stats.add(&packet(0, 0));
        stats.add(&packet(1, 160));

        // the first call closes a loss-free interval
        assert_eq!(stats.fraction_lost(), 0);

        // seq 2 lost: the new interval expected 2, received 1
        stats.add(&packet(3, 480));
        assert_eq!(stats.fraction_lost(), 128);
    }

    #[test]
    fn test_zero_jitter_on_matching_cadence() {
        let mut stats = StreamStatistics::new(8000);
        // arrivals exactly one frame of samples apart
        stats.add_with_arrival(&packet(0, 0), 0);
        stats.add_with_arrival(&packet(1, 160), 160);
        stats.add_with_arrival(&packet(2, 320), 320);
        stats.add_with_arrival(&packet(3, 480), 480);

        assert_eq!(stats.jitter(), 0);
    }

    #[test]
    fn test_jitter_grows_on_irregular_arrival() {
        let mut stats = StreamStatistics::new(8000);
        stats.add_with_arrival(&packet(0, 0), 0);
        stats.add_with_arrival(&packet(1, 160), 400);
        stats.add_with_arrival(&packet(2, 320), 420);

        assert!(stats.jitter() > 0);
    }
}
