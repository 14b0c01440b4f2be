//! Jitter buffer for reordering incoming RTP packets
//!
//! Packets arrive in arbitrary order and are slotted into a fixed-size
//! ring keyed by sequence number. Complete frames are handed out in
//! timestamp order once enough lookahead has accumulated; far jumps reset
//! the window and can request a picture-loss indication for video.
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
use bytes::{Bytes, BytesMut};

/// Largest run of consecutive missing packets that gap skipping will
/// step over before stalling
pub const MAX_AUDIO_GAP: usize = 3;

/// Jitter buffer configuration
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    /// Number of packet slots; must be a power of two
    pub capacity: usize,
    /// Frame boundaries to observe beyond the head frame before emitting it
    pub prefetch: u32,
    /// Treat packets sharing a timestamp as fragments of one video frame
    pub is_video: bool,
    /// Skip over small sequence gaps instead of stalling on them
    pub skip_audio_gaps: bool,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        JitterBufferConfig {
            capacity: 16,
            prefetch: 0,
            is_video: false,
            skip_audio_gaps: false,
        }
    }
}

/// A complete frame assembled from one or more packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterFrame {
    /// Frame payload; for video, payloads concatenated in sequence order
    pub data: Bytes,
    /// RTP timestamp shared by the frame's packets
    pub timestamp: u32,
}

/// Sequence-indexed reordering window
pub struct JitterBuffer {
    capacity: usize,
    prefetch: u32,
    is_video: bool,
    skip_audio_gaps: bool,
    origin: Option<u16>,
    packets: Vec<Option<RtpPacket>>,
}

impl JitterBuffer {
    /// Create a buffer; panics if the capacity is not a power of two
    pub fn new(config: JitterBufferConfig) -> Self {
        assert!(
            config.capacity.is_power_of_two(),
            "jitter buffer capacity must be a power of two"
        );
        JitterBuffer {
            capacity: config.capacity,
            prefetch: config.prefetch,
            is_video: config.is_video,
            skip_audio_gaps: config.skip_audio_gaps,
            origin: None,
            packets: (0..config.capacity).map(|_| None).collect(),
        }
    }

    /// Number of packet slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a packet, returning whether a picture-loss indication should
    /// be issued and the next complete frame if one became available.
    pub fn add(&mut self, packet: RtpPacket) -> (bool, Option<JitterFrame>) {
        let mut pli_needed = false;
        let seq = packet.sequence_number;

        match self.origin {
            None => self.origin = Some(seq),
            Some(origin) => {
                let delta = seq.wrapping_sub(origin) as usize;
                let misorder = origin.wrapping_sub(seq) as usize;
                if misorder < delta {
                    if misorder >= self.capacity {
                        // suspected source restart, re-anchor the window
                        self.remove(self.capacity);
                        self.origin = Some(seq);
                        if self.is_video {
                            pli_needed = true;
                        }
                    } else {
                        // too old, drop silently
                        return (pli_needed, None);
                    }
                } else if delta >= self.capacity {
                    // advance just enough to make room for the new packet
                    let excess = delta - self.capacity + 1;
                    if self.smart_remove(excess) {
                        self.origin = Some(seq);
                    }
                    if self.is_video {
                        pli_needed = true;
                    }
                }
            }
        }

        let pos = seq as usize % self.capacity;
        self.packets[pos] = Some(packet);

        (pli_needed, self.emit_frame())
    }

    /// Clear the first `count` slots and advance the origin past them
    pub fn remove(&mut self, count: usize) {
        let Some(mut origin) = self.origin else {
            return;
        };
        for _ in 0..count {
            self.packets[origin as usize % self.capacity] = None;
            origin = origin.wrapping_add(1);
        }
        self.origin = Some(origin);
    }

    /// Advance past `count` packets plus any trailing slots, empty or
    /// same-timestamp, that belong to the same frame. Returns true when
    /// the whole window was swept clean.
    pub fn smart_remove(&mut self, count: usize) -> bool {
        let Some(mut origin) = self.origin else {
            return false;
        };
        let mut timestamp = None;
        for index in 0..self.capacity {
            let pos = origin as usize % self.capacity;
            if let Some(packet) = &self.packets[pos] {
                if index >= count && timestamp != Some(packet.timestamp) {
                    self.origin = Some(origin);
                    return false;
                }
                timestamp = Some(packet.timestamp);
            }
            self.packets[pos] = None;
            origin = origin.wrapping_add(1);
        }
        self.origin = Some(origin);
        true
    }

    /// Walk forward from the origin and emit the head frame if enough
    /// frame boundaries have been observed.
    fn emit_frame(&mut self) -> Option<JitterFrame> {
        let origin = self.origin?;
        let mut head_frame: Option<JitterFrame> = None;
        let mut head_length = 0;
        let mut boundaries = 0u32;
        let mut payloads: Vec<Bytes> = Vec::new();
        let mut timestamp: Option<u32> = None;

        let mut index = 0;
        while index < self.capacity {
            let pos = origin.wrapping_add(index as u16) as usize % self.capacity;
            let slot = self.packets[pos]
                .as_ref()
                .map(|packet| (packet.timestamp, packet.payload.clone()));
            let Some((slot_timestamp, slot_payload)) = slot else {
                let Some(current) = timestamp else {
                    return None;
                };
                if !self.skip_audio_gaps {
                    return None;
                }
                // measure the gap and peek at the packet that closes it
                let mut gap = 0;
                let mut next = index;
                let mut next_timestamp = None;
                while next < self.capacity && gap <= MAX_AUDIO_GAP {
                    let peek = origin.wrapping_add(next as u16) as usize % self.capacity;
                    match &self.packets[peek] {
                        None => {
                            gap += 1;
                            next += 1;
                        }
                        Some(after) => {
                            next_timestamp = Some(after.timestamp);
                            break;
                        }
                    }
                }
                let Some(next_timestamp) = next_timestamp.filter(|_| gap <= MAX_AUDIO_GAP)
                else {
                    return None;
                };
                if next_timestamp == current {
                    // the gap is missing data inside this frame
                    return None;
                }
                // a skippable gap closes the current frame
                if head_frame.is_none() {
                    head_frame = Some(JitterFrame {
                        data: join_payloads(&payloads),
                        timestamp: current,
                    });
                    head_length = index;
                }
                boundaries += 1;
                if boundaries >= self.prefetch {
                    self.smart_remove(head_length);
                    return head_frame;
                }
                payloads.clear();
                timestamp = Some(next_timestamp);
                index = next;
                continue;
            };

            match timestamp {
                None => timestamp = Some(slot_timestamp),
                Some(current) if slot_timestamp != current => {
                    if head_frame.is_none() {
                        head_frame = Some(JitterFrame {
                            data: join_payloads(&payloads),
                            timestamp: current,
                        });
                        head_length = index;
                    }
                    boundaries += 1;
                    if boundaries >= self.prefetch {
                        self.smart_remove(head_length);
                        return head_frame;
                    }
                    payloads.clear();
                    timestamp = Some(slot_timestamp);
                }
                _ => {}
            }
            payloads.push(slot_payload);
            index += 1;
        }
        None
    }
}

fn join_payloads(payloads: &[Bytes]) -> Bytes {
    let mut data = BytesMut::with_capacity(payloads.iter().map(Bytes::len).sum());
    for payload in payloads {
        data.extend_from_slice(payload);
    }
    data.freeze()
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

    fn packet_with_payload(seq: u16, ts: u32, payload: &'static [u8]) -> RtpPacket {
        RtpPacket {
            sequence_number: seq,
            timestamp: ts,
            payload: Bytes::from_static(payload),
            ..Default::default()
        }
    }

    fn audio_buffer(capacity: usize) -> JitterBuffer {
        JitterBuffer::new(JitterBufferConfig {
            capacity,
            ..Default::default()
        })
    }

    fn slots(buffer: &JitterBuffer) -> Vec<Option<u16>> {
        buffer
            .packets
            .iter()
            .map(|slot| slot.as_ref().map(|p| p.sequence_number))
            .collect()
    }

    #[test]
    fn test_create() {
        let buffer = audio_buffer(4);
        assert_eq!(slots(&buffer), vec![None, None, None, None]);
        assert_eq!(buffer.origin, None);
    }

    #[test]
    #[should_panic]
    fn test_create_bad_capacity() {
        audio_buffer(3);
    }

    #[test]
    fn test_add_ordered() {
        let mut buffer = audio_buffer(4);
        for seq in 0..4 {
            let (pli, frame) = buffer.add(packet(seq, 1234));
            assert!(!pli);
            assert!(frame.is_none());
            assert_eq!(buffer.origin, Some(0));
        }
        assert_eq!(slots(&buffer), vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_add_unordered() {
        let mut buffer = audio_buffer(4);
        buffer.add(packet(1, 1234));
        assert_eq!(slots(&buffer), vec![None, Some(1), None, None]);
        assert_eq!(buffer.origin, Some(1));

        buffer.add(packet(3, 1234));
        assert_eq!(slots(&buffer), vec![None, Some(1), None, Some(3)]);
        assert_eq!(buffer.origin, Some(1));

        buffer.add(packet(2, 1234));
        assert_eq!(slots(&buffer), vec![None, Some(1), Some(2), Some(3)]);
        assert_eq!(buffer.origin, Some(1));
    }

    #[test]
    fn test_add_seq_too_low_drop() {
        let mut buffer = audio_buffer(4);
        buffer.add(packet(2, 1234));
        assert_eq!(buffer.origin, Some(2));

        buffer.add(packet(1, 1234));
        assert_eq!(slots(&buffer), vec![None, None, Some(2), None]);
        assert_eq!(buffer.origin, Some(2));
    }

    #[test]
    fn test_add_seq_too_low_reset() {
        let mut buffer = audio_buffer(4);
        buffer.add(packet(2000, 1234));
        assert_eq!(slots(&buffer), vec![Some(2000), None, None, None]);
        assert_eq!(buffer.origin, Some(2000));

        buffer.add(packet(1, 1234));
        assert_eq!(slots(&buffer), vec![None, Some(1), None, None]);
        assert_eq!(buffer.origin, Some(1));
    }

    #[test]
    fn test_add_seq_too_high_discard_one() {
        let mut buffer = audio_buffer(4);
        for seq in 0..5 {
            buffer.add(packet(seq, 1234));
        }
        assert_eq!(buffer.origin, Some(4));
        assert_eq!(slots(&buffer), vec![Some(4), None, None, None]);
    }

    #[test]
    fn test_add_seq_too_high_keeps_next_frame() {
        let mut buffer = audio_buffer(4);
        buffer.add(packet(0, 1234));
        buffer.add(packet(2, 1234));
        buffer.add(packet(3, 1235));
        assert_eq!(buffer.origin, Some(0));

        buffer.add(packet(4, 1235));
        assert_eq!(buffer.origin, Some(3));
        assert_eq!(slots(&buffer), vec![Some(4), None, None, Some(3)]);
    }

    #[test]
    fn test_add_seq_too_high_discard_four() {
        let mut buffer = audio_buffer(4);
        buffer.add(packet(0, 1234));
        buffer.add(packet(1, 1234));
        buffer.add(packet(3, 1234));
        assert_eq!(buffer.origin, Some(0));

        buffer.add(packet(7, 1235));
        assert_eq!(buffer.origin, Some(7));
        assert_eq!(slots(&buffer), vec![None, None, None, Some(7)]);
    }

    #[test]
    fn test_add_seq_too_high_discard_more() {
        let mut buffer = audio_buffer(4);
        for seq in 0..4 {
            buffer.add(packet(seq, 1234));
        }
        buffer.add(packet(8, 1234));
        assert_eq!(buffer.origin, Some(8));
        assert_eq!(slots(&buffer), vec![Some(8), None, None, None]);
    }

    #[test]
    fn test_add_seq_too_high_reset() {
        let mut buffer = audio_buffer(4);
        buffer.add(packet(0, 1234));
        assert_eq!(buffer.origin, Some(0));
        assert_eq!(slots(&buffer), vec![Some(0), None, None, None]);

        buffer.add(packet(3000, 1234));
        assert_eq!(buffer.origin, Some(3000));
        assert_eq!(slots(&buffer), vec![Some(3000), None, None, None]);
    }

    #[test]
    fn test_remove() {
        let mut buffer = audio_buffer(4);
        for seq in 0..4 {
            buffer.add(packet(seq, 1234));
        }

        buffer.remove(1);
        assert_eq!(buffer.origin, Some(1));
        assert_eq!(slots(&buffer), vec![None, Some(1), Some(2), Some(3)]);

        buffer.remove(2);
        assert_eq!(buffer.origin, Some(3));
        assert_eq!(slots(&buffer), vec![None, None, None, Some(3)]);
    }

    #[test]
    fn test_smart_remove() {
        let mut buffer = audio_buffer(4);
        buffer.add(packet(0, 1234));
        buffer.add(packet(1, 1234));
        buffer.add(packet(3, 1235));
        assert_eq!(buffer.origin, Some(0));

        // clears the requested packet plus the rest of its frame and the
        // empty slot, stopping at the next frame
        buffer.smart_remove(1);
        assert_eq!(buffer.origin, Some(3));
        assert_eq!(slots(&buffer), vec![None, None, None, Some(3)]);
    }

    #[test]
    fn test_audio_frames_with_prefetch() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 16,
            prefetch: 4,
            ..Default::default()
        });

        for (seq, ts, payload) in [
            (0u16, 1234u32, b"0000" as &'static [u8]),
            (1, 1235, b"0001"),
            (2, 1236, b"0002"),
            (3, 1237, b"0003"),
        ] {
            let (_, frame) = buffer.add(packet_with_payload(seq, ts, payload));
            assert!(frame.is_none());
        }

        let (_, frame) = buffer.add(packet_with_payload(4, 1238, b"0003"));
        let frame = frame.expect("prefetch satisfied");
        assert_eq!(frame.data, Bytes::from_static(b"0000"));
        assert_eq!(frame.timestamp, 1234);

        let (_, frame) = buffer.add(packet_with_payload(5, 1239, b"0004"));
        let frame = frame.expect("window keeps emitting");
        assert_eq!(frame.data, Bytes::from_static(b"0001"));
        assert_eq!(frame.timestamp, 1235);
    }

    #[test]
    fn test_video_frame_concatenation() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 128,
            is_video: true,
            ..Default::default()
        });

        assert!(buffer.add(packet_with_payload(0, 1234, b"0000")).1.is_none());
        assert!(buffer.add(packet_with_payload(1, 1234, b"0001")).1.is_none());
        assert!(buffer.add(packet_with_payload(2, 1234, b"0002")).1.is_none());

        let (_, frame) = buffer.add(packet_with_payload(3, 1235, b"0003"));
        let frame = frame.expect("complete frame");
        assert_eq!(frame.data, Bytes::from_static(b"000000010002"));
        assert_eq!(frame.timestamp, 1234);
    }

    #[test]
    fn test_video_missing_fragment_blocks_emission() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 128,
            is_video: true,
            ..Default::default()
        });
        buffer.add(packet_with_payload(0, 1234, b"0000"));
        // fragment 1 missing
        buffer.add(packet_with_payload(2, 1234, b"0002"));
        let (_, frame) = buffer.add(packet_with_payload(3, 1235, b"0003"));
        assert!(frame.is_none());
    }

    #[test]
    fn test_pli_flag() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 128,
            is_video: true,
            ..Default::default()
        });

        let (pli, _) = buffer.add(packet(2000, 1234));
        assert_eq!(buffer.origin, Some(2000));
        assert!(!pli);

        // far-backward jump resets the window
        let (pli, _) = buffer.add(packet(1, 1234));
        assert_eq!(buffer.origin, Some(1));
        assert!(pli);

        let (pli, _) = buffer.add(packet(128, 1235));
        assert_eq!(buffer.origin, Some(1));
        assert!(!pli);

        // overflow discards the head packet
        let (pli, _) = buffer.add(packet(129, 1235));
        assert_eq!(buffer.origin, Some(128));
        assert!(pli);

        // far-forward jump resets the window
        let (pli, _) = buffer.add(packet(2000, 2345));
        assert_eq!(buffer.origin, Some(2000));
        assert!(pli);
    }

    #[test]
    fn test_origin_is_minimum_occupied_sequence() {
        let mut buffer = audio_buffer(16);
        for seq in [5u16, 9, 7, 6, 12] {
            buffer.add(packet(seq, u32::from(seq) * 160));
        }
        let origin = buffer.origin.unwrap();
        let minimum = slots(&buffer).into_iter().flatten().min().unwrap();
        assert_eq!(origin, minimum);
    }

    #[test]
    fn test_gap_skipped_with_prefetch_zero() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 16,
            skip_audio_gaps: true,
            ..Default::default()
        });

        let (_, frame) = buffer.add(packet_with_payload(0, 100, b"A"));
        assert!(frame.is_none());

        // seq 1 lost; the gap plus a new timestamp releases the head frame
        let (_, frame) = buffer.add(packet_with_payload(2, 300, b"C"));
        let frame = frame.expect("gap closes head frame");
        assert_eq!(frame.data, Bytes::from_static(b"A"));
        assert_eq!(frame.timestamp, 100);

        // delivery continues past the gap
        let (_, frame) = buffer.add(packet_with_payload(3, 400, b"D"));
        let frame = frame.expect("subsequent frame");
        assert_eq!(frame.data, Bytes::from_static(b"C"));
        assert_eq!(frame.timestamp, 300);

        let (_, frame) = buffer.add(packet_with_payload(4, 500, b"E"));
        assert_eq!(frame.expect("steady state").data, Bytes::from_static(b"D"));
    }

    #[test]
    fn test_gap_counts_toward_prefetch() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 16,
            prefetch: 2,
            skip_audio_gaps: true,
            ..Default::default()
        });

        buffer.add(packet_with_payload(0, 100, b"A"));
        buffer.add(packet_with_payload(1, 200, b"B"));
        // seq 2 lost; boundary at seq 1 plus the gap satisfies prefetch=2
        let (_, frame) = buffer.add(packet_with_payload(3, 400, b"D"));
        let frame = frame.expect("two boundaries observed");
        assert_eq!(frame.data, Bytes::from_static(b"A"));
        assert_eq!(frame.timestamp, 100);
    }

    #[test]
    fn test_gap_above_limit_stalls() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 16,
            skip_audio_gaps: true,
            ..Default::default()
        });

        buffer.add(packet_with_payload(0, 100, b"A"));
        // seq 1..=4 lost, more than MAX_AUDIO_GAP
        let (_, frame) = buffer.add(packet_with_payload(5, 600, b"F"));
        assert!(frame.is_none());
    }

    #[test]
    fn test_gap_blocks_without_flag() {
        let mut buffer = audio_buffer(16);
        buffer.add(packet_with_payload(0, 100, b"A"));
        buffer.add(packet_with_payload(2, 300, b"C"));
        let (_, frame) = buffer.add(packet_with_payload(3, 400, b"D"));
        assert!(frame.is_none());
    }

    #[test]
    fn test_same_timestamp_gap_is_not_a_boundary() {
        let mut buffer = JitterBuffer::new(JitterBufferConfig {
            capacity: 16,
            skip_audio_gaps: true,
            ..Default::default()
        });

        buffer.add(packet_with_payload(0, 100, b"A"));
        // seq 1 lost but seq 2 continues the same timestamp
        let (_, frame) = buffer.add(packet_with_payload(2, 100, b"C"));
        assert!(frame.is_none());
    }
}
