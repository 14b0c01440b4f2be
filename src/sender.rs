//! Outbound RTP stamping
//!
//! Stamps outgoing payloads with the stream SSRC, a monotonically
//! increasing sequence number and the caller's timestamp, and keeps the
//! counters the RTCP sender report publishes.
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
use crate::transport::DatagramSink;
use crate::utils::{random16, random32};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Stamps and sends RTP packets for one outgoing stream
pub struct RtpSender {
    transport: Arc<dyn DatagramSink>,
    payload_type: u8,
    ssrc: u32,
    sequence_number: AtomicU32,
    packets_sent: AtomicU64,
    octets_sent: AtomicU64,
    last_timestamp: AtomicU32,
}

impl RtpSender {
    /// Create a sender; SSRC and initial sequence number are randomized
    /// unless an SSRC is supplied.
    pub fn new(transport: Arc<dyn DatagramSink>, payload_type: u8, ssrc: Option<u32>) -> Self {
        RtpSender {
            transport,
            payload_type,
            ssrc: ssrc.unwrap_or_else(random32),
            sequence_number: AtomicU32::new(u32::from(random16())),
            packets_sent: AtomicU64::new(0),
            octets_sent: AtomicU64::new(0),
            last_timestamp: AtomicU32::new(0),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Payload bytes sent, excluding RTP headers
    pub fn octets_sent(&self) -> u64 {
        self.octets_sent.load(Ordering::Relaxed)
    }

    /// RTP timestamp of the most recently sent packet
    pub fn last_timestamp(&self) -> u32 {
        self.last_timestamp.load(Ordering::Relaxed)
    }

    /// Send a media frame with the sender's payload type
    pub fn send_frame(
        &self,
        payload: &[u8],
        timestamp: u32,
        marker: bool,
        target: Option<SocketAddr>,
    ) {
        self.send_packet(self.payload_type, marker, timestamp, payload, target);
    }

    /// Stamp and send one packet; `payload_type` may differ from the
    /// sender's own (telephone events share the sequence space).
    pub(crate) fn send_packet(
        &self,
        payload_type: u8,
        marker: bool,
        timestamp: u32,
        payload: &[u8],
        target: Option<SocketAddr>,
    ) {
        let sequence_number = self.sequence_number.fetch_add(1, Ordering::Relaxed) as u16;
        let packet = RtpPacket {
            payload_type,
            marker,
            sequence_number,
            timestamp,
            ssrc: self.ssrc,
            payload: Bytes::copy_from_slice(payload),
            ..Default::default()
        };
        eprintln!("DEBUG send_packet about to call transport.send_to, target={:?}", target);
        self.transport.send_to(&packet.serialize(), target);
        eprintln!("DEBUG send_packet returned from transport.send_to");
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.octets_sent
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.last_timestamp.store(timestamp, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn set_sequence_number(&self, seq: u16) {
        self.sequence_number
            .store(u32::from(seq), Ordering::Relaxed);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CaptureSink;
    use super::*;

    #[test]
    fn test_send_frame_stamps_and_counts() {
        let sink = Arc::new(CaptureSink::default());
        let sender = RtpSender::new(sink.clone(), 0, Some(12345));

        sender.send_frame(&[0xD5; 160], 0, false, None);
        sender.send_frame(&[0xD5; 160], 160, false, None);

        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 2);
        let first = RtpPacket::parse(&sent[0]).unwrap();
        let second = RtpPacket::parse(&sent[1]).unwrap();
        assert_eq!(first.ssrc, 12345);
        assert_eq!(first.payload_type, 0);
        assert_eq!(first.payload.len(), 160);
        assert_eq!(second.sequence_number, first.sequence_number.wrapping_add(1));
        assert_eq!(second.timestamp, 160);

        assert_eq!(sender.packets_sent(), 2);
        assert_eq!(sender.octets_sent(), 320);
        assert_eq!(sender.last_timestamp(), 160);
    }

    #[test]
    fn test_sequence_number_wraps() {
        let sink = Arc::new(CaptureSink::default());
        let sender = RtpSender::new(sink.clone(), 0, Some(1));
        sender.set_sequence_number(65535);

        sender.send_frame(b"a", 0, false, None);
        sender.send_frame(b"b", 160, false, None);

        let sent = sink.sent.lock();
        assert_eq!(RtpPacket::parse(&sent[0]).unwrap().sequence_number, 65535);
        assert_eq!(RtpPacket::parse(&sent[1]).unwrap().sequence_number, 0);
    }
}
