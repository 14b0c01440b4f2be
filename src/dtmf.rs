//! DTMF telephone-event handling (RFC 4733)
//!
//! Covers the 4-byte telephone-event payload, the receiver state machine
//! that collapses redundant end packets into a single callback, and the
//! sender that emits a progress/end packet train for a digit.
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


use crate::error::{PacketError, SessionError};
use crate::rtp::RtpPacket;
use crate::sender::RtpSender;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// Digits in event-code order: code 0 is "0", code 11 is "#", code 15 is "D"
const DTMF_DIGITS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', '#', 'A', 'B', 'C', 'D',
];

/// Volume used for generated events, in -dBm0
const DTMF_VOLUME: u8 = 10;

/// Spacing of progress packets: one every 20 ms
const DTMF_STEP_MS: u32 = 20;

fn event_code(digit: char) -> Option<u8> {
    let digit = digit.to_ascii_uppercase();
    DTMF_DIGITS
        .iter()
        .position(|&known| known == digit)
        .map(|code| code as u8)
}

/// RFC 4733 telephone-event payload (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfEvent {
    /// Event code, 0-15 for DTMF digits
    pub event: u8,
    /// Set on the final packets of an event
    pub end: bool,
    /// Volume in -dBm0 (6 bits)
    pub volume: u8,
    /// Cumulative duration in timestamp units
    pub duration: u16,
}

impl DtmfEvent {
    pub fn serialize(&self) -> [u8; 4] {
        let flags = if self.end { 0x80 } else { 0x00 } | (self.volume & 0x3F);
        let duration = self.duration.to_be_bytes();
        [self.event, flags, duration[0], duration[1]]
    }

    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < 4 {
            return Err(PacketError::InvalidDtmfPayload);
        }
        Ok(DtmfEvent {
            event: data[0],
            end: data[1] & 0x80 != 0,
            volume: data[1] & 0x3F,
            duration: u16::from_be_bytes([data[2], data[3]]),
        })
    }

    /// The keypad digit this event encodes, or '?' for non-DTMF events
    pub fn digit(&self) -> char {
        DTMF_DIGITS
            .get(self.event as usize)
            .copied()
            .unwrap_or('?')
    }
}

/// Callback invoked once per completed digit with (digit, duration)
pub type DtmfCallback = Box<dyn Fn(char, u16) + Send + Sync>;

/// Collapses incoming telephone-event packets into digit callbacks.
///
/// A new RTP timestamp starts a new digit; the callback fires on the
/// first end packet and the redundant end retransmissions are ignored.
pub struct DtmfReceiver {
    on_dtmf: DtmfCallback,
    current_event: Option<u8>,
    current_timestamp: Option<u32>,
    end_seen: bool,
}

impl DtmfReceiver {
    pub fn new(on_dtmf: DtmfCallback) -> Self {
        DtmfReceiver {
            on_dtmf,
            current_event: None,
            current_timestamp: None,
            end_seen: false,
        }
    }

    pub fn handle_packet(&mut self, packet: &RtpPacket) {
        let event = match DtmfEvent::parse(&packet.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "dropping telephone-event packet");
                return;
            }
        };

        if Some(packet.timestamp) != self.current_timestamp {
            self.current_event = Some(event.event);
            self.current_timestamp = Some(packet.timestamp);
            self.end_seen = false;
        }

        if event.end && !self.end_seen {
            self.end_seen = true;
            (self.on_dtmf)(event.digit(), event.duration);
        }
    }
}

/// Generates the RFC 4733 packet train for outgoing digits
pub struct DtmfSender {
    sender: Arc<RtpSender>,
    payload_type: u8,
    clock_rate: u32,
}

impl DtmfSender {
    pub fn new(sender: Arc<RtpSender>, payload_type: u8, clock_rate: u32) -> Self {
        DtmfSender {
            sender,
            payload_type,
            clock_rate,
        }
    }

    /// Send one digit: progress packets every 20 ms of event time, then
    /// three redundant end packets (RFC 4733 Section 2.5.1.4), the first
    /// with the marker bit. All packets share the starting timestamp.
    pub fn send_digit(
        &self,
        digit: char,
        duration_ms: u32,
        timestamp: u32,
        target: Option<SocketAddr>,
    ) -> Result<(), SessionError> {
        let event = event_code(digit).ok_or(SessionError::InvalidDtmfDigit(digit))?;

        let duration_samples = duration_ms * self.clock_rate / 1000;
        let step_samples = DTMF_STEP_MS * self.clock_rate / 1000;

        let mut elapsed = step_samples;
        while elapsed < duration_samples {
            let progress = DtmfEvent {
                event,
                end: false,
                volume: DTMF_VOLUME,
                duration: elapsed.min(u32::from(u16::MAX)) as u16,
            };
            self.sender
                .send_packet(self.payload_type, false, timestamp, &progress.serialize(), target);
            elapsed += step_samples;
        }

        let end = DtmfEvent {
            event,
            end: true,
            volume: DTMF_VOLUME,
            duration: duration_samples.min(u32::from(u16::MAX)) as u16,
        };
        for index in 0..3 {
            self.sender
                .send_packet(self.payload_type, index == 0, timestamp, &end.serialize(), target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::test_support::CaptureSink;
    use bytes::Bytes;
    use parking_lot::Mutex;

    fn event_packet(seq: u16, timestamp: u32, event: DtmfEvent) -> RtpPacket {
        RtpPacket {
            payload_type: 101,
            sequence_number: seq,
            timestamp,
            payload: Bytes::copy_from_slice(&event.serialize()),
            ..Default::default()
        }
    }

    #[test]
    fn test_event_roundtrip() {
        let event = DtmfEvent {
            event: 1,
            end: false,
            volume: 10,
            duration: 400,
        };
        let data = event.serialize();
        assert_eq!(data.len(), 4);
        assert_eq!(DtmfEvent::parse(&data).unwrap(), event);
    }

    #[test]
    fn test_event_end_flag() {
        let event = DtmfEvent {
            event: 5,
            end: true,
            volume: 10,
            duration: 1280,
        };
        let parsed = DtmfEvent::parse(&event.serialize()).unwrap();
        assert!(parsed.end);
        assert_eq!(parsed.event, 5);
        assert_eq!(parsed.duration, 1280);
    }

    #[test]
    fn test_event_digits() {
        for (code, &digit) in DTMF_DIGITS.iter().enumerate() {
            let event = DtmfEvent {
                event: code as u8,
                end: false,
                volume: 10,
                duration: 100,
            };
            assert_eq!(event.digit(), digit);
        }
    }

    #[test]
    fn test_event_too_short() {
        assert_eq!(
            DtmfEvent::parse(&[0x00, 0x00]),
            Err(PacketError::InvalidDtmfPayload)
        );
    }

    fn collecting_receiver() -> (DtmfReceiver, Arc<Mutex<Vec<(char, u16)>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let receiver = DtmfReceiver::new(Box::new(move |digit, duration| {
            sink.lock().push((digit, duration));
        }));
        (receiver, received)
    }

    #[test]
    fn test_receive_digit() {
        let (mut receiver, received) = collecting_receiver();

        receiver.handle_packet(&event_packet(
            100,
            1000,
            DtmfEvent {
                event: 1,
                end: false,
                volume: 10,
                duration: 400,
            },
        ));
        assert!(received.lock().is_empty());

        receiver.handle_packet(&event_packet(
            101,
            1000,
            DtmfEvent {
                event: 1,
                end: true,
                volume: 10,
                duration: 1280,
            },
        ));
        assert_eq!(*received.lock(), vec![('1', 1280)]);
    }

    #[test]
    fn test_redundant_end_packets_fire_once() {
        let (mut receiver, received) = collecting_receiver();

        for seq in 100..103 {
            receiver.handle_packet(&event_packet(
                seq,
                2000,
                DtmfEvent {
                    event: 5,
                    end: true,
                    volume: 10,
                    duration: 1280,
                },
            ));
        }

        assert_eq!(*received.lock(), vec![('5', 1280)]);
    }

    #[test]
    fn test_two_digits() {
        let (mut receiver, received) = collecting_receiver();

        receiver.handle_packet(&event_packet(
            100,
            1000,
            DtmfEvent {
                event: 1,
                end: true,
                volume: 10,
                duration: 1280,
            },
        ));
        receiver.handle_packet(&event_packet(
            101,
            2000,
            DtmfEvent {
                event: 2,
                end: true,
                volume: 10,
                duration: 1280,
            },
        ));

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].0, '1');
        assert_eq!(received[1].0, '2');
    }

    #[test]
    fn test_send_digit_packet_train() {
        let sink = Arc::new(CaptureSink::default());
        let sender = Arc::new(RtpSender::new(sink.clone(), 0, Some(12345)));
        let dtmf = DtmfSender::new(sender.clone(), 101, 8000);

        dtmf.send_digit('1', 160, 0, None).unwrap();

        let sent = sink.sent.lock();
        // 160 ms at 20 ms steps: 7 progress packets, then 3 end packets
        assert_eq!(sent.len(), 10);

        for (index, data) in sent.iter().enumerate() {
            let packet = RtpPacket::parse(data).unwrap();
            assert_eq!(packet.payload_type, 101);
            assert_eq!(packet.timestamp, 0);
            let event = DtmfEvent::parse(&packet.payload).unwrap();
            assert_eq!(event.event, 1);
            if index < 7 {
                assert!(!event.end);
                assert_eq!(event.duration, 160 * (index as u16 + 1));
                assert!(!packet.marker);
            } else {
                assert!(event.end);
                assert_eq!(event.duration, 1280);
                assert_eq!(packet.marker, index == 7);
            }
        }

        // sequence numbers advance across the train
        let first = RtpPacket::parse(&sent[0]).unwrap().sequence_number;
        let last = RtpPacket::parse(&sent[9]).unwrap().sequence_number;
        assert_eq!(last, first.wrapping_add(9));

        assert_eq!(sender.packets_sent(), 10);
        assert_eq!(sender.octets_sent(), 40);
    }

    #[test]
    fn test_send_invalid_digit() {
        let sink = Arc::new(CaptureSink::default());
        let sender = Arc::new(RtpSender::new(sink.clone(), 0, Some(12345)));
        let dtmf = DtmfSender::new(sender, 101, 8000);

        assert!(matches!(
            dtmf.send_digit('x', 160, 0, None),
            Err(SessionError::InvalidDtmfDigit('x'))
        ));
        assert!(sink.sent.lock().is_empty());
    }

    #[test]
    fn test_lowercase_letter_digits_accepted() {
        let sink = Arc::new(CaptureSink::default());
        let sender = Arc::new(RtpSender::new(sink.clone(), 0, Some(12345)));
        let dtmf = DtmfSender::new(sender, 101, 8000);

        dtmf.send_digit('a', 40, 0, None).unwrap();
        let sent = sink.sent.lock();
        let event = DtmfEvent::parse(&RtpPacket::parse(&sent[0]).unwrap().payload).unwrap();
        assert_eq!(event.event, 12);
    }
}
