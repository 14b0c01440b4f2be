//! RTCP packet handling
//!
//! Implements RFC 3550 RTCP packet types for session control and
//! statistics, plus the RFC 4585 feedback messages (Generic NACK, PLI).
//! A datagram may carry a compound of several packets; `RtcpPacket::parse`
//! returns them all in order and serialization is byte-exact.
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


use crate::error::PacketError;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// RTCP packet types (RFC 3550 Section 6, RFC 4585 Section 6)
const RTCP_SR: u8 = 200;
const RTCP_RR: u8 = 201;
const RTCP_SDES: u8 = 202;
const RTCP_BYE: u8 = 203;
const RTCP_RTPFB: u8 = 205;
const RTCP_PSFB: u8 = 206;

/// SDES item type for the canonical end-point identifier
pub const SDES_CNAME: u8 = 1;

/// Clamp a packets-lost value into the signed 24-bit range
pub fn clamp_packets_lost(count: i64) -> i32 {
    count.clamp(-8_388_608, 8_388_607) as i32
}

/// Pack a signed packets-lost value into 3 big-endian bytes
pub fn pack_packets_lost(count: i32) -> [u8; 3] {
    let clamped = clamp_packets_lost(i64::from(count)) as u32;
    [
        (clamped >> 16) as u8,
        (clamped >> 8) as u8,
        clamped as u8,
    ]
}

/// Sign-extend 3 big-endian bytes into a packets-lost value
pub fn unpack_packets_lost(data: &[u8; 3]) -> i32 {
    let mut value =
        i32::from(data[0]) << 16 | i32::from(data[1]) << 8 | i32::from(data[2]);
    if data[0] & 0x80 != 0 {
        value -= 1 << 24;
    }
    value
}

/// Sender information block inside an SR (RFC 3550 Section 6.4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    /// 64-bit NTP timestamp
    pub ntp_timestamp: u64,
    /// RTP timestamp corresponding to the NTP timestamp
    pub rtp_timestamp: u32,
    /// Sender's packet count
    pub packet_count: u32,
    /// Sender's octet count
    pub octet_count: u32,
}

/// Reception report block (RFC 3550 Section 6.4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionReport {
    /// SSRC of the reported source
    pub ssrc: u32,
    /// Fraction of packets lost since the last report
    pub fraction_lost: u8,
    /// Cumulative packets lost, signed 24-bit
    pub packets_lost: i32,
    /// Extended highest sequence received (cycles << 16 | seq)
    pub highest_sequence: u32,
    /// Interarrival jitter
    pub jitter: u32,
    /// Last SR timestamp
    pub lsr: u32,
    /// Delay since last SR
    pub dlsr: u32,
}

/// RTCP Sender Report (RFC 3550 Section 6.4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// SSRC of the sender
    pub ssrc: u32,
    /// Sender information
    pub sender_info: SenderInfo,
    /// Reception report blocks
    pub reports: Vec<ReceptionReport>,
}

/// RTCP Receiver Report (RFC 3550 Section 6.4.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// SSRC of the receiver
    pub ssrc: u32,
    /// Reception report blocks
    pub reports: Vec<ReceptionReport>,
}

/// One SDES chunk: an SSRC and its (type, value) items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    /// SSRC or CSRC the items describe
    pub ssrc: u32,
    /// SDES items (type, value)
    pub items: Vec<(u8, Bytes)>,
}

/// RTCP Source Description (RFC 3550 Section 6.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    /// SDES chunks
    pub chunks: Vec<SdesChunk>,
}

/// RTCP Goodbye (RFC 3550 Section 6.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    /// SSRCs leaving the session
    pub sources: Vec<u32>,
}

/// RTCP transport layer feedback (RFC 4585 Section 6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFeedback {
    /// Feedback message type; 1 is Generic NACK
    pub fmt: u8,
    /// SSRC of the feedback sender
    pub ssrc: u32,
    /// SSRC of the media source the feedback is about
    pub media_ssrc: u32,
    /// Lost sequence numbers, decoded from (PID, BLP) pairs when fmt=1
    pub lost: Vec<u16>,
    /// Raw feedback control information for other formats
    pub fci: Bytes,
}

/// RTCP payload-specific feedback (RFC 4585 Section 6.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFeedback {
    /// Feedback message type; 1 is Picture Loss Indication
    pub fmt: u8,
    /// SSRC of the feedback sender
    pub ssrc: u32,
    /// SSRC of the media source the feedback is about
    pub media_ssrc: u32,
    /// Raw feedback control information (empty for PLI)
    pub fci: Bytes,
}

/// One RTCP packet of any supported type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
    RtpFeedback(RtpFeedback),
    PayloadFeedback(PayloadFeedback),
}

impl RtcpPacket {
    /// Parse a compound RTCP datagram into its packets.
    ///
    /// Unknown packet types inside the compound are skipped.
    pub fn parse(data: &[u8]) -> Result<Vec<RtcpPacket>, PacketError> {
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if data.len() < pos + 4 {
                return Err(PacketError::TruncatedPacket);
            }
            let b0 = data[pos];
            if b0 >> 6 != 2 {
                return Err(PacketError::BadVersion);
            }
            let padding = b0 & 0x20 != 0;
            let count = b0 & 0x1F;
            let packet_type = data[pos + 1];
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 4;

            let end = pos + length * 4;
            if end > data.len() {
                return Err(PacketError::TruncatedPacket);
            }
            let mut body = &data[pos..end];
            pos = end;

            if padding {
                match body.last() {
                    Some(&pad) if pad >= 1 && pad as usize <= body.len() => {
                        body = &body[..body.len() - pad as usize];
                    }
                    _ => return Err(PacketError::InvalidPadding),
                }
            }

            match packet_type {
                RTCP_SR => packets.push(RtcpPacket::SenderReport(SenderReport::parse(
                    body, count,
                )?)),
                RTCP_RR => packets.push(RtcpPacket::ReceiverReport(ReceiverReport::parse(
                    body, count,
                )?)),
                RTCP_SDES => packets.push(RtcpPacket::SourceDescription(
                    SourceDescription::parse(body, count)?,
                )),
                RTCP_BYE => packets.push(RtcpPacket::Goodbye(Goodbye::parse(body, count)?)),
                RTCP_RTPFB => {
                    packets.push(RtcpPacket::RtpFeedback(RtpFeedback::parse(body, count)?))
                }
                RTCP_PSFB => packets.push(RtcpPacket::PayloadFeedback(PayloadFeedback::parse(
                    body, count,
                )?)),
                other => debug!(packet_type = other, "ignoring unknown RTCP packet type"),
            }
        }
        Ok(packets)
    }

    /// Serialize a single RTCP packet
    pub fn serialize(&self) -> Bytes {
        match self {
            RtcpPacket::SenderReport(packet) => packet.serialize(),
            RtcpPacket::ReceiverReport(packet) => packet.serialize(),
            RtcpPacket::SourceDescription(packet) => packet.serialize(),
            RtcpPacket::Goodbye(packet) => packet.serialize(),
            RtcpPacket::RtpFeedback(packet) => packet.serialize(),
            RtcpPacket::PayloadFeedback(packet) => packet.serialize(),
        }
    }
}

/// Emit the 4-byte RTCP header for a body of `body_len` bytes
fn put_rtcp_header(buf: &mut BytesMut, count: u8, packet_type: u8, body_len: usize) {
    buf.put_u8(0x80 | (count & 0x1F));
    buf.put_u8(packet_type);
    buf.put_u16((body_len / 4) as u16);
}

fn parse_reception_report(data: &[u8]) -> ReceptionReport {
    ReceptionReport {
        ssrc: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        fraction_lost: data[4],
        packets_lost: unpack_packets_lost(&[data[5], data[6], data[7]]),
        highest_sequence: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        jitter: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
        lsr: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
        dlsr: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
    }
}

fn put_reception_report(buf: &mut BytesMut, report: &ReceptionReport) {
    buf.put_u32(report.ssrc);
    buf.put_u8(report.fraction_lost);
    buf.put_slice(&pack_packets_lost(report.packets_lost));
    buf.put_u32(report.highest_sequence);
    buf.put_u32(report.jitter);
    buf.put_u32(report.lsr);
    buf.put_u32(report.dlsr);
}

impl SenderReport {
    fn parse(data: &[u8], count: u8) -> Result<Self, PacketError> {
        if data.len() != 24 + 24 * count as usize {
            return Err(PacketError::InvalidSrLength);
        }
        let ssrc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let sender_info = SenderInfo {
            ntp_timestamp: u64::from_be_bytes([
                data[4], data[5], data[6], data[7], data[8], data[9], data[10], data[11],
            ]),
            rtp_timestamp: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            packet_count: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
            octet_count: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        };
        let reports = data[24..]
            .chunks_exact(24)
            .map(parse_reception_report)
            .collect();
        Ok(SenderReport {
            ssrc,
            sender_info,
            reports,
        })
    }

    fn serialize(&self) -> Bytes {
        let body_len = 24 + 24 * self.reports.len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        put_rtcp_header(&mut buf, self.reports.len() as u8, RTCP_SR, body_len);
        buf.put_u32(self.ssrc);
        buf.put_u64(self.sender_info.ntp_timestamp);
        buf.put_u32(self.sender_info.rtp_timestamp);
        buf.put_u32(self.sender_info.packet_count);
        buf.put_u32(self.sender_info.octet_count);
        for report in &self.reports {
            put_reception_report(&mut buf, report);
        }
        buf.freeze()
    }
}

impl ReceiverReport {
    fn parse(data: &[u8], count: u8) -> Result<Self, PacketError> {
        if data.len() != 4 + 24 * count as usize {
            return Err(PacketError::InvalidRrLength);
        }
        let ssrc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let reports = data[4..]
            .chunks_exact(24)
            .map(parse_reception_report)
            .collect();
        Ok(ReceiverReport { ssrc, reports })
    }

    fn serialize(&self) -> Bytes {
        let body_len = 4 + 24 * self.reports.len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        put_rtcp_header(&mut buf, self.reports.len() as u8, RTCP_RR, body_len);
        buf.put_u32(self.ssrc);
        for report in &self.reports {
            put_reception_report(&mut buf, report);
        }
        buf.freeze()
    }
}

impl SourceDescription {
    fn parse(data: &[u8], count: u8) -> Result<Self, PacketError> {
        let mut chunks = Vec::with_capacity(count as usize);
        let mut pos = 0;
        for _ in 0..count {
            if data.len() < pos + 4 {
                return Err(PacketError::TruncatedSource);
            }
            let ssrc =
                u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            pos += 4;
            let mut items = Vec::new();
            while pos < data.len() {
                let item_type = data[pos];
                pos += 1;
                if item_type == 0 {
                    break;
                }
                if data.len() < pos + 1 {
                    return Err(PacketError::TruncatedItem);
                }
                let length = data[pos] as usize;
                pos += 1;
                if data.len() < pos + length {
                    return Err(PacketError::TruncatedItem);
                }
                items.push((item_type, Bytes::copy_from_slice(&data[pos..pos + length])));
                pos += length;
            }
            // chunks are aligned to 32-bit boundaries
            pos = (pos + 3) & !3;
            chunks.push(SdesChunk { ssrc, items });
        }
        Ok(SourceDescription { chunks })
    }

    fn serialize(&self) -> Bytes {
        let mut body = BytesMut::new();
        for chunk in &self.chunks {
            body.put_u32(chunk.ssrc);
            for (item_type, value) in &chunk.items {
                body.put_u8(*item_type);
                body.put_u8(value.len() as u8);
                body.put_slice(value);
            }
            body.put_u8(0);
            while body.len() % 4 != 0 {
                body.put_u8(0);
            }
        }
        let mut buf = BytesMut::with_capacity(4 + body.len());
        put_rtcp_header(&mut buf, self.chunks.len() as u8, RTCP_SDES, body.len());
        buf.put_slice(&body);
        buf.freeze()
    }
}

impl Goodbye {
    fn parse(data: &[u8], count: u8) -> Result<Self, PacketError> {
        if data.len() < 4 * count as usize {
            return Err(PacketError::InvalidByeLength);
        }
        let sources = data[..4 * count as usize]
            .chunks_exact(4)
            .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        // an optional reason string may follow; it is not retained
        Ok(Goodbye { sources })
    }

    fn serialize(&self) -> Bytes {
        let body_len = 4 * self.sources.len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        put_rtcp_header(&mut buf, self.sources.len() as u8, RTCP_BYE, body_len);
        for source in &self.sources {
            buf.put_u32(*source);
        }
        buf.freeze()
    }
}

impl RtpFeedback {
    fn parse(data: &[u8], fmt: u8) -> Result<Self, PacketError> {
        if data.len() < 8 {
            return Err(PacketError::InvalidRtpfbLength);
        }
        let ssrc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let media_ssrc = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let mut lost = Vec::new();
        let mut fci = Bytes::new();
        if fmt == 1 {
            for pair in data[8..].chunks_exact(4) {
                let pid = u16::from_be_bytes([pair[0], pair[1]]);
                let blp = u16::from_be_bytes([pair[2], pair[3]]);
                lost.push(pid);
                for bit in 0..16 {
                    if blp >> bit & 1 != 0 {
                        lost.push(pid.wrapping_add(bit + 1));
                    }
                }
            }
        } else {
            fci = Bytes::copy_from_slice(&data[8..]);
        }
        Ok(RtpFeedback {
            fmt,
            ssrc,
            media_ssrc,
            lost,
            fci,
        })
    }

    fn serialize(&self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u32(self.ssrc);
        body.put_u32(self.media_ssrc);
        if self.fmt == 1 {
            for (pid, blp) in encode_nack_pairs(&self.lost) {
                body.put_u16(pid);
                body.put_u16(blp);
            }
        } else {
            body.put_slice(&self.fci);
        }
        let mut buf = BytesMut::with_capacity(4 + body.len());
        put_rtcp_header(&mut buf, self.fmt, RTCP_RTPFB, body.len());
        buf.put_slice(&body);
        buf.freeze()
    }
}

/// Group lost sequence numbers into (PID, BLP) pairs
fn encode_nack_pairs(lost: &[u16]) -> Vec<(u16, u16)> {
    let mut pairs: Vec<(u16, u16)> = Vec::new();
    for &seq in lost {
        if let Some((pid, blp)) = pairs.last_mut() {
            let delta = seq.wrapping_sub(*pid);
            if (1..=16).contains(&delta) {
                *blp |= 1 << (delta - 1);
                continue;
            }
        }
        pairs.push((seq, 0));
    }
    pairs
}

impl PayloadFeedback {
    fn parse(data: &[u8], fmt: u8) -> Result<Self, PacketError> {
        if data.len() < 8 {
            return Err(PacketError::InvalidPsfbLength);
        }
        Ok(PayloadFeedback {
            fmt,
            ssrc: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            media_ssrc: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            fci: Bytes::copy_from_slice(&data[8..]),
        })
    }

    fn serialize(&self) -> Bytes {
        let body_len = 8 + self.fci.len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        put_rtcp_header(&mut buf, self.fmt, RTCP_PSFB, body_len);
        buf.put_u32(self.ssrc);
        buf.put_u32(self.media_ssrc);
        buf.put_slice(&self.fci);
        buf.freeze()
    }
}
