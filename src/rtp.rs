//! RTP packet handling
//!
//! Implements RFC 3550 RTP packet parsing and construction, RFC 8285
//! one-byte and two-byte header extensions, and the RTP/RTCP demux
//! predicate used on a shared port.
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
use std::collections::HashMap;

/// Minimum RTP header size (12 bytes)
pub const RTP_HEADER_LENGTH: usize = 12;

/// Returns true if the datagram looks like RTCP rather than RTP.
///
/// The payload-type field of the second byte, with the marker bit masked
/// off, falls in `64..=95` for every RTCP packet type (SR=200, RR=201,
/// SDES=202, BYE=203, APP=204, RTPFB=205, PSFB=206).
pub fn is_rtcp(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let pt = data[1] & 0x7F;
    (64..=95).contains(&pt)
}

/// Well-known header extension URIs (RFC 8285 registrations)
pub mod extension_uri {
    pub const AUDIO_LEVEL: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
    pub const ABS_SEND_TIME: &str =
        "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
    pub const MID: &str = "urn:ietf:params:rtp-hdrext:sdes:mid";
    pub const TRANSMISSION_OFFSET: &str = "urn:ietf:params:rtp-hdrext:toffset";
    pub const TRANSPORT_SEQUENCE_NUMBER: &str =
        "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
    pub const VIDEO_ROTATION: &str = "urn:3gpp:video-orientation";
    pub const PLAYOUT_DELAY: &str =
        "http://www.webrtc.org/experiments/rtp-hdrext/playout-delay";
    pub const RTP_STREAM_ID: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";
    pub const REPAIRED_RTP_STREAM_ID: &str =
        "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id";
}

/// Typed view of the header extensions carried by one packet.
///
/// Extension ids the map does not know about are preserved verbatim in
/// `other` so that serialization does not lose them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderExtensions {
    /// Mute flag and 7-bit audio level
    pub audio_level: Option<(bool, u8)>,
    /// 24-bit absolute send time
    pub abs_send_time: Option<u32>,
    /// Media identification tag
    pub mid: Option<String>,
    /// Signed 24-bit transmission time offset
    pub transmission_offset: Option<i32>,
    /// Transport-wide congestion control sequence number
    pub transport_sequence_number: Option<u16>,
    /// Coordination-of-video-orientation byte
    pub video_rotation: Option<u8>,
    /// Playout delay limits (12-bit min, 12-bit max)
    pub playout_delay: Option<(u16, u16)>,
    /// RTP stream identifier
    pub rtp_stream_id: Option<String>,
    /// Repaired RTP stream identifier
    pub repaired_rtp_stream_id: Option<String>,
    /// Extensions with ids the map does not resolve
    pub other: Vec<(u8, Bytes)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtensionKind {
    AudioLevel,
    AbsSendTime,
    Mid,
    TransmissionOffset,
    TransportSequenceNumber,
    VideoRotation,
    PlayoutDelay,
    RtpStreamId,
    RepairedRtpStreamId,
}

fn kind_for_uri(uri: &str) -> Option<ExtensionKind> {
    match uri {
        extension_uri::AUDIO_LEVEL => Some(ExtensionKind::AudioLevel),
        extension_uri::ABS_SEND_TIME => Some(ExtensionKind::AbsSendTime),
        extension_uri::MID => Some(ExtensionKind::Mid),
        extension_uri::TRANSMISSION_OFFSET => Some(ExtensionKind::TransmissionOffset),
        extension_uri::TRANSPORT_SEQUENCE_NUMBER => {
            Some(ExtensionKind::TransportSequenceNumber)
        }
        extension_uri::VIDEO_ROTATION => Some(ExtensionKind::VideoRotation),
        extension_uri::PLAYOUT_DELAY => Some(ExtensionKind::PlayoutDelay),
        extension_uri::RTP_STREAM_ID => Some(ExtensionKind::RtpStreamId),
        extension_uri::REPAIRED_RTP_STREAM_ID => Some(ExtensionKind::RepairedRtpStreamId),
        _ => None,
    }
}

/// Maps numeric header-extension ids to well-known URIs and back.
///
/// Ids 1-14 fit the one-byte form; ids up to 255 force the two-byte form.
/// Extensions are only interpreted when a map resolves their id; an empty
/// map still round-trips every extension through
/// [`HeaderExtensions::other`].
#[derive(Debug, Clone, Default)]
pub struct HeaderExtensionsMap {
    ids: HashMap<u8, ExtensionKind>,
}

impl HeaderExtensionsMap {
    /// Register (id, uri) pairs; unknown URIs are ignored
    pub fn configure(&mut self, entries: &[(u8, &str)]) {
        for (id, uri) in entries {
            if let Some(kind) = kind_for_uri(uri) {
                self.ids.insert(*id, kind);
            }
        }
    }

    fn id_for(&self, kind: ExtensionKind) -> Option<u8> {
        self.ids
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(id, _)| *id)
    }

    /// Decode a raw extension block into typed values
    pub fn decode(&self, profile: u16, body: &[u8]) -> Result<HeaderExtensions, PacketError> {
        let mut values = HeaderExtensions::default();
        for (id, value) in unpack_header_extensions(profile, body)? {
            match self.ids.get(&id) {
                Some(ExtensionKind::AudioLevel) if value.len() == 1 => {
                    values.audio_level = Some((value[0] & 0x80 != 0, value[0] & 0x7F));
                }
                Some(ExtensionKind::AbsSendTime) if value.len() == 3 => {
                    values.abs_send_time =
                        Some(u32::from(value[0]) << 16 | u32::from(value[1]) << 8 | u32::from(value[2]));
                }
                Some(ExtensionKind::Mid) => {
                    values.mid = Some(String::from_utf8_lossy(&value).into_owned());
                }
                Some(ExtensionKind::TransmissionOffset) if value.len() == 3 => {
                    values.transmission_offset = Some(sign_extend_24(
                        u32::from(value[0]) << 16 | u32::from(value[1]) << 8 | u32::from(value[2]),
                    ));
                }
                Some(ExtensionKind::TransportSequenceNumber) if value.len() == 2 => {
                    values.transport_sequence_number =
                        Some(u16::from_be_bytes([value[0], value[1]]));
                }
                Some(ExtensionKind::VideoRotation) if value.len() == 1 => {
                    values.video_rotation = Some(value[0]);
                }
                Some(ExtensionKind::PlayoutDelay) if value.len() == 3 => {
                    let min = u16::from(value[0]) << 4 | u16::from(value[1]) >> 4;
                    let max = u16::from(value[1] & 0x0F) << 8 | u16::from(value[2]);
                    values.playout_delay = Some((min, max));
                }
                Some(ExtensionKind::RtpStreamId) => {
                    values.rtp_stream_id = Some(String::from_utf8_lossy(&value).into_owned());
                }
                Some(ExtensionKind::RepairedRtpStreamId) => {
                    values.repaired_rtp_stream_id =
                        Some(String::from_utf8_lossy(&value).into_owned());
                }
                _ => values.other.push((id, value)),
            }
        }
        Ok(values)
    }

    /// Encode typed values into a raw extension block
    pub fn encode(&self, values: &HeaderExtensions) -> (u16, Bytes) {
        let mut entries: Vec<(u8, Bytes)> = Vec::new();
        if let (Some((muted, level)), Some(id)) =
            (values.audio_level, self.id_for(ExtensionKind::AudioLevel))
        {
            let byte = if muted { 0x80 | (level & 0x7F) } else { level & 0x7F };
            entries.push((id, Bytes::copy_from_slice(&[byte])));
        }
        if let (Some(time), Some(id)) =
            (values.abs_send_time, self.id_for(ExtensionKind::AbsSendTime))
        {
            entries.push((id, Bytes::copy_from_slice(&time.to_be_bytes()[1..4])));
        }
        if let (Some(mid), Some(id)) = (&values.mid, self.id_for(ExtensionKind::Mid)) {
            entries.push((id, Bytes::copy_from_slice(mid.as_bytes())));
        }
        if let (Some(offset), Some(id)) = (
            values.transmission_offset,
            self.id_for(ExtensionKind::TransmissionOffset),
        ) {
            entries.push((id, Bytes::copy_from_slice(&offset.to_be_bytes()[1..4])));
        }
        if let (Some(seq), Some(id)) = (
            values.transport_sequence_number,
            self.id_for(ExtensionKind::TransportSequenceNumber),
        ) {
            entries.push((id, Bytes::copy_from_slice(&seq.to_be_bytes())));
        }
        if let (Some(rotation), Some(id)) = (
            values.video_rotation,
            self.id_for(ExtensionKind::VideoRotation),
        ) {
            entries.push((id, Bytes::copy_from_slice(&[rotation])));
        }
        if let (Some((min, max)), Some(id)) = (
            values.playout_delay,
            self.id_for(ExtensionKind::PlayoutDelay),
        ) {
            let packed = [
                (min >> 4) as u8,
                ((min & 0x0F) << 4) as u8 | (max >> 8) as u8,
                max as u8,
            ];
            entries.push((id, Bytes::copy_from_slice(&packed)));
        }
        if let (Some(rid), Some(id)) = (
            &values.rtp_stream_id,
            self.id_for(ExtensionKind::RtpStreamId),
        ) {
            entries.push((id, Bytes::copy_from_slice(rid.as_bytes())));
        }
        if let (Some(rid), Some(id)) = (
            &values.repaired_rtp_stream_id,
            self.id_for(ExtensionKind::RepairedRtpStreamId),
        ) {
            entries.push((id, Bytes::copy_from_slice(rid.as_bytes())));
        }
        entries.extend(values.other.iter().cloned());
        pack_header_extensions(&entries)
    }
}

fn sign_extend_24(value: u32) -> i32 {
    if value & 0x0080_0000 != 0 {
        (value | 0xFF00_0000) as i32
    } else {
        value as i32
    }
}

/// Decode an extension block into raw (id, value) pairs.
///
/// Profile `0xBEDE` selects the one-byte form where id 0 is padding and
/// id 15 terminates; profiles `0x1000..=0x100F` select the two-byte form.
/// Any other profile yields no extensions.
pub fn unpack_header_extensions(
    profile: u16,
    body: &[u8],
) -> Result<Vec<(u8, Bytes)>, PacketError> {
    let mut extensions = Vec::new();
    if profile == 0xBEDE {
        let mut pos = 0;
        while pos < body.len() {
            if body[pos] == 0 {
                pos += 1;
                continue;
            }
            let id = body[pos] >> 4;
            if id == 15 {
                break;
            }
            let length = (body[pos] & 0x0F) as usize + 1;
            pos += 1;
            if body.len() < pos + length {
                return Err(PacketError::TruncatedExtension);
            }
            extensions.push((id, Bytes::copy_from_slice(&body[pos..pos + length])));
            pos += length;
        }
    } else if profile & 0xFFF0 == 0x1000 {
        let mut pos = 0;
        while pos < body.len() {
            if body[pos] == 0 {
                pos += 1;
                continue;
            }
            if body.len() < pos + 2 {
                return Err(PacketError::TruncatedExtension);
            }
            let id = body[pos];
            let length = body[pos + 1] as usize;
            pos += 2;
            if body.len() < pos + length {
                return Err(PacketError::TruncatedExtension);
            }
            extensions.push((id, Bytes::copy_from_slice(&body[pos..pos + length])));
            pos += length;
        }
    }
    Ok(extensions)
}

/// Encode raw (id, value) pairs into an extension block.
///
/// The one-byte form is used unless some id exceeds 14 or some value
/// length falls outside 1..=16. The block is zero-padded to a 32-bit
/// boundary.
pub fn pack_header_extensions(extensions: &[(u8, Bytes)]) -> (u16, Bytes) {
    if extensions.is_empty() {
        return (0, Bytes::new());
    }
    let one_byte = extensions
        .iter()
        .all(|(id, value)| *id >= 1 && *id <= 14 && !value.is_empty() && value.len() <= 16);

    let mut body = BytesMut::new();
    let profile = if one_byte {
        for (id, value) in extensions {
            body.put_u8((id << 4) | (value.len() as u8 - 1));
            body.put_slice(value);
        }
        0xBEDE
    } else {
        for (id, value) in extensions {
            body.put_u8(*id);
            body.put_u8(value.len() as u8);
            body.put_slice(value);
        }
        0x1000
    };
    while body.len() % 4 != 0 {
        body.put_u8(0);
    }
    (profile, body.freeze())
}

/// Complete RTP packet (RFC 3550 Section 5.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// RTP version (must be 2)
    pub version: u8,
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number (16 bits)
    pub sequence_number: u16,
    /// Timestamp (32 bits)
    pub timestamp: u32,
    /// SSRC (synchronization source) identifier
    pub ssrc: u32,
    /// CSRC (contributing source) identifiers, at most 15
    pub csrc: Vec<u32>,
    /// Header extensions
    pub extensions: HeaderExtensions,
    /// Number of trailing padding bytes stripped during parse
    pub padding_size: usize,
    /// Payload data
    pub payload: Bytes,
}

impl Default for RtpPacket {
    fn default() -> Self {
        RtpPacket {
            version: 2,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
            extensions: HeaderExtensions::default(),
            padding_size: 0,
            payload: Bytes::new(),
        }
    }
}

impl RtpPacket {
    /// Create a packet with the fields the send path stamps
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        payload: Bytes,
    ) -> Self {
        RtpPacket {
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload,
            ..Default::default()
        }
    }

    /// Parse an RTP packet, keeping unrecognized extensions opaque
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        Self::parse_with_map(data, &HeaderExtensionsMap::default())
    }

    /// Parse an RTP packet, resolving extensions through `map`
    pub fn parse_with_map(
        data: &[u8],
        map: &HeaderExtensionsMap,
    ) -> Result<Self, PacketError> {
        if data.len() < RTP_HEADER_LENGTH {
            return Err(PacketError::TruncatedPacket);
        }

        let b0 = data[0];
        let version = b0 >> 6;
        if version != 2 {
            return Err(PacketError::BadVersion);
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut pos = RTP_HEADER_LENGTH;
        if data.len() < pos + 4 * csrc_count {
            return Err(PacketError::TruncatedCsrc);
        }
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrc.push(u32::from_be_bytes([
                data[pos],
                data[pos + 1],
                data[pos + 2],
                data[pos + 3],
            ]));
            pos += 4;
        }

        let extensions = if extension {
            if data.len() < pos + 4 {
                return Err(PacketError::TruncatedExtension);
            }
            let profile = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize * 4;
            pos += 4;
            if data.len() < pos + length {
                return Err(PacketError::TruncatedExtension);
            }
            let values = map.decode(profile, &data[pos..pos + length])?;
            pos += length;
            values
        } else {
            HeaderExtensions::default()
        };

        let mut payload_end = data.len();
        let mut padding_size = 0;
        if padding {
            let count = data[data.len() - 1] as usize;
            if count == 0 || count > data.len() - pos {
                return Err(PacketError::InvalidPadding);
            }
            padding_size = count;
            payload_end -= count;
        }

        Ok(RtpPacket {
            version,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extensions,
            padding_size,
            payload: Bytes::copy_from_slice(&data[pos..payload_end]),
        })
    }

    /// Serialize, keeping unrecognized extensions opaque
    pub fn serialize(&self) -> Bytes {
        self.serialize_with_map(&HeaderExtensionsMap::default())
    }

    /// Serialize, resolving extension ids through `map`
    pub fn serialize_with_map(&self, map: &HeaderExtensionsMap) -> Bytes {
        let (ext_profile, ext_body) = map.encode(&self.extensions);
        let has_extension = !ext_body.is_empty();

        let mut buf = BytesMut::with_capacity(
            RTP_HEADER_LENGTH
                + 4 * self.csrc.len()
                + if has_extension { 4 + ext_body.len() } else { 0 }
                + self.payload.len()
                + self.padding_size,
        );

        let mut b0 = (self.version & 0x03) << 6;
        if self.padding_size > 0 {
            b0 |= 0x20;
        }
        if has_extension {
            b0 |= 0x10;
        }
        b0 |= self.csrc.len() as u8 & 0x0F;
        buf.put_u8(b0);

        let mut b1 = self.payload_type & 0x7F;
        if self.marker {
            b1 |= 0x80;
        }
        buf.put_u8(b1);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if has_extension {
            buf.put_u16(ext_profile);
            buf.put_u16((ext_body.len() / 4) as u16);
            buf.put_slice(&ext_body);
        }

        buf.put_slice(&self.payload);
        if self.padding_size > 0 {
            buf.put_bytes(0, self.padding_size - 1);
            buf.put_u8(self.padding_size as u8);
        }
        buf.freeze()
    }
}
