//! Error types for the RTP endpoint
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


use thiserror::Error;

/// Result type for session-level operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Wire-format parse failures.
///
/// These never propagate out of the receive loop: malformed datagrams are
/// logged at warning level and dropped. When the parsers are called
/// directly, the failure is returned to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Packet is shorter than its fixed header or declared length
    #[error("packet is truncated")]
    TruncatedPacket,

    /// Version field is not 2
    #[error("packet has invalid version")]
    BadVersion,

    /// Padding length byte is zero or exceeds the remaining payload
    #[error("packet padding length is invalid")]
    InvalidPadding,

    /// CSRC list extends past the end of the packet
    #[error("RTP packet has truncated CSRC")]
    TruncatedCsrc,

    /// Header extension block extends past the end of the packet
    #[error("RTP packet has truncated extension")]
    TruncatedExtension,

    /// Sender report length does not match its report count
    #[error("RTCP sender report length is invalid")]
    InvalidSrLength,

    /// Receiver report length does not match its report count
    #[error("RTCP receiver report length is invalid")]
    InvalidRrLength,

    /// BYE packet is shorter than its source count requires
    #[error("RTCP bye length is invalid")]
    InvalidByeLength,

    /// RTP feedback packet is shorter than two words
    #[error("RTCP RTP feedback length is invalid")]
    InvalidRtpfbLength,

    /// Payload-specific feedback packet is shorter than two words
    #[error("RTCP payload-specific feedback length is invalid")]
    InvalidPsfbLength,

    /// SDES item header or value extends past the chunk
    #[error("RTCP SDES item is truncated")]
    TruncatedItem,

    /// SDES chunk is missing its SSRC
    #[error("RTCP SDES source is truncated")]
    TruncatedSource,

    /// Telephone-event payload is shorter than 4 bytes
    #[error("DTMF event payload is truncated")]
    InvalidDtmfPayload,
}

/// Codec encode/decode failure
#[derive(Error, Debug, Clone)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

/// Errors surfaced by the session API
#[derive(Error, Debug)]
pub enum SessionError {
    /// Wire-format parse failure
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// Character is not a DTMF digit (0-9, *, #, A-D)
    #[error("invalid DTMF digit: {0:?}")]
    InvalidDtmfDigit(char),

    /// `send_audio_pcm` called on a session without a codec
    #[error("no codec configured for PCM encoding")]
    NoCodecConfigured,

    /// Codec encode/decode failure
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No free RTP/RTCP port pair in the configured range
    #[error("no available port pair in range")]
    PortExhausted,

    /// Socket error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}
