//! Asynchronous RTP/RTCP audio endpoint
//!
//! This crate provides the transport layer for real-time audio over UDP:
//! - RTP packet parsing and construction (RFC 3550, RFC 8285 extensions)
//! - Compound RTCP reports, feedback and BYE (RFC 3550, RFC 4585)
//! - A sequence-indexed jitter buffer with frame assembly
//! - Reception statistics and NACK candidate tracking
//! - DTMF telephone events (RFC 4733)
//! - STUN Binding Request answering for ICE connectivity checks (RFC 5389)
//!
//! [`RtpSession`] ties these together: it binds an RTP/RTCP port pair,
//! demultiplexes incoming datagrams, delivers reordered audio frames and
//! DTMF digits through callbacks, and emits periodic sender reports.
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


pub mod codecs;
pub mod dtmf;
pub mod error;
pub mod jitter_buffer;
pub mod nack;
pub mod port_allocator;
pub mod rtcp;
pub mod rtp;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;
pub mod utils;

// Re-export main types
pub use codecs::{get_codec, Codec, L16Codec, PayloadType, PcmaCodec, PcmuCodec};
pub use dtmf::{DtmfEvent, DtmfReceiver, DtmfSender};
pub use error::{CodecError, PacketError, SessionError, SessionResult};
pub use jitter_buffer::{JitterBuffer, JitterBufferConfig, JitterFrame, MAX_AUDIO_GAP};
pub use nack::{NackGenerator, RTP_HISTORY_SIZE};
pub use port_allocator::PortAllocator;
pub use rtcp::{
    Goodbye, PayloadFeedback, ReceiverReport, ReceptionReport, RtcpPacket, RtpFeedback,
    SdesChunk, SenderInfo, SenderReport, SourceDescription,
};
pub use rtp::{
    is_rtcp, HeaderExtensions, HeaderExtensionsMap, RtpPacket, RTP_HEADER_LENGTH,
};
pub use sender::RtpSender;
pub use session::{AudioCallback, RtpSession, SessionConfig, SessionStats};
pub use stats::StreamStatistics;
pub use transport::{is_stun, DatagramSink, RtpTransport};

#[cfg(feature = "opus")]
pub use codecs::OpusCodec;
