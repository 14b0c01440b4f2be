//! RTP session orchestration
//!
//! A session owns a pair of UDP transports (RTP and RTCP), an outbound
//! sender and the inbound chain of statistics, jitter buffer and DTMF
//! receiver. A timer task emits compound SR+SDES reports at a randomized
//! interval and a BYE is sent on close.
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


use crate::codecs::{get_codec, Codec};
use crate::dtmf::{DtmfCallback, DtmfReceiver, DtmfSender};
use crate::error::{SessionError, SessionResult};
use crate::jitter_buffer::{JitterBuffer, JitterBufferConfig};
use crate::rtcp::{
    Goodbye, RtcpPacket, SdesChunk, SenderInfo, SenderReport, SourceDescription, SDES_CNAME,
};
use crate::rtp::RtpPacket;
use crate::sender::RtpSender;
use crate::stats::StreamStatistics;
use crate::transport::{DatagramSink, PacketHandler, RtpTransport};
use crate::utils::{current_ntp_time, random32};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Callback invoked with each received audio frame (payload, timestamp)
pub type AudioCallback = Box<dyn Fn(Bytes, u32) + Send + Sync>;

/// Session parameters.
///
/// `clock_rate` is used both for DTMF timing and for reception
/// statistics. Note the G.722 quirk: its RTP clock is 8000 Hz even though
/// the audio is sampled at 16 kHz, so statistics for G.722 use the RTP
/// clock of the session rather than the audio rate.
pub struct SessionConfig {
    /// Payload type for outgoing media
    pub payload_type: u8,
    /// Codec for the media path; resolved from the payload-type registry
    /// when absent, and left unset (raw pass-through) for unknown types
    pub codec: Option<Box<dyn Codec>>,
    /// Local SSRC; randomized when absent
    pub ssrc: Option<u32>,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Payload type carrying telephone events
    pub dtmf_payload_type: u8,
    /// CNAME advertised in SDES
    pub cname: String,
    /// Base interval between sender reports, randomized per RFC 3550
    pub rtcp_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            payload_type: 0,
            codec: None,
            ssrc: None,
            clock_rate: 8000,
            dtmf_payload_type: 101,
            cname: "rtp-endpoint".to_string(),
            rtcp_interval: Duration::from_secs(5),
        }
    }
}

/// Snapshot of session counters
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub ssrc: u32,
    pub packets_sent: u64,
    pub octets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: i32,
    pub jitter: u32,
}

struct RemoteAddrs {
    rtp: SocketAddr,
    rtcp: SocketAddr,
}

struct ReceiverState {
    jitter_buffer: JitterBuffer,
    stream_stats: Option<StreamStatistics>,
    dtmf: Option<DtmfReceiver>,
    on_audio: Option<AudioCallback>,
}

struct SessionInner {
    ssrc: u32,
    clock_rate: u32,
    dtmf_payload_type: u8,
    cname: String,
    codec: Option<Mutex<Box<dyn Codec>>>,
    rtp_transport: Arc<RtpTransport>,
    rtcp_transport: Arc<RtpTransport>,
    sender: Arc<RtpSender>,
    dtmf_sender: DtmfSender,
    remote: Mutex<RemoteAddrs>,
    receiver: Mutex<ReceiverState>,
    last_sr: Mutex<Option<(u64, u32)>>,
    rtcp_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// An RTP/RTCP session bound to a local port pair
pub struct RtpSession {
    inner: Arc<SessionInner>,
}

impl RtpSession {
    /// Bind the RTP and RTCP sockets, start the receive and RTCP timer
    /// tasks, and return the live session.
    ///
    /// The RTCP socket binds the port adjacent to the RTP socket, or a
    /// second OS-assigned port when `local_addr` carries port 0. The
    /// remote RTCP address defaults to the remote RTP port plus one.
    pub async fn create(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let codec = match config.codec {
            Some(codec) => Some(codec),
            None => get_codec(config.payload_type),
        };
        let ssrc = config.ssrc.unwrap_or_else(random32);

        let rtp_transport = Arc::new(RtpTransport::bind(local_addr).await?);
        let rtcp_local = if local_addr.port() == 0 {
            SocketAddr::new(local_addr.ip(), 0)
        } else {
            SocketAddr::new(local_addr.ip(), rtp_transport.local_addr().port() + 1)
        };
        let rtcp_transport = Arc::new(RtpTransport::bind(rtcp_local).await?);

        let remote_rtcp = if remote_addr.port() == 0 {
            remote_addr
        } else {
            SocketAddr::new(remote_addr.ip(), remote_addr.port() + 1)
        };

        let sender = Arc::new(RtpSender::new(
            rtp_transport.clone() as Arc<dyn DatagramSink>,
            config.payload_type,
            Some(ssrc),
        ));
        let dtmf_sender = DtmfSender::new(
            sender.clone(),
            config.dtmf_payload_type,
            config.clock_rate,
        );

        let inner = Arc::new(SessionInner {
            ssrc,
            clock_rate: config.clock_rate,
            dtmf_payload_type: config.dtmf_payload_type,
            cname: config.cname,
            codec: codec.map(Mutex::new),
            rtp_transport,
            rtcp_transport,
            sender,
            dtmf_sender,
            remote: Mutex::new(RemoteAddrs {
                rtp: remote_addr,
                rtcp: remote_rtcp,
            }),
            receiver: Mutex::new(ReceiverState {
                jitter_buffer: JitterBuffer::new(JitterBufferConfig {
                    capacity: 16,
                    prefetch: 4,
                    ..Default::default()
                }),
                stream_stats: None,
                dtmf: None,
                on_audio: None,
            }),
            last_sr: Mutex::new(None),
            rtcp_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let inner_dyn: Arc<dyn PacketHandler> = inner.clone();
        let handler: Weak<dyn PacketHandler> = Arc::downgrade(&inner_dyn);
        inner.rtp_transport.start(handler.clone());
        inner.rtcp_transport.start(handler);

        let timer_handle = Arc::downgrade(&inner);
        *inner.rtcp_task.lock() = Some(tokio::spawn(run_rtcp_timer(
            timer_handle,
            config.rtcp_interval,
        )));

        Ok(RtpSession { inner })
    }

    /// The session's SSRC
    pub fn ssrc(&self) -> u32 {
        self.inner.ssrc
    }

    /// Local address of the RTP socket
    pub fn local_rtp_addr(&self) -> SocketAddr {
        self.inner.rtp_transport.local_addr()
    }

    /// Local address of the RTCP socket
    pub fn local_rtcp_addr(&self) -> SocketAddr {
        self.inner.rtcp_transport.local_addr()
    }

    /// Send an already-encoded payload; dropped silently once closed
    pub fn send_audio(&self, payload: &[u8], timestamp: u32) {
        if self.inner.closed.load(Ordering::Relaxed) {
            return;
        }
        let target = self.inner.remote.lock().rtp;
        self.inner
            .sender
            .send_frame(payload, timestamp, false, Some(target));
    }

    /// Encode s16le PCM with the session codec, then send
    pub fn send_audio_pcm(&self, pcm: &[u8], timestamp: u32) -> SessionResult<()> {
        let Some(codec) = &self.inner.codec else {
            return Err(SessionError::NoCodecConfigured);
        };
        let encoded = codec.lock().encode(pcm)?;
        self.send_audio(&encoded, timestamp);
        Ok(())
    }

    /// Send a DTMF digit; dropped silently once closed
    pub fn send_dtmf(
        &self,
        digit: char,
        duration_ms: u32,
        timestamp: u32,
    ) -> SessionResult<()> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Ok(());
        }
        let target = self.inner.remote.lock().rtp;
        self.inner
            .dtmf_sender
            .send_digit(digit, duration_ms, timestamp, Some(target))
    }

    /// Change the remote media destination mid-session
    pub fn update_remote(&self, addr: SocketAddr) {
        let mut remote = self.inner.remote.lock();
        remote.rtp = addr;
        remote.rtcp = SocketAddr::new(addr.ip(), addr.port().wrapping_add(1));
    }

    /// Install the audio frame callback
    pub fn on_audio(&self, callback: impl Fn(Bytes, u32) + Send + Sync + 'static) {
        self.inner.receiver.lock().on_audio = Some(Box::new(callback));
    }

    /// Install the DTMF callback; this enables telephone-event reception
    pub fn on_dtmf(&self, callback: impl Fn(char, u16) + Send + Sync + 'static) {
        let callback: DtmfCallback = Box::new(callback);
        self.inner.receiver.lock().dtmf = Some(DtmfReceiver::new(callback));
    }

    /// Snapshot of the session's counters
    pub fn stats(&self) -> SessionStats {
        let receiver = self.inner.receiver.lock();
        let (packets_received, packets_lost, jitter) = receiver
            .stream_stats
            .as_ref()
            .map(|stats| (stats.packets_received(), stats.packets_lost(), stats.jitter()))
            .unwrap_or((0, 0, 0));
        SessionStats {
            ssrc: self.inner.ssrc,
            packets_sent: self.inner.sender.packets_sent(),
            octets_sent: self.inner.sender.octets_sent(),
            packets_received,
            packets_lost,
            jitter,
        }
    }

    /// NTP and RTP timestamps from the most recent sender report received
    pub fn last_sender_report(&self) -> Option<(u64, u32)> {
        *self.inner.last_sr.lock()
    }

    /// Stop the RTCP timer, send a BYE, and shut both transports.
    ///
    /// Idempotent; safe to call from inside a callback.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.inner.rtcp_task.lock().take() {
            task.abort();
        }
        self.inner.send_bye();
        // let the BYE datagram reach the socket before shutdown
        tokio::task::yield_now().await;
        self.inner.rtp_transport.close();
        self.inner.rtcp_transport.close();
        info!(ssrc = self.inner.ssrc, "session closed");
    }
}

impl SessionInner {
    fn send_sender_report(&self) {
        let report = RtcpPacket::SenderReport(SenderReport {
            ssrc: self.ssrc,
            sender_info: SenderInfo {
                ntp_timestamp: current_ntp_time(),
                rtp_timestamp: self.sender.last_timestamp(),
                packet_count: self.sender.packets_sent() as u32,
                octet_count: self.sender.octets_sent() as u32,
            },
            reports: vec![],
        });
        let description = RtcpPacket::SourceDescription(SourceDescription {
            chunks: vec![SdesChunk {
                ssrc: self.ssrc,
                items: vec![(SDES_CNAME, Bytes::copy_from_slice(self.cname.as_bytes()))],
            }],
        });

        let mut compound = BytesMut::new();
        compound.extend_from_slice(&report.serialize());
        compound.extend_from_slice(&description.serialize());

        let target = self.remote.lock().rtcp;
        self.rtcp_transport.send_to(&compound, Some(target));
    }

    fn send_bye(&self) {
        let bye = RtcpPacket::Goodbye(Goodbye {
            sources: vec![self.ssrc],
        });
        let target = self.remote.lock().rtcp;
        self.rtcp_transport.send_to(&bye.serialize(), Some(target));
    }
}

impl PacketHandler for SessionInner {
    fn handle_rtp(&self, data: &[u8]) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let packet = match RtpPacket::parse(data) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%err, "dropping malformed RTP packet");
                return;
            }
        };

        let receiver = &mut *self.receiver.lock();

        if packet.payload_type == self.dtmf_payload_type {
            if let Some(dtmf) = receiver.dtmf.as_mut() {
                dtmf.handle_packet(&packet);
            }
            return;
        }

        let stats = receiver
            .stream_stats
            .get_or_insert_with(|| StreamStatistics::new(self.clock_rate));
        stats.add(&packet);

        let (_pli_needed, frame) = receiver.jitter_buffer.add(packet);
        let Some(frame) = frame else {
            return;
        };

        let audio = match &self.codec {
            Some(codec) => match codec.lock().decode(&frame.data) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(%err, "failed to decode audio frame");
                    return;
                }
            },
            None => frame.data,
        };

        if let Some(on_audio) = &receiver.on_audio {
            on_audio(audio, frame.timestamp);
        }
    }

    fn handle_rtcp(&self, data: &[u8]) {
        let packets = match RtcpPacket::parse(data) {
            Ok(packets) => packets,
            Err(err) => {
                warn!(%err, "dropping malformed RTCP packet");
                return;
            }
        };
        for packet in packets {
            match packet {
                RtcpPacket::SenderReport(report) => {
                    *self.last_sr.lock() = Some((
                        report.sender_info.ntp_timestamp,
                        report.sender_info.rtp_timestamp,
                    ));
                }
                RtcpPacket::Goodbye(bye) => {
                    info!(sources = ?bye.sources, "received RTCP BYE");
                }
                _ => {}
            }
        }
    }
}

/// Periodic sender-report loop; RFC 3550 simplified randomized interval
async fn run_rtcp_timer(session: Weak<SessionInner>, interval: Duration) {
    loop {
        let jittered = interval.mul_f64(0.5 + rand::random::<f64>());
        tokio::time::sleep(jittered).await;
        let Some(session) = session.upgrade() else {
            return;
        };
        if session.closed.load(Ordering::Relaxed) {
            return;
        }
        session.send_sender_report();
    }
}
