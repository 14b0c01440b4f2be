//! UDP transport for RTP/RTCP with STUN connectivity-check answering
//!
//! Each transport owns one socket and a receive task that demultiplexes
//! STUN, RTCP and RTP datagrams. STUN Binding Requests are answered in
//! place with a Binding Success carrying XOR-MAPPED-ADDRESS so that ICE
//! connectivity checks pass on the media 5-tuple; everything else is
//! dispatched to the owning session through a weak handle.
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


use crate::rtp::is_rtcp;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::warn;

/// STUN magic cookie (RFC 5389)
const STUN_MAGIC: u32 = 0x2112A442;

/// STUN Binding Request / Binding Success message types
const STUN_BINDING_REQUEST: u16 = 0x0001;
const STUN_BINDING_SUCCESS: u16 = 0x0101;

/// XOR-MAPPED-ADDRESS attribute type
const STUN_ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// Fire-and-forget datagram sending.
///
/// Send errors are handled by the implementation; media and RTCP are
/// never retried.
pub trait DatagramSink: Send + Sync {
    fn send_to(&self, data: &[u8], target: Option<SocketAddr>);
}

/// Receives the demultiplexed RTP and RTCP datagrams of one session
pub(crate) trait PacketHandler: Send + Sync {
    fn handle_rtp(&self, data: &[u8]);
    fn handle_rtcp(&self, data: &[u8]);
}

/// Returns true when the datagram carries the STUN magic cookie
pub fn is_stun(data: &[u8]) -> bool {
    data.len() >= 20
        && data[0] & 0xC0 == 0
        && u32::from_be_bytes([data[4], data[5], data[6], data[7]]) == STUN_MAGIC
}

/// Build a minimal Binding Success for a Binding Request.
///
/// Only the XOR-MAPPED-ADDRESS attribute is included; the transaction id
/// is echoed verbatim. IPv6 sources are not answered.
fn stun_binding_response(request: &[u8], source: SocketAddr) -> Option<BytesMut> {
    let SocketAddr::V4(source) = source else {
        return None;
    };
    let transaction_id = &request[8..20];
    let xor_port = source.port() ^ (STUN_MAGIC >> 16) as u16;
    let xor_addr = u32::from(*source.ip()) ^ STUN_MAGIC;

    let mut buf = BytesMut::with_capacity(32);
    buf.put_u16(STUN_BINDING_SUCCESS);
    buf.put_u16(12); // one 12-byte attribute
    buf.put_u32(STUN_MAGIC);
    buf.put_slice(transaction_id);
    buf.put_u16(STUN_ATTR_XOR_MAPPED_ADDRESS);
    buf.put_u16(8);
    buf.put_u8(0);
    buf.put_u8(0x01); // IPv4 family
    buf.put_u16(xor_port);
    buf.put_u32(xor_addr);
    Some(buf)
}

/// One UDP endpoint of a session (RTP or RTCP side)
pub struct RtpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl RtpTransport {
    /// Bind a socket; a port of 0 lets the OS choose
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(RtpTransport {
            socket: Arc::new(socket),
            local_addr,
            recv_task: Mutex::new(None),
        })
    }

    /// The bound local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the receive loop, dispatching into `handler`.
    ///
    /// The loop exits when the session behind the weak handle is gone or
    /// the transport is closed.
    pub(crate) fn start(&self, handler: Weak<dyn PacketHandler>) {
        let socket = Arc::clone(&self.socket);
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let (len, source) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(err) => {
                        warn!(%err, "transport receive error");
                        break;
                    }
                };
                let data = &buf[..len];

                if is_stun(data) {
                    let message_type = u16::from_be_bytes([data[0], data[1]]);
                    if message_type == STUN_BINDING_REQUEST {
                        if let Some(response) = stun_binding_response(data, source) {
                            if let Err(err) = socket.try_send_to(&response, source) {
                                warn!(%source, %err, "failed to send STUN response");
                            }
                        }
                    }
                    continue;
                }

                let Some(handler) = handler.upgrade() else {
                    break;
                };
                if is_rtcp(data) {
                    handler.handle_rtcp(data);
                } else {
                    handler.handle_rtp(data);
                }
            }
        });
        *self.recv_task.lock() = Some(task);
    }

    /// Stop the receive loop; sending is still possible until drop
    pub fn close(&self) {
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }
    }
}

impl DatagramSink for RtpTransport {
    fn send_to(&self, data: &[u8], target: Option<SocketAddr>) {
        let Some(target) = target else {
            return;
        };
        if target.port() == 0 {
            return;
        }
        if let Err(err) = self.socket.try_send_to(data, target) {
            warn!(%target, %err, "failed to send datagram");
        }
    }
}

impl Drop for RtpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
