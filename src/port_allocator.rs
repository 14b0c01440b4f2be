//! RTP/RTCP port-pair allocation
//!
//! RTP conventionally uses an even port with RTCP on the adjacent odd
//! port. The allocator walks even ports in its range, probes availability
//! by binding both sockets, and hands out (rtp, rtcp) pairs.
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


use crate::error::{SessionError, SessionResult};
use std::collections::HashSet;
use std::net::UdpSocket;
use tokio::sync::Mutex;

/// Hands out even/odd UDP port pairs from a configured range
pub struct PortAllocator {
    min_port: u16,
    max_port: u16,
    allocated: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Allocate pairs from `[min_port, max_port)`; an odd minimum is
    /// rounded up to the next even port.
    pub fn new(min_port: u16, max_port: u16) -> Self {
        PortAllocator {
            min_port: min_port + (min_port % 2),
            max_port,
            allocated: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate a free (rtp_port, rtcp_port) pair where rtcp = rtp + 1
    pub async fn allocate(&self) -> SessionResult<(u16, u16)> {
        let mut allocated = self.allocated.lock().await;
        for port in (self.min_port..self.max_port).step_by(2) {
            if allocated.contains(&port) {
                continue;
            }
            // both sockets must bind at once to prove the pair is free
            let rtp_probe = UdpSocket::bind(("0.0.0.0", port));
            let Ok(_rtp) = rtp_probe else { continue };
            let rtcp_probe = UdpSocket::bind(("0.0.0.0", port + 1));
            let Ok(_rtcp) = rtcp_probe else { continue };
            allocated.insert(port);
            return Ok((port, port + 1));
        }
        Err(SessionError::PortExhausted)
    }

    /// Release a previously allocated pair by its RTP port
    pub async fn release(&self, rtp_port: u16) {
        self.allocated.lock().await.remove(&rtp_port);
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        PortAllocator::new(10000, 20000)
    }
}
