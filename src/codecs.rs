//! Audio codecs and the payload-type registry
//!
//! PCM interchange is always 16-bit signed little-endian. G.711 µ-law and
//! A-law are implemented directly; L16 is a byte-order swap; Opus is
//! available behind the `opus` feature. G.722 has a registered payload
//! type but no bundled transform.
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


use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};

/// Well-known static payload types (RFC 3551 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Pcmu = 0,
    Pcma = 8,
    G722 = 9,
    L16 = 11,
}

/// An audio codec converting between s16le PCM and its RTP payload.
///
/// Implementations are stateless unless the codec's definition requires
/// state; the mutable receiver accommodates stateful codecs like Opus.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    /// Audio sample rate in Hz (which may differ from the RTP clock rate)
    fn sample_rate(&self) -> u32;
    /// Samples per 20 ms frame
    fn samples_per_frame(&self) -> usize;
    /// Encode s16le PCM into payload bytes
    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError>;
    /// Decode payload bytes into s16le PCM
    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, CodecError>;
}

/// Resolve a payload type to a codec instance.
///
/// Unknown payload types return `None`; the session then passes payloads
/// through unmodified.
pub fn get_codec(payload_type: u8) -> Option<Box<dyn Codec>> {
    match payload_type {
        0 => Some(Box::new(PcmuCodec)),
        8 => Some(Box::new(PcmaCodec)),
        11 => Some(Box::new(L16Codec)),
        #[cfg(feature = "opus")]
        111 => OpusCodec::new(48000, 1).ok().map(|codec| Box::new(codec) as Box<dyn Codec>),
        _ => None,
    }
}

// --- G.711 (RFC 3551 Section 4.5.14) ---

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

fn linear_to_ulaw(sample: i16) -> u8 {
    let mut sample = i32::from(sample);
    let mut sign = 0u8;
    if sample < 0 {
        sign = 0x80;
        sample = -sample;
    }
    if sample > ULAW_CLIP {
        sample = ULAW_CLIP;
    }
    sample += ULAW_BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && sample & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((sample >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

fn ulaw_to_linear(byte: u8) -> i16 {
    let ulaw = !byte;
    let sign = ulaw & 0x80;
    let exponent = (ulaw >> 4) & 0x07;
    let mantissa = i32::from(ulaw & 0x0F);
    let mut sample = ((mantissa << 3) + ULAW_BIAS) << exponent;
    sample -= ULAW_BIAS;
    if sign != 0 {
        sample = -sample;
    }
    sample as i16
}

fn linear_to_alaw(sample: i16) -> u8 {
    let mut sample = i32::from(sample);
    let mut sign = 0u8;
    if sample < 0 {
        sign = 0x80;
        sample = -sample;
    }
    if sample > 32767 {
        sample = 32767;
    }

    let alaw = if sample >= 256 {
        let mut exponent = 7u8;
        let mut mask = 0x4000;
        while exponent > 1 && sample & mask == 0 {
            exponent -= 1;
            mask >>= 1;
        }
        let mantissa = ((sample >> (exponent + 3)) & 0x0F) as u8;
        sign | (exponent << 4) | mantissa
    } else {
        sign | (sample >> 4) as u8
    };
    alaw ^ 0x55
}

fn alaw_to_linear(byte: u8) -> i16 {
    let alaw = byte ^ 0x55;
    let sign = alaw & 0x80;
    let exponent = (alaw >> 4) & 0x07;
    let mantissa = i32::from(alaw & 0x0F);
    let mut sample = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };
    if sign != 0 {
        sample = -sample;
    }
    sample as i16
}

fn transcode_pcm(pcm: &[u8], per_sample: impl Fn(i16) -> u8) -> Bytes {
    let mut out = BytesMut::with_capacity(pcm.len() / 2);
    for chunk in pcm.chunks_exact(2) {
        out.put_u8(per_sample(i16::from_le_bytes([chunk[0], chunk[1]])));
    }
    out.freeze()
}

fn transcode_payload(payload: &[u8], per_byte: impl Fn(u8) -> i16) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() * 2);
    for &byte in payload {
        out.put_slice(&per_byte(byte).to_le_bytes());
    }
    out.freeze()
}

/// G.711 µ-law (PCMU)
pub struct PcmuCodec;

impl Codec for PcmuCodec {
    fn name(&self) -> &'static str {
        "PCMU"
    }

    fn sample_rate(&self) -> u32 {
        8000
    }

    fn samples_per_frame(&self) -> usize {
        160
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError> {
        Ok(transcode_pcm(pcm, linear_to_ulaw))
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, CodecError> {
        Ok(transcode_payload(payload, ulaw_to_linear))
    }
}

/// G.711 A-law (PCMA)
pub struct PcmaCodec;

impl Codec for PcmaCodec {
    fn name(&self) -> &'static str {
        "PCMA"
    }

    fn sample_rate(&self) -> u32 {
        8000
    }

    fn samples_per_frame(&self) -> usize {
        160
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError> {
        Ok(transcode_pcm(pcm, linear_to_alaw))
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, CodecError> {
        Ok(transcode_payload(payload, alaw_to_linear))
    }
}

/// Linear 16-bit PCM: s16le on the host side, s16be on the wire
pub struct L16Codec;

impl Codec for L16Codec {
    fn name(&self) -> &'static str {
        "L16"
    }

    fn sample_rate(&self) -> u32 {
        8000
    }

    fn samples_per_frame(&self) -> usize {
        160
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::with_capacity(pcm.len());
        for chunk in pcm.chunks_exact(2) {
            out.put_i16(i16::from_le_bytes([chunk[0], chunk[1]]));
        }
        Ok(out.freeze())
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::with_capacity(payload.len());
        for chunk in payload.chunks_exact(2) {
            out.put_slice(&i16::from_be_bytes([chunk[0], chunk[1]]).to_le_bytes());
        }
        Ok(out.freeze())
    }
}

/// Opus (RFC 7587), VoIP application profile
#[cfg(feature = "opus")]
pub struct OpusCodec {
    sample_rate: u32,
    channels: u8,
    samples_per_frame: usize,
    encoder: audiopus::coder::Encoder,
    decoder: audiopus::coder::Decoder,
}

#[cfg(feature = "opus")]
impl OpusCodec {
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self, CodecError> {
        use audiopus::{coder, Application, Channels, SampleRate};

        let rate = match sample_rate {
            8000 => SampleRate::Hz8000,
            12000 => SampleRate::Hz12000,
            16000 => SampleRate::Hz16000,
            24000 => SampleRate::Hz24000,
            48000 => SampleRate::Hz48000,
            other => {
                return Err(CodecError(format!("unsupported Opus sample rate: {other}")))
            }
        };
        let channel_config = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => return Err(CodecError(format!("unsupported channel count: {other}"))),
        };

        let encoder = coder::Encoder::new(rate, channel_config, Application::Voip)
            .map_err(|err| CodecError(format!("failed to create encoder: {err:?}")))?;
        let decoder = coder::Decoder::new(rate, channel_config)
            .map_err(|err| CodecError(format!("failed to create decoder: {err:?}")))?;

        Ok(OpusCodec {
            sample_rate,
            channels,
            samples_per_frame: (sample_rate as usize) * 20 / 1000,
            encoder,
            decoder,
        })
    }
}

#[cfg(feature = "opus")]
impl Codec for OpusCodec {
    fn name(&self) -> &'static str {
        "opus"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Bytes, CodecError> {
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        let mut encoded = vec![0u8; 4000];
        let length = self
            .encoder
            .encode(&samples, &mut encoded)
            .map_err(|err| CodecError(format!("Opus encoding error: {err:?}")))?;
        encoded.truncate(length);
        Ok(Bytes::from(encoded))
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, CodecError> {
        let mut samples =
            vec![0i16; self.samples_per_frame * usize::from(self.channels)];
        let decoded = self
            .decoder
            .decode(Some(payload), &mut samples, false)
            .map_err(|err| CodecError(format!("Opus decoding error: {err:?}")))?;
        let mut out = BytesMut::with_capacity(decoded * 2);
        for &sample in &samples[..decoded * usize::from(self.channels)] {
            out.put_slice(&sample.to_le_bytes());
        }
        Ok(out.freeze())
    }
}
