//! Frame layer: the 4-byte packet header and TCP reassembly.
//!
//! A frame on the wire is `{type: u8, flags: u8, length: u16 LE}` followed by
//! exactly `length` payload bytes. TCP gives no message boundaries, so the
//! [`FrameReader`] accumulates incoming bytes and yields a frame only once the
//! full `4 + length` bytes have arrived; partial trailing bytes stay buffered
//! for the next read. Each header is parsed exactly once.

use crate::DecodeError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Size of the packet header in bytes.
pub const HEADER_LEN: usize = 4;

/// Maximum payload size a header can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Payloads larger than this are zlib-compressed before transmission.
pub const COMPRESS_THRESHOLD: usize = 512;

/// Upper bound on an inflated payload, to stop decompression bombs.
const MAX_INFLATED_LEN: u64 = 1 << 20;

/// Packet flag bits. Unknown bits must be ignored on receive.
pub mod flags {
    pub const NONE: u8 = 0x00;
    /// Payload is zlib compressed. The header is never compressed.
    pub const COMPRESSED: u8 = 0x01;
    pub const RELIABLE: u8 = 0x02;
    pub const FRAGMENTED: u8 = 0x04;
    pub const LAST_FRAGMENT: u8 = 0x08;
}

/// Packet types, partitioned into ranges:
/// 0x01-0x0F connection control, 0x10-0x1F auth, 0x20-0x2F client actions,
/// 0x30-0x3F world state, 0x40-0x4F agent/trace/mission updates,
/// 0xF0-0xFF diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Handshake = 0x01,
    HandshakeAck = 0x02,
    Disconnect = 0x03,
    Keepalive = 0x04,

    AuthRequest = 0x10,
    AuthResponse = 0x11,

    PlayerConnect = 0x20,
    PlayerDisconnect = 0x21,
    PlayerAction = 0x22,
    PlayerChat = 0x23,

    WorldFull = 0x30,
    WorldDelta = 0x31,
    TimeSync = 0x32,
    PlayerList = 0x33,

    AgentUpdate = 0x40,
    TraceUpdate = 0x41,
    MissionUpdate = 0x42,

    LogEntry = 0xF0,
    NetError = 0xFE,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Handshake),
            0x02 => Some(Self::HandshakeAck),
            0x03 => Some(Self::Disconnect),
            0x04 => Some(Self::Keepalive),
            0x10 => Some(Self::AuthRequest),
            0x11 => Some(Self::AuthResponse),
            0x20 => Some(Self::PlayerConnect),
            0x21 => Some(Self::PlayerDisconnect),
            0x22 => Some(Self::PlayerAction),
            0x23 => Some(Self::PlayerChat),
            0x30 => Some(Self::WorldFull),
            0x31 => Some(Self::WorldDelta),
            0x32 => Some(Self::TimeSync),
            0x33 => Some(Self::PlayerList),
            0x40 => Some(Self::AgentUpdate),
            0x41 => Some(Self::TraceUpdate),
            0x42 => Some(Self::MissionUpdate),
            0xF0 => Some(Self::LogEntry),
            0xFE => Some(Self::NetError),
            _ => None,
        }
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u8,
    pub flags: u8,
    pub length: u16,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let len = self.length.to_le_bytes();
        [self.kind, self.flags, len[0], len[1]]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: HEADER_LEN,
                got: bytes.len(),
            });
        }
        Ok(Self {
            kind: bytes[0],
            flags: bytes[1],
            length: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }
}

/// A complete frame: raw type byte, flags, and payload.
///
/// The type is kept as a raw `u8` so unknown packet types can be logged and
/// dropped by the receiver instead of failing decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: PacketType, payload: Vec<u8>) -> Self {
        Self {
            kind: kind as u8,
            flags: flags::NONE,
            payload,
        }
    }

    /// Serializes the frame to wire bytes.
    ///
    /// Large payloads are zlib-compressed when that actually shrinks them.
    /// A payload that still exceeds the 16-bit length field is split into a
    /// contiguous run of FRAGMENTED frames ending with LAST_FRAGMENT, which
    /// [`FrameReader`] reassembles on the far side.
    pub fn encode(&self) -> Vec<u8> {
        let (flags_out, payload): (u8, std::borrow::Cow<'_, [u8]>) =
            if self.payload.len() > COMPRESS_THRESHOLD {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
                // Writing to a Vec cannot fail.
                encoder.write_all(&self.payload).expect("vec write");
                let compressed = encoder.finish().expect("vec write");
                if compressed.len() < self.payload.len() {
                    (self.flags | flags::COMPRESSED, compressed.into())
                } else {
                    (self.flags, self.payload.as_slice().into())
                }
            } else {
                (self.flags, self.payload.as_slice().into())
            };

        if payload.len() <= MAX_PAYLOAD_LEN {
            return Self::encode_one(self.kind, flags_out, &payload);
        }

        let mut out = Vec::with_capacity(payload.len() + HEADER_LEN * 4);
        let chunks: Vec<&[u8]> = payload.chunks(MAX_PAYLOAD_LEN).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut chunk_flags = flags_out | flags::FRAGMENTED;
            if i == last {
                chunk_flags |= flags::LAST_FRAGMENT;
            }
            out.extend_from_slice(&Self::encode_one(self.kind, chunk_flags, chunk));
        }
        out
    }

    fn encode_one(kind: u8, flags: u8, payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader {
            kind,
            flags,
            length: payload.len() as u16,
        };
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(payload);
        out
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.kind)
    }
}

/// Upper bound on a reassembled fragmented message.
const MAX_MESSAGE_LEN: usize = 1 << 22;

/// Reassembly state for an in-flight fragmented message.
#[derive(Debug)]
struct FragmentState {
    kind: u8,
    flags: u8,
    data: Vec<u8>,
}

/// Per-connection frame accumulator.
///
/// Feed it whatever the socket produced with [`extend`](Self::extend), then
/// drain complete frames with [`next_frame`](Self::next_frame). Fragmented
/// messages are reassembled and compressed payloads inflated transparently;
/// the corresponding flag bits are cleared on the returned frame.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
    pending: Option<FrameHeader>,
    fragment: Option<FragmentState>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len() + if self.pending.is_some() { HEADER_LEN } else { 0 }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete message, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        loop {
            let Some((header, payload)) = self.next_raw()? else {
                return Ok(None);
            };

            let (header, payload) = if header.flags & flags::FRAGMENTED != 0 {
                match self.push_fragment(header, payload)? {
                    Some(done) => done,
                    // Mid-message; look for the next fragment in the buffer.
                    None => continue,
                }
            } else {
                (header, payload)
            };

            let payload = if header.flags & flags::COMPRESSED != 0 {
                inflate(&payload)?
            } else {
                payload
            };

            let cleared = flags::COMPRESSED | flags::FRAGMENTED | flags::LAST_FRAGMENT;
            return Ok(Some(Frame {
                kind: header.kind,
                flags: header.flags & !cleared,
                payload,
            }));
        }
    }

    /// Pulls one wire frame out of the byte buffer. Each header is parsed
    /// exactly once.
    fn next_raw(&mut self) -> Result<Option<(FrameHeader, Vec<u8>)>, DecodeError> {
        if self.pending.is_none() {
            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }
            let header = FrameHeader::decode(&self.buf)?;
            self.buf.drain(..HEADER_LEN);
            self.pending = Some(header);
        }

        let header = self.pending.expect("pending header");
        let length = header.length as usize;
        if self.buf.len() < length {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf.drain(..length).collect();
        self.pending = None;
        Ok(Some((header, payload)))
    }

    /// Accumulates one fragment. Returns the reassembled message on the
    /// LAST_FRAGMENT, `None` while the message is still incomplete.
    fn push_fragment(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
    ) -> Result<Option<(FrameHeader, Vec<u8>)>, DecodeError> {
        match &mut self.fragment {
            None => {
                self.fragment = Some(FragmentState {
                    kind: header.kind,
                    flags: header.flags,
                    data: payload,
                });
            }
            Some(state) => {
                // Fragments of one message are contiguous on the stream.
                if state.kind != header.kind {
                    return Err(DecodeError::Corrupt("interleaved fragments"));
                }
                state.data.extend_from_slice(&payload);
            }
        }

        let state = self.fragment.as_ref().expect("fragment state");
        if state.data.len() > MAX_MESSAGE_LEN {
            self.fragment = None;
            return Err(DecodeError::Corrupt("fragmented message too large"));
        }

        if header.flags & flags::LAST_FRAGMENT != 0 {
            let state = self.fragment.take().expect("fragment state");
            let merged = FrameHeader {
                kind: state.kind,
                flags: state.flags,
                length: 0,
            };
            return Ok(Some((merged, state.data)));
        }
        Ok(None)
    }
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = ZlibDecoder::new(compressed).take(MAX_INFLATED_LEN);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| DecodeError::Compression)?;
    Ok(out)
}
