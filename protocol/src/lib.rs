//! # Cybrelink Wire Protocol
//!
//! Shared binary protocol between the dedicated server and its thin client
//! terminals. Everything that crosses the socket is defined here so that both
//! sides agree byte-for-byte:
//!
//! - **Framing** (`frame`): every message is a 4-byte little-endian header
//!   `{type, flags, length}` followed by `length` payload bytes. The
//!   [`FrameReader`] reassembles frames across arbitrary TCP boundaries.
//! - **Typed payloads** (`packets`): fixed-layout packet bodies with
//!   zero-padded strings, hand-packed rather than derived, because the wire
//!   layout is part of the protocol contract.
//! - **Delta primitives** (`delta`): varints and field markers used by the
//!   `WORLD_FULL` / `WORLD_DELTA` payloads. Receivers skip unknown field ids,
//!   so the world encoding can grow without breaking old clients.
//!
//! The crate performs no I/O; it is pure functions over byte slices, which
//! keeps every encoder and decoder unit-testable in isolation.

use std::fmt;

pub mod delta;
pub mod frame;
pub mod packets;

pub use frame::{Frame, FrameHeader, FrameReader, PacketType};
pub use packets::ActionType;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 31337;

/// Wire protocol version carried in the handshake. Mismatches are rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Game logic tick rate.
pub const TICK_RATE_HZ: u32 = 60;

/// Network send rate.
pub const NETWORK_TICK_RATE_HZ: u32 = 20;

/// Clients should send a KEEPALIVE at least this often when otherwise idle.
pub const KEEPALIVE_INTERVAL_MS: u64 = 5_000;

/// Sessions with no traffic for this long are dropped.
pub const CONNECTION_TIMEOUT_MS: u64 = 15_000;

/// Maximum entries in a PLAYER_LIST broadcast; excess players are truncated.
pub const MAX_PLAYER_LIST: usize = 32;

/// Errors produced while decoding frames, payloads, or delta streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes were available than the layout requires.
    Truncated { needed: usize, got: usize },
    /// A varint ran past its 5-byte limit or the end of the buffer.
    InvalidVarint,
    /// Compressed payload failed to inflate.
    Compression,
    /// Structurally invalid data (bad count, bad field type, ...).
    Corrupt(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { needed, got } => {
                write!(f, "truncated payload: needed {needed} bytes, got {got}")
            }
            DecodeError::InvalidVarint => write!(f, "invalid varint encoding"),
            DecodeError::Compression => write!(f, "failed to decompress payload"),
            DecodeError::Corrupt(what) => write!(f, "corrupt payload: {what}"),
        }
    }
}

impl std::error::Error for DecodeError {}
