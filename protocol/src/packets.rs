//! Fixed-layout packet payloads.
//!
//! These mirror the wire contract exactly: little-endian integers and
//! fixed-width, zero-padded UTF-8 string fields. Encoding always produces the
//! full fixed size; decoding tolerates oversized payloads (trailing bytes from
//! newer protocol revisions are ignored) but rejects short ones.

use crate::DecodeError;

/// Player action identifiers carried in [`Action::action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActionType {
    AddBounce = 0x10,
    ClearBounces = 0x11,
    ConnectTarget = 0x12,
    DisconnectAll = 0x13,
    RunSoftware = 0x20,
    BypassSecurity = 0x21,
    DownloadFile = 0x30,
    DeleteFile = 0x32,
    DeleteLog = 0x40,
    TransferMoney = 0x50,
    FramePlayer = 0x70,
    PlaceBounty = 0x71,
}

impl ActionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(Self::AddBounce),
            0x11 => Some(Self::ClearBounces),
            0x12 => Some(Self::ConnectTarget),
            0x13 => Some(Self::DisconnectAll),
            0x20 => Some(Self::RunSoftware),
            0x21 => Some(Self::BypassSecurity),
            0x30 => Some(Self::DownloadFile),
            0x32 => Some(Self::DeleteFile),
            0x40 => Some(Self::DeleteLog),
            0x50 => Some(Self::TransferMoney),
            0x70 => Some(Self::FramePlayer),
            0x71 => Some(Self::PlaceBounty),
            _ => None,
        }
    }
}

/// Reason codes carried in [`NetError`] replies to failed actions.
pub mod reason {
    pub const NOT_FOUND: u8 = 1;
    pub const OFFLINE: u8 = 2;
    pub const NOT_CONNECTED: u8 = 3;
    pub const ACCESS_DENIED: u8 = 4;
    pub const INSUFFICIENT_FUNDS: u8 = 5;
    pub const INVALID_PARAMS: u8 = 6;
    pub const LIMIT: u8 = 7;
    pub const ALREADY_CLAIMED: u8 = 8;
}

/// Subsystem selectors for the BYPASS_SECURITY action (`param1`).
pub mod subsystem {
    pub const PROXY: u32 = 1;
    pub const FIREWALL: u32 = 2;
    pub const MONITOR: u32 = 3;
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Writes `s` truncated to `width` bytes, zero-padded to exactly `width`.
fn put_fixed_str(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() - n + width, 0);
}

/// Reads a zero-padded string field: bytes up to the first NUL, lossily UTF-8.
fn read_fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Cursor over a payload slice for fixed-layout decoding.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], required: usize) -> Result<Self, DecodeError> {
        if bytes.len() < required {
            return Err(DecodeError::Truncated {
                needed: required,
                got: bytes.len(),
            });
        }
        Ok(Self { bytes, pos: 0 })
    }

    fn u8(&mut self) -> u8 {
        let v = self.bytes[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.bytes[self.pos], self.bytes[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn f32(&mut self) -> f32 {
        f32::from_bits(self.u32())
    }

    fn str(&mut self, width: usize) -> String {
        let s = read_fixed_str(&self.bytes[self.pos..self.pos + width]);
        self.pos += width;
        s
    }
}

/// HANDSHAKE (0x01): first packet a client must send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub client_version: u32,
    /// Display handle, 32-byte field.
    pub handle: String,
    /// Supabase JWT, 512-byte field; empty for guest connections.
    pub auth_token: String,
}

impl Handshake {
    pub const SIZE: usize = 4 + 4 + 32 + 512;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_u32(&mut out, self.protocol_version);
        put_u32(&mut out, self.client_version);
        put_fixed_str(&mut out, &self.handle, 32);
        put_fixed_str(&mut out, &self.auth_token, 512);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            protocol_version: cur.u32(),
            client_version: cur.u32(),
            handle: cur.str(32),
            auth_token: cur.str(512),
        })
    }
}

/// HANDSHAKE_ACK (0x02): carries the connection id assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeAck {
    pub player_id: u32,
}

impl HandshakeAck {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        self.player_id.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            player_id: cur.u32(),
        })
    }
}

/// DISCONNECT (0x03): reason shipped to the peer before close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl Disconnect {
    pub const SIZE: usize = 64;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut out, &self.reason, 64);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            reason: cur.str(64),
        })
    }
}

/// PLAYER_ACTION (0x22): a single validated-on-server action request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub action: u8,
    pub target_id: u32,
    pub param1: u32,
    pub param2: u32,
    /// Free-form data field (ip text, filename, ...), 64-byte field.
    pub data: String,
}

impl Action {
    pub const SIZE: usize = 1 + 4 + 4 + 4 + 64;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.action);
        put_u32(&mut out, self.target_id);
        put_u32(&mut out, self.param1);
        put_u32(&mut out, self.param2);
        put_fixed_str(&mut out, &self.data, 64);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            action: cur.u8(),
            target_id: cur.u32(),
            param1: cur.u32(),
            param2: cur.u32(),
            data: cur.str(64),
        })
    }
}

/// TIME_SYNC (0x32): in-game clock broadcast, one per network tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSync {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub year: u16,
    pub paused: bool,
    pub game_speed: f32,
}

impl TimeSync {
    pub const SIZE: usize = 5 + 2 + 1 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.second);
        out.push(self.minute);
        out.push(self.hour);
        out.push(self.day);
        out.push(self.month);
        put_u16(&mut out, self.year);
        out.push(self.paused as u8);
        put_u32(&mut out, self.game_speed.to_bits());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            second: cur.u8(),
            minute: cur.u8(),
            hour: cur.u8(),
            day: cur.u8(),
            month: cur.u8(),
            year: cur.u16(),
            paused: cur.u8() != 0,
            game_speed: cur.f32(),
        })
    }
}

/// One row of a PLAYER_LIST broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerListEntry {
    pub player_id: u32,
    pub handle: String,
    pub rating: u16,
}

impl PlayerListEntry {
    pub const SIZE: usize = 4 + 32 + 2;
}

/// PLAYER_LIST (0x33): authenticated players currently online, max 32.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerList {
    pub players: Vec<PlayerListEntry>,
}

impl PlayerList {
    pub fn encode(&self) -> Vec<u8> {
        let count = self.players.len().min(crate::MAX_PLAYER_LIST);
        let mut out = Vec::with_capacity(1 + count * PlayerListEntry::SIZE);
        out.push(count as u8);
        for entry in &self.players[..count] {
            put_u32(&mut out, entry.player_id);
            put_fixed_str(&mut out, &entry.handle, 32);
            put_u16(&mut out, entry.rating);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, 1)?;
        let count = cur.u8() as usize;
        if count > crate::MAX_PLAYER_LIST {
            return Err(DecodeError::Corrupt("player list count"));
        }
        let needed = 1 + count * PlayerListEntry::SIZE;
        if bytes.len() < needed {
            return Err(DecodeError::Truncated {
                needed,
                got: bytes.len(),
            });
        }
        let mut players = Vec::with_capacity(count);
        for _ in 0..count {
            players.push(PlayerListEntry {
                player_id: cur.u32(),
                handle: cur.str(32),
                rating: cur.u16(),
            });
        }
        Ok(Self { players })
    }
}

/// PLAYER_CHAT (0x23): client sends channel + message; the server rebroadcasts
/// with a server-verified sender handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub sender: String,
    pub channel: String,
    pub message: String,
}

impl Chat {
    pub const SIZE: usize = 32 + 32 + 256;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut out, &self.sender, 32);
        put_fixed_str(&mut out, &self.channel, 32);
        put_fixed_str(&mut out, &self.message, 256);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            sender: cur.str(32),
            channel: cur.str(32),
            message: cur.str(256),
        })
    }
}

/// TRACE_UPDATE (0x41): defender progress while a trace is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceUpdate {
    pub target_ip: u32,
    pub remaining_secs: u16,
    pub progress_pct: u8,
}

impl TraceUpdate {
    pub const SIZE: usize = 4 + 2 + 1;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_u32(&mut out, self.target_ip);
        put_u16(&mut out, self.remaining_secs);
        out.push(self.progress_pct);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            target_ip: cur.u32(),
            remaining_secs: cur.u16(),
            progress_pct: cur.u8(),
        })
    }
}

/// MISSION_UPDATE (0x42): a mission was claimed or completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionUpdate {
    pub mission_id: u32,
    pub claimed_by: u32,
    pub completed: bool,
}

impl MissionUpdate {
    pub const SIZE: usize = 4 + 4 + 1;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_u32(&mut out, self.mission_id);
        put_u32(&mut out, self.claimed_by);
        out.push(self.completed as u8);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            mission_id: cur.u32(),
            claimed_by: cur.u32(),
            completed: cur.u8() != 0,
        })
    }
}

/// Event codes for [`AgentUpdate`].
pub mod agent_event {
    pub const SOFTWARE_USED: u8 = 1;
    pub const BOUNTY_PLACED: u8 = 2;
}

/// AGENT_UPDATE (0x40): an agent-level state change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentUpdate {
    pub agent_id: u32,
    pub event: u8,
    pub value: u32,
}

impl AgentUpdate {
    pub const SIZE: usize = 4 + 1 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_u32(&mut out, self.agent_id);
        out.push(self.event);
        put_u32(&mut out, self.value);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            agent_id: cur.u32(),
            event: cur.u8(),
            value: cur.u32(),
        })
    }
}

/// LOG_ENTRY (0xF0): human-readable server notification line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
}

impl LogEntry {
    pub const SIZE: usize = 128;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut out, &self.message, 128);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            message: cur.str(128),
        })
    }
}

/// NET_ERROR (0xFE): action failure returned to the initiating session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetError {
    pub action: u8,
    pub reason: u8,
}

impl NetError {
    pub const SIZE: usize = 2;

    pub fn encode(&self) -> Vec<u8> {
        vec![self.action, self.reason]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes, Self::SIZE)?;
        Ok(Self {
            action: cur.u8(),
            reason: cur.u8(),
        })
    }
}
