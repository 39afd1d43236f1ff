//! Player sessions and the session registry.
//!
//! A session is created on accept in the `Unauth` state, becomes `Auth` after
//! a valid handshake (and token verification, when persistence is on), and is
//! `Dead` once it leaves the registry. Any received byte refreshes the
//! activity clock; the registry sweeps idle sessions every network tick.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use protocol::packets::{PlayerList, PlayerListEntry};
use protocol::{Frame, PacketType};

/// Profile defaults for guests and first-time players.
pub const DEFAULT_CREDITS: i64 = 3000;
pub const DEFAULT_UPLINK_RATING: i16 = 1;
pub const DEFAULT_NEUROMANCER_RATING: i16 = 0;

/// Maximum hops in a bounce path.
pub const MAX_BOUNCE_HOPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauth,
    Auth,
    Dead,
}

/// Active trace countdown against a connected session.
#[derive(Debug, Clone)]
pub struct Trace {
    pub target_ip: u32,
    pub total_secs: u32,
    pub remaining_secs: u32,
}

impl Trace {
    pub fn progress_pct(&self) -> u8 {
        if self.total_secs == 0 {
            return 100;
        }
        let elapsed = self.total_secs - self.remaining_secs;
        ((elapsed * 100) / self.total_secs).min(100) as u8
    }
}

/// Scheduled file transfer, counted down in in-game seconds.
#[derive(Debug, Clone)]
pub struct PendingDownload {
    pub target_ip: u32,
    pub filename: String,
    pub remaining_secs: u32,
}

#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub addr: SocketAddr,
    pub state: SessionState,
    pub handle: String,
    /// External auth id; empty for guests.
    pub auth_id: String,
    /// JWT presented at handshake. Written once, reused for profile writes.
    pub auth_token: String,
    /// Database row id of the player profile, 0 until known.
    pub profile_row_id: i32,

    pub credits: i64,
    pub uplink_rating: i16,
    pub neuromancer_rating: i16,

    pub last_activity: Instant,
    pub last_network_tick: Instant,

    outbound: UnboundedSender<Vec<u8>>,

    pub bounce_path: Vec<u32>,
    /// In-game connection target, if any.
    pub connected_ip: Option<u32>,
    pub trace: Option<Trace>,
    pub downloads: Vec<PendingDownload>,

    /// Profile differs from the last persisted copy.
    pub profile_dirty: bool,
}

impl Session {
    pub fn new(id: u32, addr: SocketAddr, outbound: UnboundedSender<Vec<u8>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            state: SessionState::Unauth,
            handle: String::new(),
            auth_id: String::new(),
            auth_token: String::new(),
            profile_row_id: 0,
            credits: 0,
            uplink_rating: 0,
            neuromancer_rating: 0,
            last_activity: now,
            last_network_tick: now,
            outbound,
            bounce_path: Vec::new(),
            connected_ip: None,
            trace: None,
            downloads: Vec::new(),
            profile_dirty: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Auth
    }

    /// Refreshes the activity clock. Called for every received byte batch.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Queues a frame on the connection's writer task. Returns false when the
    /// connection is already gone.
    pub fn send_frame(&self, kind: PacketType, payload: Vec<u8>) -> bool {
        self.outbound.send(Frame::new(kind, payload).encode()).is_ok()
    }
}

/// All live sessions, keyed by connection id. Only the tick task touches it.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: BTreeMap<u32, Session>,
    next_id: u32,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
            max_sessions,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    /// Registers a new unauthenticated session. Returns its id, or `None` at
    /// capacity.
    pub fn add(&mut self, addr: SocketAddr, outbound: UnboundedSender<Vec<u8>>) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(id, Session::new(id, addr, outbound));
        Some(id)
    }

    pub fn get(&self, id: u32) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        session.state = SessionState::Dead;
        Some(session)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn authenticated_ids(&self) -> Vec<u32> {
        self.sessions
            .values()
            .filter(|s| s.is_authenticated())
            .map(|s| s.id)
            .collect()
    }

    /// Ids of sessions idle past `timeout`.
    pub fn timed_out_ids(&self, timeout: Duration) -> Vec<u32> {
        self.sessions
            .values()
            .filter(|s| s.is_timed_out(timeout))
            .map(|s| s.id)
            .collect()
    }

    /// Builds the periodic PLAYER_LIST broadcast from authenticated sessions.
    /// Truncation past the wire maximum happens at encode time.
    pub fn player_list(&self) -> PlayerList {
        PlayerList {
            players: self
                .sessions
                .values()
                .filter(|s| s.is_authenticated())
                .map(|s| PlayerListEntry {
                    player_id: s.id,
                    handle: s.handle.clone(),
                    rating: s.uplink_rating.max(0) as u16,
                })
                .collect(),
        }
    }

    /// Sends a frame to every authenticated session.
    pub fn broadcast(&self, kind: PacketType, payload: &[u8]) {
        for session in self.sessions.values() {
            if session.is_authenticated() {
                session.send_frame(kind, payload.to_vec());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn add_session(registry: &mut SessionRegistry, port: u16) -> u32 {
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.add(test_addr(port), tx).unwrap()
    }

    #[test]
    fn ids_are_monotonic() {
        let mut registry = SessionRegistry::new(4);
        let a = add_session(&mut registry, 1000);
        let b = add_session(&mut registry, 1001);
        assert!(b > a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut registry = SessionRegistry::new(1);
        add_session(&mut registry, 1000);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(registry.add(test_addr(1001), tx).is_none());
    }

    #[test]
    fn removed_session_is_dead() {
        let mut registry = SessionRegistry::new(2);
        let id = add_session(&mut registry, 1000);
        let session = registry.remove(id).unwrap();
        assert_eq!(session.state, SessionState::Dead);
        assert!(registry.get(id).is_none());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn timeout_detection() {
        let mut registry = SessionRegistry::new(2);
        let id = add_session(&mut registry, 1000);

        assert!(registry.timed_out_ids(Duration::from_secs(1)).is_empty());

        registry.get_mut(id).unwrap().last_activity =
            Instant::now() - Duration::from_secs(2);
        assert_eq!(registry.timed_out_ids(Duration::from_secs(1)), vec![id]);

        // Activity resets the clock.
        registry.get_mut(id).unwrap().touch();
        assert!(registry.timed_out_ids(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn player_list_only_contains_authenticated() {
        let mut registry = SessionRegistry::new(4);
        let a = add_session(&mut registry, 1000);
        let _b = add_session(&mut registry, 1001);

        {
            let session = registry.get_mut(a).unwrap();
            session.state = SessionState::Auth;
            session.handle = "Zero".to_string();
            session.uplink_rating = 1;
        }

        let list = registry.player_list();
        assert_eq!(list.players.len(), 1);
        assert_eq!(list.players[0].handle, "Zero");
        assert_eq!(list.players[0].rating, 1);
    }

    #[test]
    fn trace_progress() {
        let trace = Trace {
            target_ip: 1,
            total_secs: 60,
            remaining_secs: 45,
        };
        assert_eq!(trace.progress_pct(), 25);

        let done = Trace {
            target_ip: 1,
            total_secs: 60,
            remaining_secs: 0,
        };
        assert_eq!(done.progress_pct(), 100);
    }

    #[test]
    fn send_frame_reports_closed_connection() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(1, test_addr(1000), tx);
        assert!(session.send_frame(PacketType::Keepalive, Vec::new()));
        drop(rx);
        assert!(!session.send_frame(PacketType::Keepalive, Vec::new()));
    }
}
