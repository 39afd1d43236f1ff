//! The dedicated server: dual-rate tick loop and packet routing.
//!
//! A single `tokio::select!` loop owns the world, the session registry, and
//! the clock. It reacts to three things: decoded frames and connection
//! lifecycle events from the socket tasks, the 60 Hz game interval (clock,
//! NPC scheduler, trace and download countdowns, persistence flush), and the
//! 20 Hz network interval (time sync, world deltas, player list broadcast,
//! timeout sweep). Because every mutation happens here between awaits, world
//! transactions are serialized and a session's auth transition is observed
//! atomically by the dispatcher.

use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;

use protocol::packets::{
    ActionType, Chat, Disconnect, Handshake, HandshakeAck, LogEntry, MissionUpdate, NetError,
    TraceUpdate,
};
use protocol::{Frame, PacketType, PROTOCOL_VERSION};

use crate::actions;
use crate::clock::GameClock;
use crate::config::ServerConfig;
use crate::net::{self, AuthOutcome, ServerMessage};
use crate::npc::NpcEvent;
use crate::persist::{PersistJob, PersistWorker, PlayerProfile, SupabaseClient};
use crate::session::{
    PendingDownload, SessionState, SessionRegistry, DEFAULT_CREDITS, DEFAULT_NEUROMANCER_RATING,
    DEFAULT_UPLINK_RATING,
};
use crate::world::World;

/// Seconds between persistence flushes.
const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

pub struct Server {
    config: ServerConfig,
    world: World,
    clock: GameClock,
    sessions: SessionRegistry,
    persist: PersistWorker,
    persist_enabled: bool,

    messages_tx: UnboundedSender<ServerMessage>,
    messages_rx: UnboundedReceiver<ServerMessage>,

    tick_number: u64,
    last_flush: Instant,
}

impl Server {
    pub fn new(config: ServerConfig, world: World, client: Option<SupabaseClient>) -> Self {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let persist_enabled = client.is_some();
        let persist = PersistWorker::spawn(client, messages_tx.clone());
        let sessions = SessionRegistry::new(config.max_players);

        Self {
            config,
            world,
            clock: GameClock::new(),
            sessions,
            persist,
            persist_enabled,
            messages_tx,
            messages_rx,
            tick_number: 0,
            last_flush: Instant::now(),
        }
    }

    /// Runs the main loop until ctrl-c or until every channel closes.
    pub async fn run(&mut self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        log::info!(
            "listening on {} (max {} players)",
            listener.local_addr()?,
            self.config.max_players
        );
        let listener_task = net::spawn_listener(listener, self.messages_tx.clone());

        // World creation: the canonical start date, then the resident NPCs.
        self.clock.set_date(0, 0, 14, 14, 4, 3010);
        self.clock.activate();
        self.world
            .spawn_npcs(self.config.npc_count, &mut rand::thread_rng());
        log::info!("world created at {}", self.clock.long_string());

        let mut game_interval = tokio::time::interval(self.config.game_tick_interval());
        let mut network_interval = tokio::time::interval(self.config.network_tick_interval());
        game_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        network_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                message = self.messages_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => break,
                    }
                }
                _ = game_interval.tick() => self.game_tick(),
                _ = network_interval.tick() => self.network_tick(),
                _ = &mut shutdown => {
                    log::info!("shutdown signal received");
                    break;
                }
            }
        }

        listener_task.abort();
        self.shutdown();
        Ok(())
    }

    // ---- message handling --------------------------------------------------

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::NewConnection { stream, addr } => {
                if self.sessions.is_full() {
                    log::info!("refusing connection from {addr}: server full");
                    tokio::spawn(async move {
                        use tokio::io::AsyncWriteExt;
                        let mut stream = stream;
                        let frame = Frame::new(
                            PacketType::Disconnect,
                            Disconnect {
                                reason: "Server full".to_string(),
                            }
                            .encode(),
                        );
                        let _ = stream.write_all(&frame.encode()).await;
                    });
                    return;
                }

                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let Some(conn_id) = self.sessions.add(addr, out_tx) else {
                    return;
                };
                net::spawn_connection(conn_id, stream, out_rx, self.messages_tx.clone());
                log::info!(
                    "CONNECT: session #{conn_id} from {addr} (total: {}/{})",
                    self.sessions.len(),
                    self.config.max_players
                );
            }
            ServerMessage::Frame { conn_id, frame } => self.handle_frame(conn_id, frame),
            ServerMessage::ConnectionLost { conn_id, reason } => {
                self.kill_session(conn_id, &reason);
            }
            ServerMessage::AuthResult { conn_id, outcome } => {
                self.handle_auth_result(conn_id, outcome);
            }
        }
    }

    fn handle_frame(&mut self, conn_id: u32, frame: Frame) {
        let Some(session) = self.sessions.get_mut(conn_id) else {
            return;
        };
        session.touch();
        let state = session.state;

        match state {
            SessionState::Unauth => match frame.packet_type() {
                Some(PacketType::Handshake) => self.handle_handshake(conn_id, &frame.payload),
                Some(PacketType::Keepalive) => {}
                Some(PacketType::Disconnect) => self.kill_session(conn_id, "Client disconnected"),
                _ => self.kill_session(conn_id, "Invalid handshake sequence"),
            },
            SessionState::Auth => match frame.packet_type() {
                Some(PacketType::PlayerAction) => self.handle_action(conn_id, &frame.payload),
                Some(PacketType::PlayerChat) => self.handle_chat(conn_id, &frame.payload),
                Some(PacketType::Keepalive) => {}
                Some(PacketType::Disconnect) => self.kill_session(conn_id, "Client disconnected"),
                _ => {
                    log::debug!(
                        "ignoring packet type 0x{:02X} from session {conn_id}",
                        frame.kind
                    );
                }
            },
            SessionState::Dead => {}
        }
    }

    fn handle_handshake(&mut self, conn_id: u32, payload: &[u8]) {
        let handshake = match Handshake::decode(payload) {
            Ok(handshake) => handshake,
            Err(e) => {
                log::warn!("session {conn_id} sent malformed handshake: {e}");
                self.kill_session(conn_id, "Invalid handshake");
                return;
            }
        };

        if handshake.protocol_version != PROTOCOL_VERSION {
            log::warn!(
                "session {conn_id} has wrong protocol version ({} vs {PROTOCOL_VERSION})",
                handshake.protocol_version
            );
            self.kill_session(conn_id, "Protocol version mismatch");
            return;
        }

        let handle = if handshake.handle.is_empty() {
            format!("agent{conn_id}")
        } else {
            handshake.handle.clone()
        };

        let Some(session) = self.sessions.get_mut(conn_id) else {
            return;
        };
        session.handle = handle;

        if self.persist_enabled && !handshake.auth_token.is_empty() {
            // Stay Unauth until the worker reports back.
            session.auth_token = handshake.auth_token.clone();
            self.persist.send(PersistJob::VerifyToken {
                conn_id,
                token: handshake.auth_token,
            });
            return;
        }

        if handshake.auth_token.is_empty() {
            log::info!(
                "AUTH GUEST: session #{conn_id} '{}' (no token)",
                self.sessions.get(conn_id).map(|s| s.handle.as_str()).unwrap_or("")
            );
        } else {
            log::info!("AUTH SKIP: session #{conn_id} (persistence disabled)");
        }

        self.apply_default_profile(conn_id);
        self.complete_auth(conn_id);
    }

    fn handle_auth_result(&mut self, conn_id: u32, outcome: AuthOutcome) {
        let Some(session) = self.sessions.get(conn_id) else {
            return;
        };
        if session.state != SessionState::Unauth {
            return;
        }

        match outcome {
            AuthOutcome::Rejected => {
                log::warn!("AUTH FAIL: session #{conn_id} - invalid token");
                self.kill_session(conn_id, "Invalid or expired auth token");
            }
            AuthOutcome::Verified { auth_id, profile } => {
                log::info!(
                    "AUTH OK: session #{conn_id} verified (id: {:.8}...)",
                    auth_id
                );
                match profile {
                    Some(profile) => {
                        let Some(session) = self.sessions.get_mut(conn_id) else {
                            return;
                        };
                        session.auth_id = auth_id;
                        session.profile_row_id = profile.id;
                        session.credits = profile.credits;
                        session.uplink_rating = profile.uplink_rating;
                        session.neuromancer_rating = profile.neuromancer_rating;
                        log::info!(
                            "loaded profile for '{}': credits={} rating={}",
                            session.handle,
                            session.credits,
                            session.uplink_rating
                        );
                    }
                    None => {
                        // First login: defaults now, row creation in the
                        // background.
                        self.apply_default_profile(conn_id);
                        let Some(session) = self.sessions.get_mut(conn_id) else {
                            return;
                        };
                        session.auth_id = auth_id.clone();
                        log::info!(
                            "no profile found for '{}', creating with defaults",
                            session.handle
                        );
                        let handle = session.handle.clone();
                        let token = session.auth_token.clone();
                        self.persist.send(PersistJob::CreateProfile {
                            auth_id,
                            handle,
                            token,
                        });
                    }
                }
                self.complete_auth(conn_id);
            }
        }
    }

    fn apply_default_profile(&mut self, conn_id: u32) {
        if let Some(session) = self.sessions.get_mut(conn_id) {
            session.credits = DEFAULT_CREDITS;
            session.uplink_rating = DEFAULT_UPLINK_RATING;
            session.neuromancer_rating = DEFAULT_NEUROMANCER_RATING;
        }
    }

    fn complete_auth(&mut self, conn_id: u32) {
        let snapshot = self.world.build_full_snapshot(conn_id);
        let Some(session) = self.sessions.get_mut(conn_id) else {
            return;
        };
        session.state = SessionState::Auth;
        session.send_frame(
            PacketType::HandshakeAck,
            HandshakeAck { player_id: conn_id }.encode(),
        );
        session.send_frame(PacketType::WorldFull, snapshot);
        log::info!(
            "session #{conn_id} '{}' authenticated (credits={} rating={})",
            session.handle,
            session.credits,
            session.uplink_rating
        );
    }

    fn handle_action(&mut self, conn_id: u32, payload: &[u8]) {
        let action = match protocol::packets::Action::decode(payload) {
            Ok(action) => action,
            Err(e) => {
                log::warn!("session {conn_id} sent malformed action: {e}");
                self.kill_session(conn_id, "Invalid action payload");
                return;
            }
        };

        let Some(kind) = ActionType::from_u8(action.action) else {
            log::warn!(
                "unknown action type 0x{:02X} from session {conn_id}",
                action.action
            );
            return;
        };

        log::info!(
            "[{}] ACTION type=0x{:02X} player={conn_id} target={} p1={} p2={}",
            self.clock.short_string(),
            action.action,
            action.target_id,
            action.param1,
            action.param2
        );

        if let Err(error) = actions::dispatch(
            &mut self.world,
            &mut self.sessions,
            &self.clock,
            conn_id,
            kind,
            &action,
        ) {
            log::info!(
                "[{}] REJECT type=0x{:02X} player={conn_id} reason={error:?}",
                self.clock.short_string(),
                action.action
            );
            if let Some(session) = self.sessions.get(conn_id) {
                session.send_frame(
                    PacketType::NetError,
                    NetError {
                        action: action.action,
                        reason: error.code(),
                    }
                    .encode(),
                );
            }
        }
    }

    fn handle_chat(&mut self, conn_id: u32, payload: &[u8]) {
        let incoming = match Chat::decode(payload) {
            Ok(chat) => chat,
            Err(e) => {
                log::warn!("session {conn_id} sent malformed chat: {e}");
                return;
            }
        };
        let Some(session) = self.sessions.get(conn_id) else {
            return;
        };

        // Rebroadcast with the server-verified sender handle.
        let outgoing = Chat {
            sender: session.handle.clone(),
            channel: incoming.channel,
            message: incoming.message,
        };
        log::info!(
            "[{}] CHAT [{}] {}: {}",
            self.clock.short_string(),
            outgoing.channel,
            outgoing.sender,
            outgoing.message
        );
        self.sessions
            .broadcast(PacketType::PlayerChat, &outgoing.encode());
    }

    // ---- session teardown --------------------------------------------------

    /// The single exit path for a session: profile write-back, world cleanup,
    /// best-effort disconnect packet, removal from the registry.
    fn kill_session(&mut self, conn_id: u32, reason: &str) {
        let was_authenticated = self
            .sessions
            .get(conn_id)
            .map(|s| s.is_authenticated())
            .unwrap_or(false);
        let Some(session) = self.sessions.remove(conn_id) else {
            return;
        };

        if was_authenticated {
            self.world.disconnect_everywhere(conn_id);
        }

        if self.persist_enabled && was_authenticated && session.profile_row_id != 0 {
            self.persist.send(PersistJob::UpdateProfile {
                profile: PlayerProfile {
                    id: session.profile_row_id,
                    auth_id: session.auth_id.clone(),
                    handle: session.handle.clone(),
                    credits: session.credits,
                    uplink_rating: session.uplink_rating,
                    neuromancer_rating: session.neuromancer_rating,
                },
                token: Some(session.auth_token.clone()).filter(|t| !t.is_empty()),
            });
        }

        // Best-effort: the queue drains before the socket closes.
        session.send_frame(
            PacketType::Disconnect,
            Disconnect {
                reason: reason.to_string(),
            }
            .encode(),
        );

        log::info!(
            "DISCONNECT: session #{conn_id} '{}' - {reason} (remaining: {})",
            if session.handle.is_empty() {
                "(unknown)"
            } else {
                &session.handle
            },
            self.sessions.len()
        );
    }

    // ---- game tick ---------------------------------------------------------

    fn game_tick(&mut self) {
        let second_elapsed = self.clock.update();

        let dt = 1.0 / self.config.tick_rate_hz as f32;
        let events = self.world.update_npcs(dt, &mut rand::thread_rng());
        for event in events {
            let update = match event {
                NpcEvent::MissionClaimed {
                    agent_id,
                    mission_id,
                } => MissionUpdate {
                    mission_id: mission_id as u32,
                    claimed_by: agent_id as u32,
                    completed: false,
                },
                NpcEvent::MissionCompleted {
                    agent_id,
                    mission_id,
                } => MissionUpdate {
                    mission_id: mission_id as u32,
                    claimed_by: agent_id as u32,
                    completed: true,
                },
            };
            self.sessions
                .broadcast(PacketType::MissionUpdate, &update.encode());
        }

        if second_elapsed {
            self.advance_game_second();
        }

        if self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.last_flush = Instant::now();
            self.flush_dirty_state();
        }

        self.tick_number = self.tick_number.wrapping_add(1);
    }

    /// One in-game second has passed: run trace and download countdowns.
    fn advance_game_second(&mut self) {
        let mut expired_traces: Vec<(u32, u32)> = Vec::new();
        let mut finished_downloads: Vec<(u32, PendingDownload)> = Vec::new();

        for session in self.sessions.iter_mut() {
            if let Some(trace) = &mut session.trace {
                trace.remaining_secs = trace.remaining_secs.saturating_sub(1);
                if trace.remaining_secs == 0 {
                    let target_ip = trace.target_ip;
                    session.trace = None;
                    expired_traces.push((session.id, target_ip));
                }
            }

            for download in &mut session.downloads {
                download.remaining_secs = download.remaining_secs.saturating_sub(1);
            }
            let mut index = 0;
            while index < session.downloads.len() {
                if session.downloads[index].remaining_secs == 0 {
                    finished_downloads.push((session.id, session.downloads.remove(index)));
                } else {
                    index += 1;
                }
            }
        }

        for (conn_id, target_ip) in expired_traces {
            self.on_trace_complete(conn_id, target_ip);
        }
        for (conn_id, download) in finished_downloads {
            self.on_download_complete(conn_id, download);
        }
    }

    /// A trace ran to completion: the target forcibly drops the intruder.
    fn on_trace_complete(&mut self, conn_id: u32, target_ip: u32) {
        log::info!(
            "[{}] TRACE COMPLETE player={conn_id} target={}",
            self.clock.short_string(),
            crate::world::format_ip(target_ip)
        );

        let accessor = self
            .sessions
            .get(conn_id)
            .and_then(|s| s.bounce_path.last().copied())
            .unwrap_or(0);
        if let Some(computer_id) = self.world.find_computer(target_ip).map(|c| c.id) {
            let stamp = self.clock.short_string();
            self.world
                .log_access(computer_id, accessor, "trace completed", stamp);
        }
        self.world.player_disconnect(conn_id, target_ip);

        if let Some(session) = self.sessions.get_mut(conn_id) {
            if session.connected_ip == Some(target_ip) {
                session.connected_ip = None;
            }
            session.send_frame(
                PacketType::TraceUpdate,
                TraceUpdate {
                    target_ip,
                    remaining_secs: 0,
                    progress_pct: 100,
                }
                .encode(),
            );
            session.send_frame(
                PacketType::LogEntry,
                LogEntry {
                    message: "Trace completed - connection terminated".to_string(),
                }
                .encode(),
            );
        }
    }

    fn on_download_complete(&mut self, conn_id: u32, download: PendingDownload) {
        let accessor = self
            .sessions
            .get(conn_id)
            .and_then(|s| s.bounce_path.last().copied())
            .unwrap_or(0);
        if let Some(computer_id) = self.world.find_computer(download.target_ip).map(|c| c.id) {
            let stamp = self.clock.short_string();
            self.world.log_access(
                computer_id,
                accessor,
                &format!("downloaded file {}", download.filename),
                stamp,
            );
        }
        if let Some(session) = self.sessions.get(conn_id) {
            session.send_frame(
                PacketType::LogEntry,
                LogEntry {
                    message: format!("Download complete: {}", download.filename),
                }
                .encode(),
            );
        }
    }

    // ---- network tick ------------------------------------------------------

    fn network_tick(&mut self) {
        let time_payload = self.clock.time_sync().encode();
        let has_changes = self.world.has_changes();

        for conn_id in self.sessions.authenticated_ids() {
            let delta = if has_changes {
                self.world.build_delta(conn_id)
            } else {
                Vec::new()
            };
            let Some(session) = self.sessions.get_mut(conn_id) else {
                continue;
            };
            session.send_frame(PacketType::TimeSync, time_payload.clone());
            if !delta.is_empty() {
                session.send_frame(PacketType::WorldDelta, delta);
            }
            if let Some(trace) = &session.trace {
                let update = TraceUpdate {
                    target_ip: trace.target_ip,
                    remaining_secs: trace.remaining_secs.min(u16::MAX as u32) as u16,
                    progress_pct: trace.progress_pct(),
                };
                session.send_frame(PacketType::TraceUpdate, update.encode());
            }
            session.last_network_tick = Instant::now();
        }
        self.world.clear_changes();

        let list = self.sessions.player_list();
        self.sessions
            .broadcast(PacketType::PlayerList, &list.encode());

        for conn_id in self.sessions.timed_out_ids(self.config.connection_timeout) {
            self.kill_session(conn_id, "Connection timeout");
        }
    }

    // ---- persistence -------------------------------------------------------

    fn flush_dirty_state(&mut self) {
        let flags = self.world.take_dirty_flags();
        let computer_ids = self.world.take_dirty_computer_ids();
        let mission_ids = self.world.take_dirty_mission_ids();

        if !self.persist_enabled {
            for session in self.sessions.iter_mut() {
                session.profile_dirty = false;
            }
            return;
        }

        if flags.computers {
            for id in computer_ids {
                if let Some(computer) = self.world.computer_by_id(id) {
                    self.persist.send(PersistJob::UpdateComputer {
                        id,
                        is_running: computer.running,
                        security_level: computer.security_level,
                    });
                }
            }
        }
        if flags.missions {
            for id in mission_ids {
                if let Some(mission) = self.world.find_mission(id) {
                    self.persist.send(PersistJob::UpdateMission {
                        id,
                        claimed_by: mission.claimed_by,
                        completed: mission.completed,
                    });
                }
            }
        }

        let mut profiles = Vec::new();
        for session in self.sessions.iter_mut() {
            if session.profile_dirty && session.profile_row_id != 0 {
                session.profile_dirty = false;
                profiles.push((
                    PlayerProfile {
                        id: session.profile_row_id,
                        auth_id: session.auth_id.clone(),
                        handle: session.handle.clone(),
                        credits: session.credits,
                        uplink_rating: session.uplink_rating,
                        neuromancer_rating: session.neuromancer_rating,
                    },
                    Some(session.auth_token.clone()).filter(|t| !t.is_empty()),
                ));
            }
        }
        for (profile, token) in profiles {
            self.persist.send(PersistJob::UpdateProfile { profile, token });
        }

        log::debug!("flushed dirty state to persistence");
    }

    // ---- shutdown ----------------------------------------------------------

    fn shutdown(&mut self) {
        log::info!("shutting down...");

        let ids: Vec<u32> = self.sessions.iter().map(|s| s.id).collect();
        for conn_id in ids {
            self.kill_session(conn_id, "Server shutting down");
        }

        self.flush_dirty_state();
        self.persist.shutdown();

        log::info!("shutdown complete");
    }
}
