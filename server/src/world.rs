//! Authoritative world state.
//!
//! The sole container for computers, bank accounts, missions, access logs,
//! bounties, and NPC agents. It is owned by the main loop task and mutated
//! only between await points, which serializes every multi-step transaction
//! exactly like a coarse world lock would.
//!
//! Two kinds of change tracking run side by side:
//! - per-category dirty flags plus per-entity save queues, drained by the
//!   30-second persistence flush;
//! - per-entity changed-id sets, drained each network tick to build the
//!   WORLD_DELTA payload.

use std::collections::{HashMap, HashSet};

use protocol::delta::{self, DeltaWriter};

use crate::npc::NpcAgent;

/// Parses dotted-quad text into the numeric address form.
pub fn parse_ip(text: &str) -> Option<u32> {
    let mut parts = text.trim().split('.');
    let mut ip: u32 = 0;
    for _ in 0..4 {
        let octet: u32 = parts.next()?.parse().ok()?;
        if octet > 255 {
            return None;
        }
        ip = (ip << 8) | octet;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(ip)
}

/// Formats a numeric address back into dotted-quad text.
pub fn format_ip(ip: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        (ip >> 24) & 0xFF,
        (ip >> 16) & 0xFF,
        (ip >> 8) & 0xFF,
        ip & 0xFF
    )
}

#[derive(Debug, Clone)]
pub struct Computer {
    pub id: i32,
    /// Numeric address, the fast-lookup key.
    pub ip: u32,
    pub ip_string: String,
    pub name: String,
    pub company_id: i32,
    pub kind: i16,
    /// 0-10; gates bypass attempts against agent rating.
    pub security_level: i16,
    pub running: bool,

    // Transient security state, not persisted.
    pub proxy_bypassed: bool,
    pub firewall_bypassed: bool,
    pub monitor_disabled: bool,

    /// Session ids currently connected in-game.
    pub connected_sessions: Vec<u32>,
}

impl Computer {
    /// True once every security layer has been defeated.
    pub fn fully_bypassed(&self) -> bool {
        self.proxy_bypassed && self.firewall_bypassed && self.monitor_disabled
    }
}

#[derive(Debug, Clone)]
pub struct BankAccount {
    pub id: i32,
    pub bank_ip: u32,
    pub number: String,
    pub name: String,
    /// Credits; never negative.
    pub balance: i64,
    /// Owning session id, 0 for NPC/system accounts.
    pub owner: u32,
}

#[derive(Debug, Clone)]
pub struct Mission {
    pub id: i32,
    pub kind: i16,
    pub target_ip: u32,
    pub employer_id: i32,
    pub description: String,
    pub payment: i32,
    pub max_payment: i32,
    pub difficulty: i16,
    pub min_rating: i16,
    /// Session or agent id, 0 when unclaimed.
    pub claimed_by: i32,
    /// Terminal once set.
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct AccessLog {
    pub id: i32,
    pub computer_id: i32,
    pub accessor_ip: u32,
    pub action: String,
    /// In-game timestamp at append time.
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct Bounty {
    pub target: u32,
    pub amount: i64,
    pub placed_by: u32,
}

/// Outcome of an in-game connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    NotFound,
    Offline,
}

#[derive(Debug, Clone, Copy)]
enum Subsystem {
    Proxy,
    Firewall,
    Monitor,
}

/// Per-category "needs save" flags, read and cleared by the flush. Only the
/// persisted categories are tracked: account changes reach the backend
/// through their owners' player profiles, and access logs are in-memory only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirtyFlags {
    pub computers: bool,
    pub missions: bool,
}

#[derive(Debug, Default)]
pub struct World {
    computers: Vec<Computer>,
    computer_by_ip: HashMap<u32, usize>,
    pub accounts: Vec<BankAccount>,
    pub missions: Vec<Mission>,
    pub access_logs: Vec<AccessLog>,
    pub bounties: Vec<Bounty>,
    pub agents: Vec<NpcAgent>,

    next_log_id: i32,

    dirty: DirtyFlags,
    save_computers: HashSet<i32>,
    save_missions: HashSet<i32>,

    changed_computers: HashSet<i32>,
    changed_missions: HashSet<i32>,
    changed_accounts: HashSet<i32>,
}

impl World {
    pub fn new() -> Self {
        Self {
            next_log_id: 1,
            ..Self::default()
        }
    }

    // ---- population -------------------------------------------------------

    pub fn insert_computer(&mut self, computer: Computer) {
        self.computer_by_ip.insert(computer.ip, self.computers.len());
        self.computers.push(computer);
    }

    pub fn insert_mission(&mut self, mission: Mission) {
        self.missions.push(mission);
    }

    pub fn insert_account(&mut self, account: BankAccount) {
        self.accounts.push(account);
    }

    /// Called once the startup bulk load has populated the store.
    pub fn mark_clean(&mut self) {
        self.dirty = DirtyFlags::default();
        self.save_computers.clear();
        self.save_missions.clear();
    }

    pub fn computers(&self) -> &[Computer] {
        &self.computers
    }

    // ---- computers --------------------------------------------------------

    pub fn find_computer(&self, ip: u32) -> Option<&Computer> {
        self.computer_by_ip
            .get(&ip)
            .and_then(|&idx| self.computers.get(idx))
    }

    fn find_computer_mut(&mut self, ip: u32) -> Option<&mut Computer> {
        match self.computer_by_ip.get(&ip) {
            Some(&idx) => self.computers.get_mut(idx),
            None => None,
        }
    }

    pub fn find_computer_by_ip_string(&self, text: &str) -> Option<&Computer> {
        self.computers.iter().find(|c| c.ip_string == text)
    }

    pub fn computer_by_id(&self, id: i32) -> Option<&Computer> {
        self.computers.iter().find(|c| c.id == id)
    }

    pub fn player_connect(&mut self, session_id: u32, target_ip: u32) -> ConnectOutcome {
        let Some(computer) = self.find_computer_mut(target_ip) else {
            log::warn!("REJECT: session {session_id} tried to connect to unknown ip");
            return ConnectOutcome::NotFound;
        };
        if !computer.running {
            log::warn!(
                "REJECT: session {session_id} tried to connect to offline computer {}",
                computer.name
            );
            return ConnectOutcome::Offline;
        }

        if !computer.connected_sessions.contains(&session_id) {
            computer.connected_sessions.push(session_id);
        }
        let id = computer.id;
        log::info!("session {session_id} connected to computer {id}");
        self.touch_computer(id);
        ConnectOutcome::Connected
    }

    pub fn player_disconnect(&mut self, session_id: u32, from_ip: u32) {
        let Some(computer) = self.find_computer_mut(from_ip) else {
            return;
        };
        computer.connected_sessions.retain(|&id| id != session_id);

        // Bypass state is computer-global; the last session leaving is the
        // reset point.
        if computer.connected_sessions.is_empty() {
            computer.proxy_bypassed = false;
            computer.firewall_bypassed = false;
            computer.monitor_disabled = false;
        }
        let id = computer.id;
        self.touch_computer(id);
    }

    /// Removes a session from every computer's connected list. Used when the
    /// session dies, so the id never lingers anywhere.
    pub fn disconnect_everywhere(&mut self, session_id: u32) {
        let mut touched = Vec::new();
        for computer in &mut self.computers {
            if computer.connected_sessions.contains(&session_id) {
                computer.connected_sessions.retain(|&id| id != session_id);
                if computer.connected_sessions.is_empty() {
                    computer.proxy_bypassed = false;
                    computer.firewall_bypassed = false;
                    computer.monitor_disabled = false;
                }
                touched.push(computer.id);
            }
        }
        for id in touched {
            self.touch_computer(id);
        }
    }

    fn try_bypass(&mut self, session_id: u32, ip: u32, rating: i16, which: Subsystem) -> bool {
        let Some(computer) = self.find_computer_mut(ip) else {
            return false;
        };

        if rating < computer.security_level {
            log::info!(
                "REJECT: session {session_id} failed bypass (rating {rating} < security {})",
                computer.security_level
            );
            return false;
        }

        match which {
            Subsystem::Proxy => computer.proxy_bypassed = true,
            Subsystem::Firewall => computer.firewall_bypassed = true,
            Subsystem::Monitor => computer.monitor_disabled = true,
        }
        let id = computer.id;
        self.touch_computer(id);
        true
    }

    pub fn try_bypass_proxy(&mut self, session_id: u32, ip: u32, rating: i16) -> bool {
        self.try_bypass(session_id, ip, rating, Subsystem::Proxy)
    }

    pub fn try_bypass_firewall(&mut self, session_id: u32, ip: u32, rating: i16) -> bool {
        self.try_bypass(session_id, ip, rating, Subsystem::Firewall)
    }

    pub fn try_disable_monitor(&mut self, session_id: u32, ip: u32, rating: i16) -> bool {
        self.try_bypass(session_id, ip, rating, Subsystem::Monitor)
    }

    fn touch_computer(&mut self, id: i32) {
        self.dirty.computers = true;
        self.save_computers.insert(id);
        self.changed_computers.insert(id);
    }

    // ---- banking ----------------------------------------------------------

    pub fn find_account(&self, bank_ip: u32, number: &str) -> Option<&BankAccount> {
        self.accounts
            .iter()
            .find(|a| a.bank_ip == bank_ip && a.number == number)
    }

    pub fn account_by_id(&self, id: i32) -> Option<&BankAccount> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// Atomic transfer between two accounts. Fails (world unchanged) unless
    /// the amount is positive, both accounts exist and differ, and the source
    /// covers the amount.
    pub fn transfer(
        &mut self,
        src_bank_ip: u32,
        src_number: &str,
        dst_bank_ip: u32,
        dst_number: &str,
        amount: i64,
    ) -> bool {
        if amount <= 0 {
            return false;
        }

        let src_idx = self
            .accounts
            .iter()
            .position(|a| a.bank_ip == src_bank_ip && a.number == src_number);
        let dst_idx = self
            .accounts
            .iter()
            .position(|a| a.bank_ip == dst_bank_ip && a.number == dst_number);

        let (Some(src_idx), Some(dst_idx)) = (src_idx, dst_idx) else {
            log::info!("REJECT: transfer failed, account not found");
            return false;
        };
        if src_idx == dst_idx {
            return false;
        }

        if self.accounts[src_idx].balance < amount {
            log::info!(
                "REJECT: transfer failed, insufficient funds ({} < {amount})",
                self.accounts[src_idx].balance
            );
            return false;
        }

        self.accounts[src_idx].balance -= amount;
        self.accounts[dst_idx].balance += amount;

        let src_id = self.accounts[src_idx].id;
        let dst_id = self.accounts[dst_idx].id;
        self.changed_accounts.insert(src_id);
        self.changed_accounts.insert(dst_id);

        log::info!("transferred {amount} credits: {src_number} -> {dst_number}");
        true
    }

    // ---- missions ---------------------------------------------------------

    pub fn find_mission(&self, id: i32) -> Option<&Mission> {
        self.missions.iter().find(|m| m.id == id)
    }

    pub fn claim_mission(&mut self, id: i32, claimant: i32) -> bool {
        let Some(mission) = self.missions.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if mission.completed {
            return false;
        }
        if mission.claimed_by != 0 {
            log::info!(
                "REJECT: mission {id} already claimed by {}",
                mission.claimed_by
            );
            return false;
        }
        mission.claimed_by = claimant;
        self.touch_mission(id);
        log::info!("agent {claimant} claimed mission {id}");
        true
    }

    pub fn complete_mission(&mut self, id: i32, claimant: i32) -> bool {
        let Some(mission) = self.missions.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if mission.completed || mission.claimed_by != claimant {
            return false;
        }
        mission.completed = true;
        let payment = mission.payment;
        self.touch_mission(id);
        log::info!("agent {claimant} completed mission {id} (payment: {payment})");
        true
    }

    fn touch_mission(&mut self, id: i32) {
        self.dirty.missions = true;
        self.save_missions.insert(id);
        self.changed_missions.insert(id);
    }

    // ---- access logs ------------------------------------------------------

    pub fn log_access(
        &mut self,
        computer_id: i32,
        accessor_ip: u32,
        action: &str,
        timestamp: String,
    ) -> i32 {
        let id = self.next_log_id;
        self.next_log_id += 1;
        self.access_logs.push(AccessLog {
            id,
            computer_id,
            accessor_ip,
            action: action.to_string(),
            timestamp,
        });
        id
    }

    pub fn find_log(&self, log_id: i32) -> Option<&AccessLog> {
        self.access_logs.iter().find(|entry| entry.id == log_id)
    }

    pub fn delete_log(&mut self, log_id: i32) -> bool {
        let before = self.access_logs.len();
        self.access_logs.retain(|entry| entry.id != log_id);
        self.access_logs.len() != before
    }

    // ---- bounties ---------------------------------------------------------

    pub fn place_bounty(&mut self, target: u32, amount: i64, placed_by: u32) {
        self.bounties.push(Bounty {
            target,
            amount,
            placed_by,
        });
    }

    // ---- persistence hooks ------------------------------------------------

    /// Reads and clears the per-category dirty flags.
    pub fn take_dirty_flags(&mut self) -> DirtyFlags {
        std::mem::take(&mut self.dirty)
    }

    pub fn take_dirty_computer_ids(&mut self) -> Vec<i32> {
        self.save_computers.drain().collect()
    }

    pub fn take_dirty_mission_ids(&mut self) -> Vec<i32> {
        self.save_missions.drain().collect()
    }

    // ---- delta encoding ---------------------------------------------------

    pub fn has_changes(&self) -> bool {
        !self.changed_computers.is_empty()
            || !self.changed_missions.is_empty()
            || !self.changed_accounts.is_empty()
    }

    /// Clears the delta change set once every session has been served.
    pub fn clear_changes(&mut self) {
        self.changed_computers.clear();
        self.changed_missions.clear();
        self.changed_accounts.clear();
    }

    fn encode_computer(writer: &mut DeltaWriter, computer: &Computer) {
        use delta::computer_field as f;
        writer.begin_object(delta::entity::COMPUTER);
        writer.varint_field(f::ID, computer.id as u32);
        writer.fixed32_field(f::IP, computer.ip);
        writer.string_field(f::NAME, &computer.name);
        writer.varint_field(f::SECURITY, computer.security_level.max(0) as u32);
        writer.varint_field(f::RUNNING, computer.running as u32);
        let bypass = computer.proxy_bypassed as u32
            | (computer.firewall_bypassed as u32) << 1
            | (computer.monitor_disabled as u32) << 2;
        writer.varint_field(f::BYPASS, bypass);
        let mut connected = Vec::new();
        for &session in &computer.connected_sessions {
            delta::encode_varint(&mut connected, session);
        }
        writer.bytes_field(f::CONNECTED, &connected);
        writer.end_object();
    }

    fn encode_mission(writer: &mut DeltaWriter, mission: &Mission) {
        use delta::mission_field as f;
        writer.begin_object(delta::entity::MISSION);
        writer.varint_field(f::ID, mission.id as u32);
        writer.varint_field(f::KIND, mission.kind.max(0) as u32);
        writer.fixed32_field(f::TARGET_IP, mission.target_ip);
        writer.varint_field(f::PAYMENT, mission.payment.max(0) as u32);
        writer.varint_field(f::DIFFICULTY, mission.difficulty.max(0) as u32);
        writer.varint_field(f::CLAIMED_BY, mission.claimed_by.max(0) as u32);
        writer.varint_field(f::COMPLETED, mission.completed as u32);
        writer.string_field(f::DESCRIPTION, &mission.description);
        writer.end_object();
    }

    fn encode_account(writer: &mut DeltaWriter, account: &BankAccount) {
        use delta::account_field as f;
        writer.begin_object(delta::entity::ACCOUNT);
        writer.varint_field(f::ID, account.id as u32);
        writer.fixed64_field(f::BALANCE, account.balance.max(0) as u64);
        writer.string_field(f::NUMBER, &account.number);
        writer.fixed32_field(f::BANK_IP, account.bank_ip);
        writer.end_object();
    }

    /// Encodes the entities changed since the last network tick. Account
    /// changes ship only to their owner.
    pub fn build_delta(&self, owner_session: u32) -> Vec<u8> {
        let mut writer = DeltaWriter::new();
        for computer in &self.computers {
            if self.changed_computers.contains(&computer.id) {
                Self::encode_computer(&mut writer, computer);
            }
        }
        for mission in &self.missions {
            if self.changed_missions.contains(&mission.id) {
                Self::encode_mission(&mut writer, mission);
            }
        }
        for account in &self.accounts {
            if self.changed_accounts.contains(&account.id) && account.owner == owner_session {
                Self::encode_account(&mut writer, account);
            }
        }
        writer.into_inner()
    }

    /// Encodes the complete visible state, sent once on join.
    pub fn build_full_snapshot(&self, owner_session: u32) -> Vec<u8> {
        let mut writer = DeltaWriter::new();
        for computer in &self.computers {
            Self::encode_computer(&mut writer, computer);
        }
        for mission in &self.missions {
            Self::encode_mission(&mut writer, mission);
        }
        for account in &self.accounts {
            if account.owner == owner_session {
                Self::encode_account(&mut writer, account);
            }
        }
        writer.into_inner()
    }
}
