//! Server-authoritative action dispatcher.
//!
//! Every PLAYER_ACTION packet from an authenticated session lands here and is
//! resolved as a single world transaction. The dispatch is one `match` over
//! the action tag; every failure maps to a wire reason code which the tick
//! loop returns to the caller as a NET_ERROR packet. Unknown action tags never
//! reach this module.

use protocol::packets::{self, ActionType, AgentUpdate, TraceUpdate};
use protocol::PacketType;

use crate::clock::GameClock;
use crate::session::{PendingDownload, SessionRegistry, Trace, MAX_BOUNCE_HOPS};
use crate::world::{self, ConnectOutcome, World};

/// Seconds a download takes to complete, in game time.
const DOWNLOAD_SECS: u32 = 5;

/// Validation failure, reported back to the initiating session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionError {
    NotFound,
    Offline,
    NotConnected,
    AccessDenied,
    InsufficientFunds,
    InvalidParams,
    Limit,
    AlreadyClaimed,
}

impl ActionError {
    pub fn code(self) -> u8 {
        match self {
            ActionError::NotFound => packets::reason::NOT_FOUND,
            ActionError::Offline => packets::reason::OFFLINE,
            ActionError::NotConnected => packets::reason::NOT_CONNECTED,
            ActionError::AccessDenied => packets::reason::ACCESS_DENIED,
            ActionError::InsufficientFunds => packets::reason::INSUFFICIENT_FUNDS,
            ActionError::InvalidParams => packets::reason::INVALID_PARAMS,
            ActionError::Limit => packets::reason::LIMIT,
            ActionError::AlreadyClaimed => packets::reason::ALREADY_CLAIMED,
        }
    }
}

/// The address a session appears to act from: the last hop of its bounce
/// path, or 0 when it connects directly.
fn apparent_ip(bounce_path: &[u32]) -> u32 {
    bounce_path.last().copied().unwrap_or(0)
}

fn crime_name(crime: u32) -> &'static str {
    match crime {
        1 => "unauthorized file access",
        2 => "funds transferred out",
        3 => "system logs purged",
        _ => "security breach",
    }
}

/// Applies one action for `conn_id`. On `Err` the world is unchanged.
pub fn dispatch(
    world: &mut World,
    sessions: &mut SessionRegistry,
    clock: &GameClock,
    conn_id: u32,
    kind: ActionType,
    action: &packets::Action,
) -> Result<(), ActionError> {
    match kind {
        ActionType::AddBounce => add_bounce(world, sessions, conn_id, action),
        ActionType::ClearBounces => clear_bounces(sessions, conn_id),
        ActionType::ConnectTarget => connect_target(world, sessions, clock, conn_id, action),
        ActionType::DisconnectAll => disconnect_all(world, sessions, conn_id),
        ActionType::RunSoftware => run_software(world, sessions, clock, conn_id, action),
        ActionType::BypassSecurity => bypass_security(world, sessions, conn_id, action),
        ActionType::DownloadFile => download_file(world, sessions, conn_id, action),
        ActionType::DeleteFile => delete_file(world, sessions, clock, conn_id, action),
        ActionType::DeleteLog => delete_log(world, sessions, conn_id, action),
        ActionType::TransferMoney => transfer_money(world, sessions, conn_id, action),
        ActionType::FramePlayer => frame_player(world, sessions, clock, conn_id, action),
        ActionType::PlaceBounty => place_bounty(world, sessions, conn_id, action),
    }
}

fn add_bounce(
    world: &mut World,
    sessions: &mut SessionRegistry,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let ip = world::parse_ip(&action.data).ok_or(ActionError::InvalidParams)?;
    if world.find_computer(ip).is_none() {
        return Err(ActionError::NotFound);
    }
    let session = sessions.get_mut(conn_id).ok_or(ActionError::NotFound)?;
    if session.bounce_path.len() >= MAX_BOUNCE_HOPS {
        return Err(ActionError::Limit);
    }
    session.bounce_path.push(ip);
    Ok(())
}

fn clear_bounces(sessions: &mut SessionRegistry, conn_id: u32) -> Result<(), ActionError> {
    let session = sessions.get_mut(conn_id).ok_or(ActionError::NotFound)?;
    session.bounce_path.clear();
    Ok(())
}

fn connect_target(
    world: &mut World,
    sessions: &mut SessionRegistry,
    clock: &GameClock,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let target_ip = world::parse_ip(&action.data).ok_or(ActionError::InvalidParams)?;

    let (old_ip, accessor) = {
        let session = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
        (session.connected_ip, apparent_ip(&session.bounce_path))
    };

    match world.player_connect(conn_id, target_ip) {
        ConnectOutcome::NotFound => return Err(ActionError::NotFound),
        ConnectOutcome::Offline => return Err(ActionError::Offline),
        ConnectOutcome::Connected => {}
    }

    // Leaving a previous target drops its connection and trace.
    if let Some(old_ip) = old_ip {
        if old_ip != target_ip {
            world.player_disconnect(conn_id, old_ip);
        }
    }

    let (computer_id, security) = {
        let computer = world.find_computer(target_ip).ok_or(ActionError::NotFound)?;
        (computer.id, computer.security_level)
    };
    world.log_access(
        computer_id,
        accessor,
        "connection established",
        clock.short_string(),
    );

    let total_secs = 30 + 10 * security.max(0) as u32;
    let session = sessions.get_mut(conn_id).ok_or(ActionError::NotFound)?;
    session.connected_ip = Some(target_ip);
    session.trace = Some(Trace {
        target_ip,
        total_secs,
        remaining_secs: total_secs,
    });
    session.send_frame(
        PacketType::TraceUpdate,
        TraceUpdate {
            target_ip,
            remaining_secs: total_secs.min(u16::MAX as u32) as u16,
            progress_pct: 0,
        }
        .encode(),
    );
    Ok(())
}

fn disconnect_all(
    world: &mut World,
    sessions: &mut SessionRegistry,
    conn_id: u32,
) -> Result<(), ActionError> {
    let session = sessions.get_mut(conn_id).ok_or(ActionError::NotFound)?;
    session.trace = None;
    session.downloads.clear();
    if let Some(ip) = session.connected_ip.take() {
        world.player_disconnect(conn_id, ip);
    }
    Ok(())
}

fn run_software(
    world: &mut World,
    sessions: &mut SessionRegistry,
    clock: &GameClock,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let (target_ip, accessor) = {
        let session = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
        (
            session.connected_ip.ok_or(ActionError::NotConnected)?,
            apparent_ip(&session.bounce_path),
        )
    };
    let computer_id = world
        .find_computer(target_ip)
        .ok_or(ActionError::NotFound)?
        .id;

    world.log_access(
        computer_id,
        accessor,
        &format!("ran software type={} v{}", action.param1, action.param2),
        clock.short_string(),
    );

    let session = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
    session.send_frame(
        PacketType::AgentUpdate,
        AgentUpdate {
            agent_id: conn_id,
            event: packets::agent_event::SOFTWARE_USED,
            value: action.param1,
        }
        .encode(),
    );
    Ok(())
}

fn bypass_security(
    world: &mut World,
    sessions: &mut SessionRegistry,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let (target_ip, rating) = {
        let session = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
        (
            session.connected_ip.ok_or(ActionError::NotConnected)?,
            session.uplink_rating,
        )
    };
    if world.find_computer(target_ip).is_none() {
        return Err(ActionError::NotFound);
    }

    let ok = match action.param1 {
        packets::subsystem::PROXY => world.try_bypass_proxy(conn_id, target_ip, rating),
        packets::subsystem::FIREWALL => world.try_bypass_firewall(conn_id, target_ip, rating),
        packets::subsystem::MONITOR => world.try_disable_monitor(conn_id, target_ip, rating),
        _ => return Err(ActionError::InvalidParams),
    };
    if ok {
        Ok(())
    } else {
        Err(ActionError::AccessDenied)
    }
}

fn download_file(
    world: &mut World,
    sessions: &mut SessionRegistry,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    if action.data.is_empty() {
        return Err(ActionError::InvalidParams);
    }
    let target_ip = {
        let session = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
        session.connected_ip.ok_or(ActionError::NotConnected)?
    };
    let computer = world.find_computer(target_ip).ok_or(ActionError::NotFound)?;
    if !computer.proxy_bypassed || !computer.firewall_bypassed {
        return Err(ActionError::AccessDenied);
    }

    let session = sessions.get_mut(conn_id).ok_or(ActionError::NotFound)?;
    session.downloads.push(PendingDownload {
        target_ip,
        filename: action.data.clone(),
        remaining_secs: DOWNLOAD_SECS,
    });
    Ok(())
}

fn delete_file(
    world: &mut World,
    sessions: &mut SessionRegistry,
    clock: &GameClock,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let (target_ip, accessor) = {
        let session = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
        (
            session.connected_ip.ok_or(ActionError::NotConnected)?,
            apparent_ip(&session.bounce_path),
        )
    };
    let computer = world.find_computer(target_ip).ok_or(ActionError::NotFound)?;
    if !computer.fully_bypassed() {
        return Err(ActionError::AccessDenied);
    }
    let computer_id = computer.id;

    world.log_access(
        computer_id,
        accessor,
        &format!("file {} deleted", action.target_id),
        clock.short_string(),
    );
    Ok(())
}

fn delete_log(
    world: &mut World,
    sessions: &mut SessionRegistry,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let _ = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
    let log_id = action.target_id as i32;
    let computer_id = world.find_log(log_id).ok_or(ActionError::NotFound)?.computer_id;

    let monitor_disabled = world
        .computer_by_id(computer_id)
        .map(|c| c.monitor_disabled)
        .unwrap_or(false);
    if !monitor_disabled {
        return Err(ActionError::AccessDenied);
    }

    world.delete_log(log_id);
    Ok(())
}

fn transfer_money(
    world: &mut World,
    sessions: &mut SessionRegistry,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let amount = i64::from(action.param1);
    if amount <= 0 {
        return Err(ActionError::InvalidParams);
    }
    let _ = sessions.get(conn_id).ok_or(ActionError::NotFound)?;

    let (src_bank, src_number, src_id) = {
        let account = world
            .account_by_id(action.param2 as i32)
            .ok_or(ActionError::NotFound)?;
        (account.bank_ip, account.number.clone(), account.id)
    };
    let (dst_bank, dst_number, dst_id) = {
        let account = world
            .account_by_id(action.target_id as i32)
            .ok_or(ActionError::NotFound)?;
        (account.bank_ip, account.number.clone(), account.id)
    };

    if !world.transfer(src_bank, &src_number, dst_bank, &dst_number, amount) {
        return Err(ActionError::InsufficientFunds);
    }

    // A player account's balance is that player's credits; keep the owning
    // sessions and their profiles in step.
    for account_id in [src_id, dst_id] {
        let Some((owner, balance)) = world
            .account_by_id(account_id)
            .map(|a| (a.owner, a.balance))
        else {
            continue;
        };
        if owner == 0 {
            continue;
        }
        if let Some(owner_session) = sessions.get_mut(owner) {
            owner_session.credits = balance;
            owner_session.profile_dirty = true;
        }
    }
    Ok(())
}

fn frame_player(
    world: &mut World,
    sessions: &mut SessionRegistry,
    clock: &GameClock,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let target_ip = {
        let session = sessions.get(conn_id).ok_or(ActionError::NotFound)?;
        session.connected_ip.ok_or(ActionError::NotConnected)?
    };
    let computer = world.find_computer(target_ip).ok_or(ActionError::NotFound)?;
    if !computer.monitor_disabled {
        return Err(ActionError::AccessDenied);
    }
    let computer_id = computer.id;

    let victim_id = action.target_id;
    let (victim_handle, victim_ip) = match sessions.get(victim_id) {
        Some(victim) => (victim.handle.clone(), apparent_ip(&victim.bounce_path)),
        None => (format!("agent #{victim_id}"), 0),
    };

    // Fabricated entries naming the victim, stamped with the current clock.
    let stamp = clock.short_string();
    world.log_access(computer_id, victim_ip, "connection established", stamp.clone());
    world.log_access(
        computer_id,
        victim_ip,
        &format!("{} by {victim_handle}", crime_name(action.param1)),
        stamp,
    );
    Ok(())
}

fn place_bounty(
    world: &mut World,
    sessions: &mut SessionRegistry,
    conn_id: u32,
    action: &packets::Action,
) -> Result<(), ActionError> {
    let amount = i64::from(action.param1);
    if amount <= 0 {
        return Err(ActionError::InvalidParams);
    }

    {
        let session = sessions.get_mut(conn_id).ok_or(ActionError::NotFound)?;
        if session.credits < amount {
            return Err(ActionError::InsufficientFunds);
        }
        session.credits -= amount;
        session.profile_dirty = true;
    }

    world.place_bounty(action.target_id, amount, conn_id);

    // Notify the target if they are online.
    if let Some(target) = sessions.get(action.target_id) {
        if target.is_authenticated() {
            target.send_frame(
                PacketType::AgentUpdate,
                AgentUpdate {
                    agent_id: action.target_id,
                    event: packets::agent_event::BOUNTY_PLACED,
                    value: action.param1,
                }
                .encode(),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::world::{BankAccount, Computer};
    use std::net::SocketAddr;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    struct Fixture {
        world: World,
        sessions: SessionRegistry,
        clock: GameClock,
        conn_id: u32,
        _outbound: UnboundedReceiver<Vec<u8>>,
    }

    fn computer(id: i32, ip_text: &str, security: i16) -> Computer {
        Computer {
            id,
            ip: world::parse_ip(ip_text).unwrap(),
            ip_string: ip_text.to_string(),
            name: format!("computer-{id}"),
            company_id: 1,
            kind: 0,
            security_level: security,
            running: true,
            proxy_bypassed: false,
            firewall_bypassed: false,
            monitor_disabled: false,
            connected_sessions: Vec::new(),
        }
    }

    fn account(id: i32, number: &str, balance: i64, owner: u32) -> BankAccount {
        BankAccount {
            id,
            bank_ip: world::parse_ip("20.0.0.1").unwrap(),
            number: number.to_string(),
            name: format!("account-{number}"),
            balance,
            owner,
        }
    }

    fn fixture() -> Fixture {
        let mut world = World::new();
        world.insert_computer(computer(1, "10.0.0.1", 1));

        let mut sessions = SessionRegistry::new(8);
        let (tx, rx) = unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let conn_id = sessions.add(addr, tx).unwrap();
        {
            let session = sessions.get_mut(conn_id).unwrap();
            session.state = SessionState::Auth;
            session.handle = "Zero".to_string();
            session.credits = 500;
            session.uplink_rating = 3;
        }

        let mut clock = GameClock::new();
        clock.set_date(0, 0, 14, 14, 4, 3010);

        Fixture {
            world,
            sessions,
            clock,
            conn_id,
            _outbound: rx,
        }
    }

    fn act(kind: ActionType, target_id: u32, param1: u32, param2: u32, data: &str) -> packets::Action {
        packets::Action {
            action: kind as u8,
            target_id,
            param1,
            param2,
            data: data.to_string(),
        }
    }

    fn run(fx: &mut Fixture, kind: ActionType, action: &packets::Action) -> Result<(), ActionError> {
        dispatch(
            &mut fx.world,
            &mut fx.sessions,
            &fx.clock,
            fx.conn_id,
            kind,
            action,
        )
    }

    fn connect(fx: &mut Fixture, ip: &str) {
        let action = act(ActionType::ConnectTarget, 0, 0, 0, ip);
        run(fx, ActionType::ConnectTarget, &action).unwrap();
    }

    #[test]
    fn bounce_requires_known_computer_and_caps_at_sixteen() {
        let mut fx = fixture();

        let bad = act(ActionType::AddBounce, 0, 0, 0, "9.9.9.9");
        assert_eq!(run(&mut fx, ActionType::AddBounce, &bad), Err(ActionError::NotFound));

        let good = act(ActionType::AddBounce, 0, 0, 0, "10.0.0.1");
        for _ in 0..MAX_BOUNCE_HOPS {
            run(&mut fx, ActionType::AddBounce, &good).unwrap();
        }
        assert_eq!(
            run(&mut fx, ActionType::AddBounce, &good),
            Err(ActionError::Limit)
        );

        run(&mut fx, ActionType::ClearBounces, &good).unwrap();
        assert!(fx.sessions.get(fx.conn_id).unwrap().bounce_path.is_empty());
    }

    #[test]
    fn connect_starts_trace_and_logs_access() {
        let mut fx = fixture();
        connect(&mut fx, "10.0.0.1");

        let session = fx.sessions.get(fx.conn_id).unwrap();
        assert_eq!(session.connected_ip, Some(world::parse_ip("10.0.0.1").unwrap()));
        let trace = session.trace.as_ref().unwrap();
        // security 1 -> 40 seconds
        assert_eq!(trace.total_secs, 40);

        assert_eq!(fx.world.access_logs.len(), 1);
        assert_eq!(fx.world.access_logs[0].action, "connection established");
    }

    #[test]
    fn reconnect_leaves_previous_target() {
        let mut fx = fixture();
        fx.world.insert_computer(computer(2, "10.0.0.2", 2));

        connect(&mut fx, "10.0.0.1");
        connect(&mut fx, "10.0.0.2");

        let first_ip = world::parse_ip("10.0.0.1").unwrap();
        assert!(fx
            .world
            .find_computer(first_ip)
            .unwrap()
            .connected_sessions
            .is_empty());

        let action = act(ActionType::DisconnectAll, 0, 0, 0, "");
        run(&mut fx, ActionType::DisconnectAll, &action).unwrap();
        let session = fx.sessions.get(fx.conn_id).unwrap();
        assert!(session.connected_ip.is_none());
        assert!(session.trace.is_none());
    }

    #[test]
    fn bypass_requires_connection_and_rating() {
        let mut fx = fixture();
        let action = act(ActionType::BypassSecurity, 0, packets::subsystem::PROXY, 0, "");
        assert_eq!(
            run(&mut fx, ActionType::BypassSecurity, &action),
            Err(ActionError::NotConnected)
        );

        connect(&mut fx, "10.0.0.1");
        run(&mut fx, ActionType::BypassSecurity, &action).unwrap();
        let ip = world::parse_ip("10.0.0.1").unwrap();
        assert!(fx.world.find_computer(ip).unwrap().proxy_bypassed);

        // Rating below security is denied.
        fx.sessions.get_mut(fx.conn_id).unwrap().uplink_rating = 0;
        let firewall = act(
            ActionType::BypassSecurity,
            0,
            packets::subsystem::FIREWALL,
            0,
            "",
        );
        assert_eq!(
            run(&mut fx, ActionType::BypassSecurity, &firewall),
            Err(ActionError::AccessDenied)
        );

        let bogus = act(ActionType::BypassSecurity, 0, 9, 0, "");
        assert_eq!(
            run(&mut fx, ActionType::BypassSecurity, &bogus),
            Err(ActionError::InvalidParams)
        );
    }

    #[test]
    fn download_gated_on_proxy_and_firewall() {
        let mut fx = fixture();
        connect(&mut fx, "10.0.0.1");

        let download = act(ActionType::DownloadFile, 0, 0, 0, "research.dat");
        assert_eq!(
            run(&mut fx, ActionType::DownloadFile, &download),
            Err(ActionError::AccessDenied)
        );

        for sub in [packets::subsystem::PROXY, packets::subsystem::FIREWALL] {
            let action = act(ActionType::BypassSecurity, 0, sub, 0, "");
            run(&mut fx, ActionType::BypassSecurity, &action).unwrap();
        }
        run(&mut fx, ActionType::DownloadFile, &download).unwrap();

        let session = fx.sessions.get(fx.conn_id).unwrap();
        assert_eq!(session.downloads.len(), 1);
        assert_eq!(session.downloads[0].filename, "research.dat");
    }

    #[test]
    fn delete_log_needs_monitor_disabled() {
        let mut fx = fixture();
        connect(&mut fx, "10.0.0.1");
        let log_id = fx.world.access_logs[0].id;

        let action = act(ActionType::DeleteLog, log_id as u32, 0, 0, "");
        assert_eq!(
            run(&mut fx, ActionType::DeleteLog, &action),
            Err(ActionError::AccessDenied)
        );

        let monitor = act(ActionType::BypassSecurity, 0, packets::subsystem::MONITOR, 0, "");
        run(&mut fx, ActionType::BypassSecurity, &monitor).unwrap();
        run(&mut fx, ActionType::DeleteLog, &action).unwrap();
        assert!(fx.world.find_log(log_id).is_none());

        // Gone means gone.
        assert_eq!(
            run(&mut fx, ActionType::DeleteLog, &action),
            Err(ActionError::NotFound)
        );
    }

    #[test]
    fn transfer_moves_between_accounts_and_syncs_owners() {
        let mut fx = fixture();
        fx.world.insert_account(account(1, "111-222", 500, fx.conn_id));
        fx.world.insert_account(account(2, "333-444", 0, 0));

        let action = act(ActionType::TransferMoney, 2, 200, 1, "");
        run(&mut fx, ActionType::TransferMoney, &action).unwrap();

        assert_eq!(fx.world.account_by_id(1).unwrap().balance, 300);
        assert_eq!(fx.world.account_by_id(2).unwrap().balance, 200);
        let session = fx.sessions.get(fx.conn_id).unwrap();
        assert_eq!(session.credits, 300);
        assert!(session.profile_dirty);
    }

    #[test]
    fn transfer_insufficient_funds_rejected() {
        let mut fx = fixture();
        fx.world.insert_account(account(1, "111-222", 100, fx.conn_id));
        fx.world.insert_account(account(2, "333-444", 0, 0));

        let action = act(ActionType::TransferMoney, 2, 500, 1, "");
        assert_eq!(
            run(&mut fx, ActionType::TransferMoney, &action),
            Err(ActionError::InsufficientFunds)
        );
        assert_eq!(fx.world.account_by_id(1).unwrap().balance, 100);
        assert_eq!(fx.world.account_by_id(2).unwrap().balance, 0);
    }

    #[test]
    fn bounty_rejected_without_funds_and_leaves_no_record() {
        let mut fx = fixture();
        // credits = 500, bounty = 1000
        let action = act(ActionType::PlaceBounty, 42, 1000, 0, "");
        assert_eq!(
            run(&mut fx, ActionType::PlaceBounty, &action),
            Err(ActionError::InsufficientFunds)
        );
        assert_eq!(fx.sessions.get(fx.conn_id).unwrap().credits, 500);
        assert!(fx.world.bounties.is_empty());
    }

    #[test]
    fn bounty_deducts_and_records() {
        let mut fx = fixture();
        let action = act(ActionType::PlaceBounty, 42, 300, 0, "");
        run(&mut fx, ActionType::PlaceBounty, &action).unwrap();

        let session = fx.sessions.get(fx.conn_id).unwrap();
        assert_eq!(session.credits, 200);
        assert!(session.profile_dirty);
        assert_eq!(fx.world.bounties.len(), 1);
        assert_eq!(fx.world.bounties[0].target, 42);
        assert_eq!(fx.world.bounties[0].amount, 300);
    }

    #[test]
    fn frame_player_plants_logs_naming_victim() {
        let mut fx = fixture();
        connect(&mut fx, "10.0.0.1");
        let monitor = act(ActionType::BypassSecurity, 0, packets::subsystem::MONITOR, 0, "");
        run(&mut fx, ActionType::BypassSecurity, &monitor).unwrap();

        let logs_before = fx.world.access_logs.len();
        let action = act(ActionType::FramePlayer, 42, 2, 0, "");
        run(&mut fx, ActionType::FramePlayer, &action).unwrap();

        assert_eq!(fx.world.access_logs.len(), logs_before + 2);
        let planted = fx.world.access_logs.last().unwrap();
        assert!(planted.action.contains("agent #42"));
        assert!(planted.action.contains("funds transferred out"));
    }

    #[test]
    fn run_software_requires_connection() {
        let mut fx = fixture();
        let action = act(ActionType::RunSoftware, 0, 3, 1, "");
        assert_eq!(
            run(&mut fx, ActionType::RunSoftware, &action),
            Err(ActionError::NotConnected)
        );

        connect(&mut fx, "10.0.0.1");
        run(&mut fx, ActionType::RunSoftware, &action).unwrap();
        assert!(fx
            .world
            .access_logs
            .iter()
            .any(|entry| entry.action.contains("ran software")));
    }
}
