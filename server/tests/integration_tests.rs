//! End-to-end tests: a real server on an ephemeral port, driven by raw TCP
//! clients speaking the framed binary protocol.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use protocol::delta::{self, DeltaReader};
use protocol::packets::{
    Action, ActionType, Chat, Disconnect, Handshake, HandshakeAck, NetError, PlayerList,
};
use protocol::{Frame, FrameReader, PacketType, PROTOCOL_VERSION};

use server::config::ServerConfig;
use server::server::Server;
use server::world::{parse_ip, BankAccount, World};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(config: ServerConfig, world: World) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut server = Server::new(config, world, None);
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    addr
}

fn bank_account(id: i32, number: &str, balance: i64, owner: u32) -> BankAccount {
    BankAccount {
        id,
        bank_ip: parse_ip("20.0.0.1").unwrap(),
        number: number.to_string(),
        name: format!("account-{number}"),
        balance,
        owner,
    }
}

struct TestClient {
    stream: TcpStream,
    frames: FrameReader,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            frames: FrameReader::new(),
        }
    }

    async fn send(&mut self, kind: PacketType, payload: Vec<u8>) {
        let bytes = Frame::new(kind, payload).encode();
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn handshake(&mut self, handle: &str, protocol_version: u32) {
        let handshake = Handshake {
            protocol_version,
            client_version: 1,
            handle: handle.to_string(),
            auth_token: String::new(),
        };
        self.send(PacketType::Handshake, handshake.encode()).await;
    }

    /// Reads the next complete frame, failing the test after a timeout.
    async fn recv_frame(&mut self) -> Frame {
        timeout(RECV_TIMEOUT, async {
            let mut buf = [0u8; 4096];
            loop {
                if let Some(frame) = self.frames.next_frame().unwrap() {
                    return frame;
                }
                let n = self.stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed while waiting for a frame");
                self.frames.extend(&buf[..n]);
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    /// Skips frames until one of the wanted type arrives.
    async fn recv_until(&mut self, kind: PacketType) -> Frame {
        loop {
            let frame = self.recv_frame().await;
            if frame.kind == kind as u8 {
                return frame;
            }
        }
    }

    /// Reads until EOF, asserting the peer really closed.
    async fn expect_close(&mut self) {
        timeout(RECV_TIMEOUT, async {
            let mut buf = [0u8; 4096];
            loop {
                if self.stream.read(&mut buf).await.unwrap() == 0 {
                    return;
                }
            }
        })
        .await
        .expect("timed out waiting for close");
    }
}

/// Extracts (account id, balance) pairs from a world delta payload.
fn account_balances(payload: &[u8]) -> Vec<(u32, u64)> {
    let mut reader = DeltaReader::new(payload);
    let mut out = Vec::new();
    while reader.has_more() {
        let kind = reader.read_varint().unwrap();
        let mut id = 0u32;
        let mut balance = 0u64;
        while let Some((field_id, field_type)) = reader.read_field().unwrap() {
            if kind == delta::entity::ACCOUNT && field_id == delta::account_field::ID {
                id = reader.read_varint().unwrap();
            } else if kind == delta::entity::ACCOUNT && field_id == delta::account_field::BALANCE {
                balance = reader.read_fixed64().unwrap();
            } else {
                reader.skip_value(field_type).unwrap();
            }
        }
        if kind == delta::entity::ACCOUNT {
            out.push((id, balance));
        }
    }
    out
}

#[tokio::test]
async fn guest_handshake_gets_defaults_and_appears_in_player_list() {
    let addr = start_server(ServerConfig::default(), World::new()).await;
    let mut client = TestClient::connect(addr).await;
    client.handshake("Zero", PROTOCOL_VERSION).await;

    let ack_frame = client.recv_until(PacketType::HandshakeAck).await;
    let ack = HandshakeAck::decode(&ack_frame.payload).unwrap();
    assert!(ack.player_id > 0);

    // Snapshot arrives right after the ack.
    client.recv_until(PacketType::WorldFull).await;

    // The broadcast includes us with the default rating.
    let list_frame = client.recv_until(PacketType::PlayerList).await;
    let list = PlayerList::decode(&list_frame.payload).unwrap();
    let me = list
        .players
        .iter()
        .find(|p| p.handle == "Zero")
        .expect("own handle in player list");
    assert_eq!(me.rating, 1);
}

#[tokio::test]
async fn protocol_version_mismatch_is_rejected() {
    let addr = start_server(ServerConfig::default(), World::new()).await;
    let mut client = TestClient::connect(addr).await;
    client.handshake("Zero", 0).await;

    let frame = client.recv_until(PacketType::Disconnect).await;
    let disconnect = Disconnect::decode(&frame.payload).unwrap();
    assert_eq!(disconnect.reason, "Protocol version mismatch");
    client.expect_close().await;
}

#[tokio::test]
async fn action_before_handshake_kills_the_session() {
    let addr = start_server(ServerConfig::default(), World::new()).await;
    let mut client = TestClient::connect(addr).await;

    // Keepalive is tolerated pre-auth.
    client.send(PacketType::Keepalive, Vec::new()).await;

    let action = Action {
        action: ActionType::ClearBounces as u8,
        target_id: 0,
        param1: 0,
        param2: 0,
        data: String::new(),
    };
    client.send(PacketType::PlayerAction, action.encode()).await;

    let frame = client.recv_until(PacketType::Disconnect).await;
    let disconnect = Disconnect::decode(&frame.payload).unwrap();
    assert_eq!(disconnect.reason, "Invalid handshake sequence");
    client.expect_close().await;
}

#[tokio::test]
async fn transfer_moves_credits_and_streams_deltas_to_owners() {
    let mut world = World::new();
    // Session ids are assigned in connection order starting at 1.
    world.insert_account(bank_account(1, "111-222", 500, 1));
    world.insert_account(bank_account(2, "333-444", 0, 2));

    let addr = start_server(ServerConfig::default(), world).await;

    let mut alice = TestClient::connect(addr).await;
    alice.handshake("Alice", PROTOCOL_VERSION).await;
    alice.recv_until(PacketType::HandshakeAck).await;

    let mut bob = TestClient::connect(addr).await;
    bob.handshake("Bob", PROTOCOL_VERSION).await;
    bob.recv_until(PacketType::HandshakeAck).await;

    let transfer = Action {
        action: ActionType::TransferMoney as u8,
        target_id: 2,
        param1: 200,
        param2: 1,
        data: String::new(),
    };
    alice
        .send(PacketType::PlayerAction, transfer.encode())
        .await;

    // Each owner sees their own account in the next delta.
    let frame = alice.recv_until(PacketType::WorldDelta).await;
    assert_eq!(account_balances(&frame.payload), vec![(1, 300)]);

    let frame = bob.recv_until(PacketType::WorldDelta).await;
    assert_eq!(account_balances(&frame.payload), vec![(2, 200)]);
}

#[tokio::test]
async fn bounty_without_funds_is_rejected_with_reason() {
    let addr = start_server(ServerConfig::default(), World::new()).await;
    let mut client = TestClient::connect(addr).await;
    client.handshake("Zero", PROTOCOL_VERSION).await;
    client.recv_until(PacketType::HandshakeAck).await;

    // Guest defaults give 3000 credits; ask for more.
    let bounty = Action {
        action: ActionType::PlaceBounty as u8,
        target_id: 42,
        param1: 5000,
        param2: 0,
        data: String::new(),
    };
    client.send(PacketType::PlayerAction, bounty.encode()).await;

    let frame = client.recv_until(PacketType::NetError).await;
    let error = NetError::decode(&frame.payload).unwrap();
    assert_eq!(error.action, ActionType::PlaceBounty as u8);
    assert_eq!(error.reason, protocol::packets::reason::INSUFFICIENT_FUNDS);
}

#[tokio::test]
async fn idle_session_times_out_with_reason() {
    let config = ServerConfig {
        connection_timeout: Duration::from_millis(400),
        ..ServerConfig::default()
    };
    let addr = start_server(config, World::new()).await;

    let mut client = TestClient::connect(addr).await;
    client.handshake("Sleeper", PROTOCOL_VERSION).await;
    client.recv_until(PacketType::HandshakeAck).await;

    // Stop sending entirely; the sweep runs every network tick.
    let frame = client.recv_until(PacketType::Disconnect).await;
    let disconnect = Disconnect::decode(&frame.payload).unwrap();
    assert_eq!(disconnect.reason, "Connection timeout");
    client.expect_close().await;
}

#[tokio::test]
async fn keepalives_hold_an_idle_session_open() {
    let config = ServerConfig {
        connection_timeout: Duration::from_millis(400),
        ..ServerConfig::default()
    };
    let addr = start_server(config, World::new()).await;

    let mut client = TestClient::connect(addr).await;
    client.handshake("Watcher", PROTOCOL_VERSION).await;
    client.recv_until(PacketType::HandshakeAck).await;

    // A second of keepalives outlasts the 400 ms timeout several times over.
    for _ in 0..10 {
        client.send(PacketType::Keepalive, Vec::new()).await;
        let frame = client.recv_frame().await;
        assert_ne!(
            frame.kind,
            PacketType::Disconnect as u8,
            "session was dropped despite keepalives"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn chat_is_rebroadcast_with_verified_sender() {
    let addr = start_server(ServerConfig::default(), World::new()).await;

    let mut alice = TestClient::connect(addr).await;
    alice.handshake("Alice", PROTOCOL_VERSION).await;
    alice.recv_until(PacketType::HandshakeAck).await;

    let mut bob = TestClient::connect(addr).await;
    bob.handshake("Bob", PROTOCOL_VERSION).await;
    bob.recv_until(PacketType::HandshakeAck).await;

    // Alice claims to be someone else; the server overwrites the sender.
    let chat = Chat {
        sender: "Mallory".to_string(),
        channel: "global".to_string(),
        message: "meet at the ARC mainframe".to_string(),
    };
    alice.send(PacketType::PlayerChat, chat.encode()).await;

    for client in [&mut alice, &mut bob] {
        let frame = client.recv_until(PacketType::PlayerChat).await;
        let received = Chat::decode(&frame.payload).unwrap();
        assert_eq!(received.sender, "Alice");
        assert_eq!(received.channel, "global");
        assert_eq!(received.message, "meet at the ARC mainframe");
    }
}

#[tokio::test]
async fn server_full_refuses_extra_connections() {
    let config = ServerConfig {
        max_players: 1,
        ..ServerConfig::default()
    };
    let addr = start_server(config, World::new()).await;

    let mut first = TestClient::connect(addr).await;
    first.handshake("Zero", PROTOCOL_VERSION).await;
    first.recv_until(PacketType::HandshakeAck).await;

    let mut second = TestClient::connect(addr).await;
    let frame = second.recv_until(PacketType::Disconnect).await;
    let disconnect = Disconnect::decode(&frame.payload).unwrap();
    assert_eq!(disconnect.reason, "Server full");
    second.expect_close().await;
}
