//! Headless protocol exerciser: connects, handshakes, watches the world
//! stream for a while, then disconnects cleanly. Runs as a guest by default;
//! given `--url` plus `--email`/`--password` it signs in against the
//! persistence backend first and handshakes with the resulting token.

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

use protocol::packets::{
    Action, ActionType, Chat, Disconnect, Handshake, HandshakeAck, PlayerList, TimeSync,
};
use protocol::{Frame, FrameReader, PacketType, PROTOCOL_VERSION};
use server::persist::SupabaseClient;

/// Cybrelink headless test client.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address to connect to
    #[clap(default_value_t = format!("127.0.0.1:{}", protocol::DEFAULT_PORT))]
    target: String,

    /// Display handle for the handshake
    #[clap(long, default_value = "TestAgent")]
    handle: String,

    /// Persistence base URL; enables the authenticated handshake path
    #[clap(long)]
    url: Option<String>,

    /// Persistence anon key
    #[clap(long, default_value = "")]
    key: String,

    /// Account email, used with --password to log in before handshaking
    #[clap(long)]
    email: Option<String>,

    /// Account password
    #[clap(long)]
    password: Option<String>,

    /// Create the account before logging in
    #[clap(long)]
    signup: bool,
}

/// Blocking auth round trip against the backend, off the async workers.
async fn fetch_auth_token(args: &Args) -> Result<String, Box<dyn std::error::Error>> {
    let (Some(url), Some(email), Some(password)) = (&args.url, &args.email, &args.password)
    else {
        return Ok(String::new());
    };

    let url = url.clone();
    let key = args.key.clone();
    let email = email.clone();
    let password = password.clone();
    let handle = args.handle.clone();
    let signup = args.signup;

    let token = tokio::task::spawn_blocking(move || -> Option<String> {
        let client = SupabaseClient::new(&url, &key).ok()?;
        if signup {
            match client.sign_up(&email, &password, &handle) {
                Some(auth_id) => println!("Signed up (auth id {auth_id})"),
                None => println!("Sign up failed (account may already exist)"),
            }
        }
        client.login(&email, &password)
    })
    .await?;

    match token {
        Some(token) => {
            println!("Logged in as {}", args.email.as_deref().unwrap_or(""));
            Ok(token)
        }
        None => {
            println!("Login failed, continuing as guest");
            Ok(String::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let auth_token = fetch_auth_token(&args).await?;

    println!("Connecting to {}", args.target);
    let stream = TcpStream::connect(&args.target).await?;
    println!("Connected from {}", stream.local_addr()?);
    let (mut reader, mut writer) = stream.into_split();

    let handshake = Handshake {
        protocol_version: PROTOCOL_VERSION,
        client_version: 1,
        handle: args.handle.clone(),
        auth_token,
    };
    writer
        .write_all(&Frame::new(PacketType::Handshake, handshake.encode()).encode())
        .await?;
    println!("Sent handshake");

    let mut frames = FrameReader::new();
    let mut buf = [0u8; 4096];
    let mut keepalive_timer = tokio::time::interval(Duration::from_secs(2));
    let deadline = sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    let mut sent_action = false;

    loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                let n = result?;
                if n == 0 {
                    println!("Server closed the connection");
                    return Ok(());
                }
                frames.extend(&buf[..n]);
                while let Some(frame) = frames.next_frame()? {
                    match frame.packet_type() {
                        Some(PacketType::HandshakeAck) => {
                            let ack = HandshakeAck::decode(&frame.payload)?;
                            println!("Authenticated as player #{}", ack.player_id);
                        }
                        Some(PacketType::TimeSync) => {
                            let sync = TimeSync::decode(&frame.payload)?;
                            println!(
                                "Time: {:02}:{:02}:{:02} {}/{}/{}",
                                sync.hour, sync.minute, sync.second,
                                sync.day, sync.month, sync.year
                            );
                        }
                        Some(PacketType::PlayerList) => {
                            let list = PlayerList::decode(&frame.payload)?;
                            let names: Vec<String> = list
                                .players
                                .iter()
                                .map(|p| format!("{} (rating {})", p.handle, p.rating))
                                .collect();
                            println!("Online: [{}]", names.join(", "));
                        }
                        Some(PacketType::WorldFull) => {
                            println!("World snapshot: {} bytes", frame.payload.len());
                        }
                        Some(PacketType::WorldDelta) => {
                            println!("World delta: {} bytes", frame.payload.len());
                        }
                        Some(PacketType::PlayerChat) => {
                            let chat = Chat::decode(&frame.payload)?;
                            println!("[{}] {}: {}", chat.channel, chat.sender, chat.message);
                        }
                        Some(PacketType::Disconnect) => {
                            let packet = Disconnect::decode(&frame.payload)?;
                            println!("Disconnected by server: {}", packet.reason);
                            return Ok(());
                        }
                        other => println!("Packet {:?} ({} bytes)", other, frame.payload.len()),
                    }
                }
            }
            _ = keepalive_timer.tick() => {
                writer
                    .write_all(&Frame::new(PacketType::Keepalive, Vec::new()).encode())
                    .await?;

                // Fire one harmless action so the audit path is visible.
                if !sent_action {
                    sent_action = true;
                    let action = Action {
                        action: ActionType::ClearBounces as u8,
                        target_id: 0,
                        param1: 0,
                        param2: 0,
                        data: String::new(),
                    };
                    writer
                        .write_all(&Frame::new(PacketType::PlayerAction, action.encode()).encode())
                        .await?;
                    println!("Sent CLEAR_BOUNCES action");
                }
            }
            _ = &mut deadline => {
                println!("Test run complete, disconnecting");
                let bye = Disconnect { reason: "Client test complete".to_string() };
                writer
                    .write_all(&Frame::new(PacketType::Disconnect, bye.encode()).encode())
                    .await?;
                return Ok(());
            }
        }
    }
}
