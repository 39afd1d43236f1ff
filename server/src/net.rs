//! Socket tasks and the message channel into the tick loop.
//!
//! One listener task accepts connections and forwards the raw streams; one
//! task per connection owns the socket, pumping received bytes through a
//! [`FrameReader`] and draining an outbound byte queue. All decoded frames and
//! lifecycle events funnel into the single server message channel, so packets
//! from one connection are always processed in arrival order and every world
//! mutation happens on the tick task.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use protocol::{Frame, FrameReader};

use crate::persist::PlayerProfile;

/// Result of a token verification round trip.
#[derive(Debug)]
pub enum AuthOutcome {
    Verified {
        auth_id: String,
        profile: Option<PlayerProfile>,
    },
    Rejected,
}

/// Everything the tick loop reacts to.
#[derive(Debug)]
pub enum ServerMessage {
    NewConnection {
        stream: TcpStream,
        addr: SocketAddr,
    },
    Frame {
        conn_id: u32,
        frame: Frame,
    },
    ConnectionLost {
        conn_id: u32,
        reason: String,
    },
    AuthResult {
        conn_id: u32,
        outcome: AuthOutcome,
    },
}

/// Spawns the accept loop. Never blocks the tick loop; new streams are handed
/// over as [`ServerMessage::NewConnection`].
pub fn spawn_listener(
    listener: TcpListener,
    messages: UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    if messages
                        .send(ServerMessage::NewConnection { stream, addr })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    })
}

/// Spawns the task owning one connection.
///
/// The task ends in exactly one of two ways: the peer side fails (close,
/// read/write error, protocol violation), which reports
/// [`ServerMessage::ConnectionLost`]; or the server drops the outbound sender,
/// which flushes the remaining queue and closes the socket silently. Either
/// way the socket is closed exactly once.
pub fn spawn_connection(
    conn_id: u32,
    stream: TcpStream,
    mut outbound: UnboundedReceiver<Vec<u8>>,
    messages: UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (mut read_half, mut write_half) = stream.into_split();
        let mut frames = FrameReader::new();
        let mut buf = [0u8; 4096];

        let reason = 'conn: loop {
            tokio::select! {
                result = read_half.read(&mut buf) => {
                    match result {
                        Ok(0) => break 'conn "Connection closed by peer".to_string(),
                        Ok(n) => {
                            frames.extend(&buf[..n]);
                            loop {
                                match frames.next_frame() {
                                    Ok(Some(frame)) => {
                                        if messages
                                            .send(ServerMessage::Frame { conn_id, frame })
                                            .is_err()
                                        {
                                            // Server is gone; nothing to report to.
                                            return;
                                        }
                                    }
                                    Ok(None) => break,
                                    Err(e) => break 'conn format!("Protocol error: {e}"),
                                }
                            }
                        }
                        Err(e) => break 'conn format!("Receive failed: {e}"),
                    }
                }
                queued = outbound.recv() => {
                    match queued {
                        Some(bytes) => {
                            if write_half.write_all(&bytes).await.is_err() {
                                break 'conn "Send failed".to_string();
                            }
                        }
                        None => {
                            // Server-initiated close; the queue has already
                            // been drained.
                            let _ = write_half.shutdown().await;
                            return;
                        }
                    }
                }
            }
        };

        let _ = messages.send(ServerMessage::ConnectionLost { conn_id, reason });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::frame::HEADER_LEN;
    use protocol::PacketType;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn frames_flow_across_tcp_boundaries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (msg_tx, mut msg_rx) = unbounded_channel();
        let (_out_tx, out_rx) = unbounded_channel();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        spawn_connection(1, server_side, out_rx, msg_tx);

        // Keepalive frame split across two writes, straddling the header.
        let frame = Frame::new(PacketType::Keepalive, b"ka".to_vec()).encode();
        client.write_all(&frame[..3]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(&frame[3..]).await.unwrap();

        match msg_rx.recv().await.unwrap() {
            ServerMessage::Frame { conn_id, frame } => {
                assert_eq!(conn_id, 1);
                assert_eq!(frame.kind, PacketType::Keepalive as u8);
                assert_eq!(frame.payload, b"ka");
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_close_reports_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (msg_tx, mut msg_rx) = unbounded_channel();
        let (_out_tx, out_rx) = unbounded_channel();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        spawn_connection(3, server_side, out_rx, msg_tx);

        drop(client);

        match msg_rx.recv().await.unwrap() {
            ServerMessage::ConnectionLost { conn_id, .. } => assert_eq!(conn_id, 3),
            other => panic!("expected connection lost, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_outbound_sender_flushes_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (msg_tx, _msg_rx) = unbounded_channel();
        let (out_tx, out_rx) = unbounded_channel();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        spawn_connection(4, server_side, out_rx, msg_tx);

        let bytes = Frame::new(PacketType::Disconnect, vec![0u8; 64]).encode();
        out_tx.send(bytes.clone()).unwrap();
        drop(out_tx);

        // The queued frame arrives, then EOF.
        let mut received = vec![0u8; bytes.len()];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(received[..HEADER_LEN], bytes[..HEADER_LEN]);
        assert_eq!(client.read(&mut [0u8; 16]).await.unwrap(), 0);
    }
}
