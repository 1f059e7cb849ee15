//! Session coordination: registration, unit spawning, and session wiring.
//!
//! [`build_session`] fills the lobby one slot at a time. A candidate
//! connection must open with a `Register` frame inside the handshake
//! timeout; anything else discards that connection and keeps the slot open.
//! Each registered player immediately gets a worker for the read half of
//! its connection; the write halves are collected for the fan-out, which is
//! spawned once the lobby is full.

use crate::broadcaster::{run_broadcaster, PlayerSink};
use crate::store::GameStore;
use crate::worker::run_player_worker;
use log::{info, warn};
use shared::{read_packet, write_packet, Packet, PROTOCOL_VERSION};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Delay before retrying a failed `accept`.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Consecutive `accept` failures after which the listener is considered dead.
const MAX_ACCEPT_FAILURES: u32 = 5;

/// Identifies one spawned execution unit of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Broadcaster,
    Worker(u32),
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Broadcaster => write!(f, "broadcaster"),
            Unit::Worker(player_id) => write!(f, "player {} worker", player_id),
        }
    }
}

/// Why a unit stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The player's connection closed or produced unreadable input.
    Disconnected,
    /// The game finished; the terminal broadcast is already queued.
    GameOver,
    /// The broadcast queue's last sender went away.
    QueueClosed,
    /// The session shutdown signal was observed.
    Cancelled,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitReason::Disconnected => "disconnected",
            ExitReason::GameOver => "game over",
            ExitReason::QueueClosed => "queue closed",
            ExitReason::Cancelled => "cancelled",
        };
        write!(f, "{}", text)
    }
}

/// Sent by every unit on its way out.
#[derive(Debug)]
pub struct ExitNotice {
    pub unit: Unit,
    pub reason: ExitReason,
}

/// Bookkeeping for one running session, owned by the supervisor: the join
/// handles of every unit plus the channels that control them.
pub struct SessionHandle {
    pub broadcaster: JoinHandle<()>,
    pub workers: Vec<(u32, JoinHandle<()>)>,
    pub shutdown_tx: watch::Sender<bool>,
    pub exit_rx: mpsc::UnboundedReceiver<ExitNotice>,
}

/// Runs the lobby to completion and assembles the session.
///
/// Cancelling this future (the supervisor races it against the lobby
/// timeout) drops the session's shutdown sender, which every worker spawned
/// so far observes as a closed channel and exits on.
pub async fn build_session(
    listener: &TcpListener,
    store: &GameStore,
    map_text: &str,
    player_count: usize,
    handshake_timeout: Duration,
) -> Result<SessionHandle, Box<dyn Error + Send + Sync>> {
    let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();

    store.attach_session(broadcast_tx).await;

    let mut workers = Vec::with_capacity(player_count);
    let mut sinks = Vec::with_capacity(player_count);

    for slot in 1..=player_count as u32 {
        info!("waiting for player {}/{}", slot, player_count);
        let (reader, writer) =
            register_player(listener, slot, map_text, handshake_timeout).await?;

        let worker = tokio::spawn(run_player_worker(
            slot,
            reader,
            store.clone(),
            shutdown_rx.clone(),
            exit_tx.clone(),
        ));
        workers.push((slot, worker));
        sinks.push(PlayerSink {
            player_id: slot,
            writer,
        });
        info!("player {}/{} registered", slot, player_count);
    }

    // Lobby complete: tell everyone the session is on.
    for sink in &mut sinks {
        if let Err(e) = write_packet(
            &mut sink.writer,
            &Packet::SessionStart {
                player_count: player_count as u32,
            },
        )
        .await
        {
            warn!(
                "failed to notify player {} of session start: {}",
                sink.player_id, e
            );
        }
    }

    let broadcaster = tokio::spawn(run_broadcaster(broadcast_rx, sinks, shutdown_rx, exit_tx));
    info!("session started with {} players", player_count);

    Ok(SessionHandle {
        broadcaster,
        workers,
        shutdown_tx,
        exit_rx,
    })
}

/// Accepts connections until one completes the registration handshake for
/// this slot. A candidate that fails the handshake is discarded and the
/// slot stays open; the slot index never advances on failure.
async fn register_player(
    listener: &TcpListener,
    slot: u32,
    map_text: &str,
    handshake_timeout: Duration,
) -> Result<(OwnedReadHalf, OwnedWriteHalf), Box<dyn Error + Send + Sync>> {
    let mut accept_failures = 0u32;
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(pair) => {
                accept_failures = 0;
                pair
            }
            Err(e) => {
                accept_failures += 1;
                if accept_failures >= MAX_ACCEPT_FAILURES {
                    return Err(Box::new(e));
                }
                warn!("accept failed ({}); retrying", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        match timeout(handshake_timeout, handshake(&mut stream, slot, map_text)).await {
            Ok(Ok(())) => return Ok(stream.into_split()),
            Ok(Err(e)) => {
                warn!("registration of {} failed: {}; slot {} stays open", addr, e, slot);
            }
            Err(_) => {
                warn!("registration of {} timed out; slot {} stays open", addr, slot);
            }
        }
        // The candidate connection is dropped here and the slot retried.
    }
}

/// The registration exchange on a candidate connection: expect `Register`,
/// reply with the assigned id and the map payload.
async fn handshake<S>(stream: &mut S, player_id: u32, map_text: &str) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match read_packet(stream).await {
        Ok(Some(Packet::Register { client_version })) if client_version == PROTOCOL_VERSION => {}
        Ok(Some(Packet::Register { client_version })) => {
            return Err(HandshakeError::VersionMismatch { client_version })
        }
        Ok(Some(other)) => return Err(HandshakeError::NotRegister(other)),
        Ok(None) => return Err(HandshakeError::Closed),
        Err(e) => return Err(HandshakeError::Io(e)),
    }

    write_packet(stream, &Packet::Registered { player_id })
        .await
        .map_err(HandshakeError::Io)?;
    write_packet(
        stream,
        &Packet::MapData {
            map: map_text.to_string(),
        },
    )
    .await
    .map_err(HandshakeError::Io)?;
    Ok(())
}

#[derive(Debug)]
pub enum HandshakeError {
    /// Connection closed before any frame arrived.
    Closed,
    /// The first frame was not a `Register`.
    NotRegister(Packet),
    /// Protocol version disagreement.
    VersionMismatch { client_version: u32 },
    Io(std::io::Error),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Closed => write!(f, "connection closed before registering"),
            HandshakeError::NotRegister(packet) => {
                write!(f, "first frame was {:?}, not Register", packet)
            }
            HandshakeError::VersionMismatch { client_version } => write!(
                f,
                "client protocol version {} does not match server version {}",
                client_version, PROTOCOL_VERSION
            ),
            HandshakeError::Io(e) => write!(f, "handshake i/o error: {}", e),
        }
    }
}

impl Error for HandshakeError {}
