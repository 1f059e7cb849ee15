//! Broadcast fan-out.
//!
//! A single task consumes the session's broadcast queue and writes each
//! packet, byte-identically, to every connected player in arrival order.
//! Delivery to a broken connection is best-effort: the sink is dropped and
//! the others keep receiving. The task ends after forwarding `GameOver`,
//! when the queue closes, or, on session shutdown, after draining what
//! was already queued.

use crate::session::{ExitNotice, ExitReason, Unit};
use log::{info, warn};
use shared::{encode_frame, Packet};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

/// The write half of one player's connection, as owned by the fan-out.
pub struct PlayerSink<W> {
    pub player_id: u32,
    pub writer: W,
}

pub async fn run_broadcaster<W>(
    mut queue: mpsc::UnboundedReceiver<Packet>,
    mut sinks: Vec<PlayerSink<W>>,
    mut shutdown: watch::Receiver<bool>,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
) where
    W: AsyncWrite + Unpin,
{
    let reason = fan_out_loop(&mut queue, &mut sinks, &mut shutdown).await;

    // Closing the write halves is what ends each client's stream.
    for sink in &mut sinks {
        let _ = sink.writer.shutdown().await;
    }

    info!("broadcaster exiting: {}", reason);
    let _ = exit_tx.send(ExitNotice {
        unit: Unit::Broadcaster,
        reason,
    });
}

async fn fan_out_loop<W>(
    queue: &mut mpsc::UnboundedReceiver<Packet>,
    sinks: &mut Vec<PlayerSink<W>>,
    shutdown: &mut watch::Receiver<bool>,
) -> ExitReason
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            message = queue.recv() => match message {
                Some(packet) => {
                    if forward(&packet, sinks).await {
                        return ExitReason::GameOver;
                    }
                }
                None => return ExitReason::QueueClosed,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Forward whatever was queued before the stop signal so
                    // a pending GameOver still reaches every player.
                    while let Ok(packet) = queue.try_recv() {
                        if forward(&packet, sinks).await {
                            return ExitReason::GameOver;
                        }
                    }
                    return ExitReason::Cancelled;
                }
            }
        }
    }
}

/// Writes one packet to every live sink. Returns true when the packet was
/// the terminal `GameOver`.
async fn forward<W>(packet: &Packet, sinks: &mut Vec<PlayerSink<W>>) -> bool
where
    W: AsyncWrite + Unpin,
{
    let terminal = matches!(packet, Packet::GameOver { .. });

    let frame = match encode_frame(packet) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("failed to encode broadcast packet: {}", e);
            return terminal;
        }
    };

    let mut dead = Vec::new();
    for (index, sink) in sinks.iter_mut().enumerate() {
        if let Err(e) = sink.writer.write_all(&frame).await {
            warn!("dropping player {} from fan-out: {}", sink.player_id, e);
            dead.push(index);
        }
    }
    for index in dead.into_iter().rev() {
        sinks.remove(index);
    }

    terminal
}
