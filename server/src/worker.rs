//! Per-player command worker.
//!
//! One worker task owns the read half of one player's connection. It blocks
//! on the next frame, applies `Move` commands through the store, and exits
//! without escalating on disconnect, malformed input, game over, or
//! session shutdown. Every exit path reports an [`ExitNotice`] so the
//! supervisor can end the session.

use crate::session::{ExitNotice, ExitReason, Unit};
use crate::store::GameStore;
use log::{debug, info, warn};
use shared::{read_packet, Packet};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};

pub async fn run_player_worker<R>(
    player_id: u32,
    mut reader: R,
    store: GameStore,
    mut shutdown: watch::Receiver<bool>,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
) where
    R: AsyncRead + Unpin,
{
    let reason = command_loop(player_id, &mut reader, &store, &mut shutdown).await;
    info!("player {} worker exiting: {}", player_id, reason);
    let _ = exit_tx.send(ExitNotice {
        unit: Unit::Worker(player_id),
        reason,
    });
}

async fn command_loop<R>(
    player_id: u32,
    reader: &mut R,
    store: &GameStore,
    shutdown: &mut watch::Receiver<bool>,
) -> ExitReason
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A closed channel means the session owner is gone; treat it
                // like a stop signal.
                if changed.is_err() || *shutdown.borrow() {
                    return ExitReason::Cancelled;
                }
            }
            frame = read_packet(reader) => match frame {
                Ok(Some(Packet::Move { direction })) => {
                    let outcome = store.apply(player_id, direction).await;
                    debug!(
                        "player {} moved {:?}: changed={}",
                        player_id, direction, outcome.changed
                    );
                    if outcome.game_over {
                        // The terminal broadcast was queued under the same
                        // lock that detected the end of the game.
                        return ExitReason::GameOver;
                    }
                }
                Ok(Some(other)) => {
                    warn!(
                        "player {} sent a non-move packet mid-session ({:?}); ignoring",
                        player_id, other
                    );
                }
                Ok(None) => return ExitReason::Disconnected,
                Err(e) => {
                    warn!("player {}: unreadable frame: {}", player_id, e);
                    return ExitReason::Disconnected;
                }
            }
        }
    }
}
