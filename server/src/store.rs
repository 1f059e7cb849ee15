//! The shared state store: the single source of session truth.
//!
//! All mutation goes through [`GameStore::apply`], which takes the
//! session-wide async mutex, applies the command, and queues the resulting
//! broadcast packet *before* the lock is released. Because the queue is
//! single-consumer and fed only under the lock, the fan-out order is exactly
//! the mutation order: no player can ever observe updates out of the global
//! sequence.

use crate::game::{GameState, MoveOutcome};
use log::{debug, warn};
use shared::map::Map;
use shared::{Direction, Packet};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Terminal-broadcast reason when every pellet was collected.
pub const REASON_COMPLETE: &str = "all pellets collected";

struct StoreInner {
    /// Pristine copy used by `reset`.
    map: Map,
    player_count: usize,
    state: GameState,
    /// Broadcast queue of the current session; `None` between sessions.
    broadcast: Option<mpsc::UnboundedSender<Packet>>,
}

impl StoreInner {
    fn queue(&mut self, packet: Packet) {
        if let Some(tx) = &self.broadcast {
            if tx.send(packet).is_err() {
                warn!("broadcast queue closed; dropping state update");
            }
        }
    }
}

/// Cloneable handle to the mutex-guarded game state. Cloning is cheap and
/// every clone refers to the same state.
#[derive(Clone)]
pub struct GameStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl GameStore {
    pub fn new(map: Map, player_count: usize) -> Self {
        let state = GameState::new(map.clone(), player_count);
        GameStore {
            inner: Arc::new(Mutex::new(StoreInner {
                map,
                player_count,
                state,
                broadcast: None,
            })),
        }
    }

    /// Arms the broadcast queue for a new session. Called by the session
    /// coordinator before any worker is spawned.
    pub async fn attach_session(&self, tx: mpsc::UnboundedSender<Packet>) {
        let mut inner = self.inner.lock().await;
        inner.broadcast = Some(tx);
    }

    /// Applies one movement command under the session lock.
    ///
    /// An accepted command queues exactly one `PlayerMoved` packet (plus
    /// the terminal `GameOver` when it consumed the last pellet) while the
    /// lock is still held. A rejected command queues nothing. Applying a
    /// command to a finished game is a no-op.
    pub async fn apply(&self, player_id: u32, direction: Direction) -> MoveOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = inner.state.apply_move(player_id, direction);

        if outcome.changed {
            let moved = inner.state.player(player_id).map(|player| Packet::PlayerMoved {
                player_id,
                x: player.position.x,
                y: player.position.y,
                score: player.score,
                ate_pellet: outcome.ate_pellet,
            });
            if let Some(moved) = moved {
                inner.queue(moved);
            }
            if outcome.game_over {
                let scores = inner.state.scores();
                inner.queue(Packet::GameOver {
                    scores,
                    reason: REASON_COMPLETE.to_string(),
                });
            }
        }

        outcome
    }

    /// Ends the session early: in one critical section, marks the game over
    /// and queues the terminal broadcast with the scores as of that instant.
    /// Doing both under the lock guarantees no accepted move can slip in
    /// between the scores snapshot and the `GameOver` frame, and that no
    /// further mutation is accepted at all. No-op if the game already
    /// finished on its own.
    pub async fn abort(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_game_over() {
            return;
        }
        inner.state.end();
        let scores = inner.state.scores();
        inner.queue(Packet::GameOver {
            scores,
            reason: reason.to_string(),
        });
    }

    /// Restores the initial map-derived state and detaches the session's
    /// broadcast queue. Taking the mutex guarantees no worker is mid-mutation.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        let map = inner.map.clone();
        let player_count = inner.player_count;
        inner.state = GameState::new(map, player_count);
        inner.broadcast = None;
        debug!("game state reset to initial configuration");
    }

    pub async fn is_game_over(&self) -> bool {
        self.inner.lock().await.state.is_game_over()
    }

    pub async fn scores(&self) -> HashMap<u32, u32> {
        self.inner.lock().await.state.scores()
    }

    /// Consistent point-in-time copy of the whole game state.
    pub async fn snapshot(&self) -> GameState {
        self.inner.lock().await.state.clone()
    }
}
