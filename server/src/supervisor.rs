//! Session lifecycle management.
//!
//! The supervisor owns the listener, the shared state store, and the
//! session loop: LOBBY (bounded registration) -> ACTIVE (wait for the first
//! unit exit) -> DRAINING (stop and reap every remaining unit within a
//! grace period) -> RESET (restore the store) -> LOBBY. A termination
//! request observed in the lobby exits immediately; one observed while a
//! game is active is deferred and honored once the session is torn down.

use crate::session::{build_session, SessionHandle};
use crate::store::GameStore;
use log::{error, info, warn};
use shared::map::Map;
use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;

/// Terminal-broadcast reason when a session ends before the game does.
pub const REASON_ABORTED: &str = "session ended early";

/// Externally supplied server parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of players a session waits for.
    pub player_count: usize,
    /// How long the lobby stays open before an incomplete session aborts.
    pub lobby_timeout: Duration,
    /// Bounded wait for the Register frame on a candidate connection.
    pub handshake_timeout: Duration,
    /// Grace period for units to stop during draining before being aborted.
    pub drain_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            player_count: shared::DEFAULT_PLAYER_COUNT,
            lobby_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            drain_grace: Duration::from_secs(5),
        }
    }
}

pub struct Supervisor {
    listener: TcpListener,
    store: GameStore,
    map_text: String,
    config: ServerConfig,
    term_rx: watch::Receiver<bool>,
}

impl Supervisor {
    /// Performs all fatal-init work: map validation, store allocation, and
    /// listener binding. Any failure here aborts server startup.
    pub async fn bind(
        addr: &str,
        map_text: String,
        config: ServerConfig,
        term_rx: watch::Receiver<bool>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let map = Map::parse(&map_text)?;
        if map.spawns().len() < config.player_count {
            return Err(format!(
                "map has {} spawn points but {} players are configured",
                map.spawns().len(),
                config.player_count
            )
            .into());
        }

        let store = GameStore::new(map, config.player_count);
        let listener = TcpListener::bind(addr).await?;
        info!("server listening on {}", listener.local_addr()?);

        Ok(Supervisor {
            listener,
            store,
            map_text,
            config,
            term_rx,
        })
    }

    /// The address the listener actually bound to; lets callers bind port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs sessions until a termination request is honored. Only session
    /// setup failures (a dead listener) propagate as errors.
    pub async fn run(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            info!(
                "lobby open: waiting for {} players, {:?} to register",
                self.config.player_count, self.config.lobby_timeout
            );

            let mut term_rx = self.term_rx.clone();
            let lobby = tokio::select! {
                _ = term_requested(&mut term_rx) => {
                    info!("termination requested with no active game; shutting down");
                    return Ok(());
                }
                outcome = timeout(
                    self.config.lobby_timeout,
                    build_session(
                        &self.listener,
                        &self.store,
                        &self.map_text,
                        self.config.player_count,
                        self.config.handshake_timeout,
                    ),
                ) => outcome,
            };

            match lobby {
                Ok(Ok(handle)) => {
                    let deferred = self.watch_session(handle).await;
                    if deferred {
                        info!("honoring deferred termination request");
                        return Ok(());
                    }
                }
                Ok(Err(e)) => {
                    error!("session setup failed: {}", e);
                    return Err(e);
                }
                Err(_) => {
                    warn!(
                        "lobby timed out before {} players registered; aborting session",
                        self.config.player_count
                    );
                    // Dropping the half-built session closed its shutdown
                    // channel; already-spawned workers exit on that.
                    self.store.reset().await;
                }
            }
        }
    }

    /// ACTIVE: blocks until any unit exits, then drains and resets. Returns
    /// whether a termination request arrived (and was deferred) meanwhile.
    async fn watch_session(&mut self, mut handle: SessionHandle) -> bool {
        let mut deferred = false;
        let mut term_rx = self.term_rx.clone();

        let first_exit = loop {
            if deferred {
                break handle.exit_rx.recv().await;
            }
            tokio::select! {
                _ = term_requested(&mut term_rx) => {
                    info!("termination requested; deferring until the session ends");
                    deferred = true;
                }
                notice = handle.exit_rx.recv() => break notice,
            }
        };

        match first_exit {
            Some(notice) => info!("{} exited ({}); ending session", notice.unit, notice.reason),
            None => warn!("all session units vanished without notice; ending session"),
        }

        self.drain(handle).await;
        self.store.reset().await;
        info!("session torn down; returning to lobby");

        deferred
    }

    /// DRAINING: stop every remaining unit, waiting at most the grace period
    /// per unit before aborting it.
    async fn drain(&self, handle: SessionHandle) {
        let SessionHandle {
            mut broadcaster,
            workers,
            shutdown_tx,
            exit_rx: _exit_rx,
        } = handle;

        // Queue the terminal frame first so every client's stream still ends
        // with GameOver even when the session dies early. The store does the
        // scores snapshot and the queueing in one critical section.
        self.store.abort(REASON_ABORTED).await;
        let _ = shutdown_tx.send(true);

        if timeout(self.config.drain_grace, &mut broadcaster)
            .await
            .is_err()
        {
            warn!("broadcaster exceeded the drain grace period; aborting it");
            broadcaster.abort();
            let _ = broadcaster.await;
        }

        for (player_id, mut worker) in workers {
            if timeout(self.config.drain_grace, &mut worker).await.is_err() {
                warn!(
                    "player {} worker exceeded the drain grace period; aborting it",
                    player_id
                );
                worker.abort();
                let _ = worker.await;
            }
        }
    }
}

/// Resolves once a termination request is visible on the channel. A dropped
/// sender is treated as "never", not as a request.
async fn term_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
