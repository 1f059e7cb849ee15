//! # Maze Arena Server Library
//!
//! This library implements the session-coordination engine for the maze
//! arena game: a fixed number of players connect over TCP, submit movement
//! commands, and receive a continuously updated view of the shared game
//! state until the session ends.
//!
//! ## Core Responsibilities
//!
//! ### Serialized Mutation
//! A single mutex-guarded [`store::GameStore`] holds the authoritative
//! game state. Every movement command from every player is applied under
//! the same lock, so concurrent commands are totally ordered and no reader
//! ever observes a partial update.
//!
//! ### Ordered Fan-out
//! Each accepted mutation queues exactly one broadcast packet while the
//! lock is still held. A single fan-out task consumes that queue and writes
//! identical bytes to every player in arrival order: all players observe
//! the same sequence of updates, ending with a terminal `GameOver` frame.
//!
//! ### Session Lifetime
//! The [`supervisor::Supervisor`] owns the listener and drives the session
//! loop: a lobby with a registration timeout, an active phase that ends as
//! soon as any unit exits (a player disconnecting ends the session for
//! everyone), a bounded draining phase, and a state reset before the next
//! lobby opens. Graceful termination requests are deferred while a game is
//! active and honored at the lobby transition.
//!
//! ## Module Organization
//!
//! - [`game`]: pure game rules: the maze grid, player positions, pellet
//!   scoring, and the game-over condition. No locking, no I/O.
//! - [`store`]: the shared state store: the mutex discipline and the
//!   queue-before-unlock broadcast invariant.
//! - [`worker`]: one task per player reading commands from that player's
//!   connection and applying them through the store.
//! - [`broadcaster`]: the fan-out task that owns every connection's write
//!   half.
//! - [`session`]: the coordinator: registration handshake, slot retry,
//!   unit spawning, and session wiring.
//! - [`supervisor`]: the lifecycle manager described above.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::supervisor::{ServerConfig, Supervisor};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let map_text = std::fs::read_to_string("maps/classic.txt")?;
//!     let (term_tx, term_rx) = watch::channel(false);
//!
//!     // Wire Ctrl-C into the termination channel; the supervisor defers
//!     // the request while a game is active.
//!     tokio::spawn(async move {
//!         if tokio::signal::ctrl_c().await.is_ok() {
//!             let _ = term_tx.send(true);
//!         }
//!     });
//!
//!     let mut supervisor = Supervisor::bind(
//!         "127.0.0.1:8080",
//!         map_text,
//!         ServerConfig::default(),
//!         term_rx,
//!     )
//!     .await?;
//!
//!     // Runs session after session until termination is honored.
//!     supervisor.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod game;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod worker;
