use log::{info, warn};
use shared::map::{Map, Position, Tile};
use shared::Direction;
use std::collections::HashMap;

/// One participant's slice of the game state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: u32,
    pub position: Position,
    pub score: u32,
}

/// Result of applying one movement command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Whether the command changed the game state at all.
    pub changed: bool,
    /// Whether the move consumed a pellet.
    pub ate_pellet: bool,
    /// Whether the game is over after this command.
    pub game_over: bool,
}

/// The authoritative session state: the maze, every player's position and
/// score, and the game-over flag. Contains no locking and no I/O; the store
/// is responsible for serializing access.
#[derive(Debug, Clone)]
pub struct GameState {
    map: Map,
    players: HashMap<u32, Player>,
    pellets_remaining: usize,
    game_over: bool,
}

impl GameState {
    /// Places players 1..=player_count on their spawn points of a fresh map
    /// copy. The map must have at least `player_count` spawns; the
    /// supervisor validates this at startup.
    pub fn new(map: Map, player_count: usize) -> Self {
        let mut players = HashMap::new();
        for id in 1..=player_count as u32 {
            if let Some(position) = map.spawns().get((id - 1) as usize).copied() {
                players.insert(
                    id,
                    Player {
                        id,
                        position,
                        score: 0,
                    },
                );
            }
        }

        let pellets_remaining = map.pellet_count();
        GameState {
            map,
            players,
            pellets_remaining,
            game_over: false,
        }
    }

    /// Applies one movement command. A move is rejected (returning
    /// `changed: false`) when the game is already over, the player is
    /// unknown, or the target tile is off the grid, a wall, or occupied by
    /// another player. Consuming the last pellet ends the game.
    pub fn apply_move(&mut self, player_id: u32, direction: Direction) -> MoveOutcome {
        let unchanged = MoveOutcome {
            changed: false,
            ate_pellet: false,
            game_over: self.game_over,
        };

        if self.game_over {
            return unchanged;
        }

        let current = match self.players.get(&player_id) {
            Some(player) => player.position,
            None => {
                warn!("move from unknown player {}", player_id);
                return unchanged;
            }
        };

        let target = match self.map.step(current, direction) {
            Some(target) => target,
            None => return unchanged,
        };
        if self.map.tile(target) == Some(Tile::Wall) {
            return unchanged;
        }
        if self
            .players
            .values()
            .any(|p| p.id != player_id && p.position == target)
        {
            return unchanged;
        }

        let ate_pellet = self.map.tile(target) == Some(Tile::Pellet);
        if ate_pellet {
            self.map.set_tile(target, Tile::Floor);
            self.pellets_remaining -= 1;
        }

        if let Some(player) = self.players.get_mut(&player_id) {
            player.position = target;
            if ate_pellet {
                player.score += 1;
            }
        }

        if ate_pellet && self.pellets_remaining == 0 {
            self.game_over = true;
            info!("player {} took the last pellet; game over", player_id);
        }

        MoveOutcome {
            changed: true,
            ate_pellet,
            game_over: self.game_over,
        }
    }

    /// Marks the game as finished regardless of remaining pellets; used when
    /// a session is torn down early. Subsequent moves are no-ops.
    pub fn end(&mut self) {
        self.game_over = true;
    }

    pub fn player(&self, player_id: u32) -> Option<&Player> {
        self.players.get(&player_id)
    }

    pub fn players(&self) -> &HashMap<u32, Player> {
        &self.players
    }

    pub fn scores(&self) -> HashMap<u32, u32> {
        self.players
            .iter()
            .map(|(id, player)| (*id, player.score))
            .collect()
    }

    pub fn pellets_remaining(&self) -> usize {
        self.pellets_remaining
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }
}
