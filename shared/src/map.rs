//! Text-grid map model.
//!
//! Maps are rectangular character grids: `#` is a wall, `.` a pellet, a
//! space is open floor, and the digits `1`..`9` mark player spawn points
//! (floor tiles). The raw text is what travels over the wire; both sides
//! parse it with [`Map::parse`].

use crate::Direction;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Wall,
    Floor,
    Pellet,
}

/// A grid coordinate. `(0, 0)` is the top-left corner; y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    pub fn new(x: u32, y: u32) -> Self {
        Position { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    Empty,
    NotRectangular { line: usize },
    UnknownTile { line: usize, column: usize, found: char },
    DuplicateSpawn { digit: char },
    NoSpawns,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Empty => write!(f, "map text is empty"),
            MapError::NotRectangular { line } => {
                write!(f, "line {} has a different length than the first line", line)
            }
            MapError::UnknownTile {
                line,
                column,
                found,
            } => write!(f, "unknown tile {:?} at line {}, column {}", found, line, column),
            MapError::DuplicateSpawn { digit } => {
                write!(f, "spawn point {:?} appears more than once", digit)
            }
            MapError::NoSpawns => write!(f, "map defines no spawn points"),
        }
    }
}

impl Error for MapError {}

/// A parsed, rectangular maze grid with its spawn points in player order.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    width: u32,
    height: u32,
    tiles: Vec<Tile>,
    spawns: Vec<Position>,
}

impl Map {
    pub fn parse(text: &str) -> Result<Self, MapError> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() || lines[0].is_empty() {
            return Err(MapError::Empty);
        }

        let width = lines[0].chars().count();
        let mut tiles = Vec::with_capacity(width * lines.len());
        let mut spawns: Vec<(char, Position)> = Vec::new();

        for (row, line) in lines.iter().enumerate() {
            if line.chars().count() != width {
                return Err(MapError::NotRectangular { line: row + 1 });
            }
            for (col, ch) in line.chars().enumerate() {
                let tile = match ch {
                    '#' => Tile::Wall,
                    '.' => Tile::Pellet,
                    ' ' => Tile::Floor,
                    '1'..='9' => {
                        let position = Position::new(col as u32, row as u32);
                        if spawns.iter().any(|(digit, _)| *digit == ch) {
                            return Err(MapError::DuplicateSpawn { digit: ch });
                        }
                        spawns.push((ch, position));
                        Tile::Floor
                    }
                    other => {
                        return Err(MapError::UnknownTile {
                            line: row + 1,
                            column: col + 1,
                            found: other,
                        })
                    }
                };
                tiles.push(tile);
            }
        }

        if spawns.is_empty() {
            return Err(MapError::NoSpawns);
        }
        spawns.sort_by_key(|(digit, _)| *digit);

        Ok(Map {
            width: width as u32,
            height: lines.len() as u32,
            tiles,
            spawns: spawns.into_iter().map(|(_, position)| position).collect(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Spawn points ordered by their map digit; player N starts at index N-1.
    pub fn spawns(&self) -> &[Position] {
        &self.spawns
    }

    pub fn tile(&self, position: Position) -> Option<Tile> {
        if position.x >= self.width || position.y >= self.height {
            return None;
        }
        Some(self.tiles[(position.y * self.width + position.x) as usize])
    }

    /// Replaces an in-bounds tile; used when a pellet is consumed.
    pub fn set_tile(&mut self, position: Position, tile: Tile) {
        if position.x < self.width && position.y < self.height {
            self.tiles[(position.y * self.width + position.x) as usize] = tile;
        }
    }

    pub fn pellet_count(&self) -> usize {
        self.tiles.iter().filter(|t| **t == Tile::Pellet).count()
    }

    /// The position one step away, or `None` when the step leaves the grid.
    pub fn step(&self, from: Position, direction: Direction) -> Option<Position> {
        let (dx, dy) = direction.delta();
        let x = from.x as i32 + dx;
        let y = from.y as i32 + dy;
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(Position::new(x as u32, y as u32))
    }
}
