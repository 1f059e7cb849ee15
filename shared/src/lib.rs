//! Wire protocol and map model shared by the maze-arena server and client.

pub mod map;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Version tag carried in the registration frame; mismatches are rejected
/// during the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default number of players a session waits for.
pub const DEFAULT_PLAYER_COUNT: usize = 2;

/// Upper bound on a single wire frame. Large enough for any sane map
/// payload, small enough to reject garbage length prefixes outright.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// One of the four movement directions a player may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Grid offset of one step in this direction. The y axis grows downwards,
    /// matching the map's row order.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Register {
        client_version: u32,
    },
    Move {
        direction: Direction,
    },

    // Server -> client
    Registered {
        player_id: u32,
    },
    MapData {
        map: String,
    },
    SessionStart {
        player_count: u32,
    },
    PlayerMoved {
        player_id: u32,
        x: u32,
        y: u32,
        score: u32,
        ate_pellet: bool,
    },
    GameOver {
        scores: HashMap<u32, u32>,
        reason: String,
    },
}

/// Encodes a packet into a complete wire frame: a `u32` little-endian length
/// prefix followed by the bincode payload. The broadcaster encodes once and
/// writes the same bytes to every player.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, bincode::Error> {
    let payload = bincode::serialize(packet)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Writes one framed packet to the stream.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame =
        encode_frame(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&frame).await
}

/// Reads one framed packet from the stream. Returns `Ok(None)` on an orderly
/// close, i.e. EOF before the next length prefix; anything else that cuts a
/// frame short is an error.
pub async fn read_packet<R>(reader: &mut R) -> io::Result<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
