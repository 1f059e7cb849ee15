//! Client-side connection handling and the interactive session loop.

use log::{info, warn};
use shared::map::Map;
use shared::{read_packet, write_packet, Direction, Packet, PROTOCOL_VERSION};
use std::error::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    player_id: Option<u32>,
}

impl Client {
    pub async fn connect(server: &str) -> Result<Self, Box<dyn Error>> {
        let stream = TcpStream::connect(server).await?;
        let (reader, writer) = stream.into_split();
        Ok(Client {
            reader,
            writer,
            player_id: None,
        })
    }

    /// Registration handshake: send `Register`, then consume the
    /// `Registered` ack and the map payload. Returns the assigned id.
    pub async fn register(&mut self) -> Result<u32, Box<dyn Error>> {
        write_packet(
            &mut self.writer,
            &Packet::Register {
                client_version: PROTOCOL_VERSION,
            },
        )
        .await?;

        match read_packet(&mut self.reader).await? {
            Some(Packet::Registered { player_id }) => {
                self.player_id = Some(player_id);
            }
            other => return Err(format!("expected Registered, got {:?}", other).into()),
        }
        match read_packet(&mut self.reader).await? {
            Some(Packet::MapData { map }) => {
                // Validate the payload before showing it.
                Map::parse(&map)?;
                println!("{}", map);
            }
            other => return Err(format!("expected MapData, got {:?}", other).into()),
        }

        self.player_id
            .ok_or_else(|| "registration did not assign an id".into())
    }

    /// Interactive loop: a background task turns stdin lines into movement
    /// commands while this loop prints every broadcast frame. Returns after
    /// `GameOver` or when the server closes the connection.
    pub async fn run(self) -> Result<(), Box<dyn Error>> {
        let Client {
            mut reader,
            mut writer,
            player_id,
        } = self;

        // Input runs in its own task so a half-read broadcast frame is never
        // abandoned mid-stream.
        let input_task = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(text)) = lines.next_line().await {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_direction(trimmed) {
                    Some(direction) => {
                        if write_packet(&mut writer, &Packet::Move { direction })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    None => warn!("not a direction: {:?}", trimmed),
                }
            }
        });

        loop {
            match read_packet(&mut reader).await? {
                Some(packet) => {
                    if handle_packet(player_id, packet) {
                        break;
                    }
                }
                None => {
                    info!("server closed the connection");
                    break;
                }
            }
        }

        input_task.abort();
        Ok(())
    }
}

/// Prints one broadcast update. Returns true when the session is over.
fn handle_packet(own_id: Option<u32>, packet: Packet) -> bool {
    match packet {
        Packet::SessionStart { player_count } => {
            println!("session started with {} players", player_count);
        }
        Packet::PlayerMoved {
            player_id,
            x,
            y,
            score,
            ate_pellet,
        } => {
            let me = own_id == Some(player_id);
            println!(
                "player {}{} -> ({}, {}){} [score {}]",
                player_id,
                if me { " (you)" } else { "" },
                x,
                y,
                if ate_pellet { " ate a pellet" } else { "" },
                score
            );
        }
        Packet::GameOver { scores, reason } => {
            let mut ranked: Vec<(u32, u32)> = scores.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            println!("game over: {}", reason);
            for (player_id, score) in ranked {
                println!("  player {}: {} pellets", player_id, score);
            }
            return true;
        }
        other => warn!("unexpected packet from server: {:?}", other),
    }
    false
}

/// Maps a typed command to a direction. Accepts the word forms and the
/// arrow-ish single characters.
pub fn parse_direction(text: &str) -> Option<Direction> {
    match text.to_ascii_lowercase().as_str() {
        "up" | "u" | "^" => Some(Direction::Up),
        "down" | "d" | "v" => Some(Direction::Down),
        "left" | "l" | "<" => Some(Direction::Left),
        "right" | "r" | ">" => Some(Direction::Right),
        _ => None,
    }
}
