//! Integration tests for the session-coordination engine.
//!
//! These tests drive a real server over real TCP connections: registration,
//! ordered broadcasting, game over, session restart, lobby timeout, and
//! graceful shutdown.

use server::game::GameState;
use server::supervisor::{ServerConfig, Supervisor};
use shared::map::Map;
use shared::{read_packet, write_packet, Direction, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// REGISTRATION AND LOBBY TESTS
mod registration_tests {
    use super::*;

    #[tokio::test]
    async fn handshake_assigns_sequential_ids() {
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, test_config()).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let id1 = register(&mut first).await;
        assert_eq!(id1, 1);

        let mut second = TcpStream::connect(addr).await.unwrap();
        let id2 = register(&mut second).await;
        assert_eq!(id2, 2);

        assert_eq!(
            recv(&mut first).await,
            Some(Packet::SessionStart { player_count: 2 })
        );
        assert_eq!(
            recv(&mut second).await,
            Some(Packet::SessionStart { player_count: 2 })
        );
    }

    #[tokio::test]
    async fn non_register_first_frame_does_not_consume_the_slot() {
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, test_config()).await;

        // An impostor opens with a Move; the server must discard it.
        let mut impostor = TcpStream::connect(addr).await.unwrap();
        write_packet(
            &mut impostor,
            &Packet::Move {
                direction: Direction::Up,
            },
        )
        .await
        .unwrap();
        assert_eq!(recv(&mut impostor).await, None);

        // The slot was not consumed: the next two registrations get 1 and 2.
        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(register(&mut first).await, 1);
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(register(&mut second).await, 2);
    }

    #[tokio::test]
    async fn version_mismatch_is_rejected() {
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, test_config()).await;

        let mut stale = TcpStream::connect(addr).await.unwrap();
        write_packet(
            &mut stale,
            &Packet::Register {
                client_version: PROTOCOL_VERSION + 7,
            },
        )
        .await
        .unwrap();
        assert_eq!(recv(&mut stale).await, None);

        let mut fresh = TcpStream::connect(addr).await.unwrap();
        assert_eq!(register(&mut fresh).await, 1);
    }

    #[tokio::test]
    async fn lobby_times_out_and_a_new_session_can_form() {
        let mut config = test_config();
        config.lobby_timeout = Duration::from_millis(400);
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, config).await;

        // Only one of the two required players shows up.
        let mut lonely = TcpStream::connect(addr).await.unwrap();
        assert_eq!(register(&mut lonely).await, 1);

        // The lobby expires and the partially-formed session is torn down:
        // the registered connection closes without a session ever starting.
        assert_eq!(recv(&mut lonely).await, None);

        // The very next lobby accepts a full complement.
        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(register(&mut first).await, 1);
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(register(&mut second).await, 2);
        assert_eq!(
            recv(&mut first).await,
            Some(Packet::SessionStart { player_count: 2 })
        );
    }

    #[tokio::test]
    async fn termination_request_in_lobby_exits_promptly() {
        let (_addr, term, server) = spawn_server(SCENARIO_MAP, test_config()).await;

        term.send(true).unwrap();
        let result = timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not exit after a lobby termination request")
            .unwrap();
        assert!(result.is_ok());
    }
}

/// SESSION AND BROADCAST TESTS
mod session_tests {
    use super::*;

    /// The canonical scenario: player 1 applies two RIGHT moves while
    /// player 2 applies one UP move. Both players must observe the same
    /// three updates, in an order consistent with one serial order.
    #[tokio::test]
    async fn concurrent_commands_reach_all_players_in_one_order() {
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, test_config()).await;
        let (mut first, mut second) = start_session(addr).await;

        let send_first = async {
            send_move(&mut first, Direction::Right).await;
            send_move(&mut first, Direction::Right).await;
        };
        let send_second = async {
            send_move(&mut second, Direction::Up).await;
        };
        tokio::join!(send_first, send_second);

        let seen_by_first = collect_moves(&mut first, 3).await;
        let seen_by_second = collect_moves(&mut second, 3).await;

        // Identical streams: same packets, same order.
        assert_eq!(seen_by_first, seen_by_second);

        // The observed order replays cleanly as a serial execution.
        let replayed = replay(SCENARIO_MAP, 2, &seen_by_first);
        let p1 = replayed.player(1).unwrap();
        let p2 = replayed.player(2).unwrap();
        assert_eq!((p1.position.x, p1.position.y), (3, 2));
        assert_eq!(p1.score, 2);
        assert_eq!((p2.position.x, p2.position.y), (4, 1));
        assert_eq!(p2.score, 0);
    }

    #[tokio::test]
    async fn game_over_is_the_last_frame_everyone_receives() {
        let (addr, _term, _server) = spawn_server(LAST_PELLET_MAP, test_config()).await;
        let (mut first, mut second) = start_session(addr).await;

        // Player 1 takes the only pellet.
        send_move(&mut first, Direction::Right).await;

        for stream in [&mut first, &mut second] {
            match recv(stream).await {
                Some(Packet::PlayerMoved {
                    player_id,
                    score,
                    ate_pellet,
                    ..
                }) => {
                    assert_eq!(player_id, 1);
                    assert_eq!(score, 1);
                    assert!(ate_pellet);
                }
                other => panic!("expected the winning move, got {:?}", other),
            }
            match recv(stream).await {
                Some(Packet::GameOver { scores, .. }) => {
                    assert_eq!(scores.get(&1), Some(&1));
                    assert_eq!(scores.get(&2), Some(&0));
                }
                other => panic!("expected GameOver, got {:?}", other),
            }
            // Nothing after GameOver; the connection closes.
            assert_eq!(recv(stream).await, None);
        }
    }

    #[tokio::test]
    async fn disconnect_ends_the_session_for_everyone() {
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, test_config()).await;
        let (mut first, second) = start_session(addr).await;

        drop(second);

        // The survivor's stream still terminates with GameOver, then EOF.
        let mut last = None;
        while let Some(packet) = recv(&mut first).await {
            last = Some(packet);
        }
        match last {
            Some(Packet::GameOver { .. }) => {}
            other => panic!("expected a terminal GameOver, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn session_restarts_with_fresh_state_after_disconnect() {
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, test_config()).await;

        // First session: player 1 scores once, then leaves.
        let (mut first, mut second) = start_session(addr).await;
        send_move(&mut first, Direction::Right).await;
        match recv(&mut second).await {
            Some(Packet::PlayerMoved { score: 1, .. }) => {}
            other => panic!("expected a scoring move, got {:?}", other),
        }
        drop(first);
        while recv(&mut second).await.is_some() {}

        // Second session: positions and scores are back at the start.
        let (mut first, mut second) = start_session(addr).await;
        send_move(&mut first, Direction::Right).await;
        match recv(&mut second).await {
            Some(Packet::PlayerMoved {
                player_id,
                x,
                y,
                score,
                ate_pellet,
            }) => {
                assert_eq!(player_id, 1);
                // Same pellet, same spot: the reset restored the map.
                assert_eq!((x, y), (2, 2));
                assert_eq!(score, 1);
                assert!(ate_pellet);
            }
            other => panic!("expected the same first move as last session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_and_invalid_commands_broadcast_nothing() {
        let (addr, _term, _server) = spawn_server(SCENARIO_MAP, test_config()).await;
        let (mut first, mut second) = start_session(addr).await;

        // A wall move, then a stray Register: neither may produce a frame.
        send_move(&mut first, Direction::Left).await; // boundary wall left of spawn 1
        write_packet(
            &mut second,
            &Packet::Register {
                client_version: PROTOCOL_VERSION,
            },
        )
        .await
        .unwrap();

        // A valid move afterwards is the next (and only) thing broadcast.
        send_move(&mut first, Direction::Right).await;
        match recv(&mut first).await {
            Some(Packet::PlayerMoved { player_id: 1, .. }) => {}
            other => panic!("expected player 1's move first, got {:?}", other),
        }
        match recv(&mut second).await {
            Some(Packet::PlayerMoved { player_id: 1, .. }) => {}
            other => panic!("expected player 1's move first, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn three_player_sessions_fan_out_to_all() {
        let mut config = test_config();
        config.player_count = 3;
        let (addr, _term, _server) = spawn_server(THREE_PLAYER_MAP, config).await;

        let mut streams = Vec::new();
        for expected_id in 1..=3u32 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            assert_eq!(register(&mut stream).await, expected_id);
            streams.push(stream);
        }
        for stream in &mut streams {
            assert_eq!(
                recv(stream).await,
                Some(Packet::SessionStart { player_count: 3 })
            );
        }

        send_move(&mut streams[0], Direction::Right).await;
        for stream in &mut streams {
            match recv(stream).await {
                Some(Packet::PlayerMoved { player_id: 1, .. }) => {}
                other => panic!("expected player 1's move, got {:?}", other),
            }
        }
    }
}

// MAPS

/// Player 1 has two pellets to its right, player 2 has open floor above;
/// the RIGHT/RIGHT/UP scenario succeeds in every interleaving and leaves a
/// pellet on the board.
const SCENARIO_MAP: &str = "#######\n\
                            #     #\n\
                            #1..2 #\n\
                            #  .  #\n\
                            #######";

/// A single pellet next to player 1: the first scoring move ends the game.
const LAST_PELLET_MAP: &str = "####\n\
                               #1.#\n\
                               #2 #\n\
                               ####";

const THREE_PLAYER_MAP: &str = "#########\n\
                                #1  2  3#\n\
                                #       #\n\
                                #########";

// HELPER FUNCTIONS

fn test_config() -> ServerConfig {
    ServerConfig {
        player_count: 2,
        lobby_timeout: Duration::from_secs(30),
        handshake_timeout: Duration::from_secs(5),
        drain_grace: Duration::from_secs(5),
    }
}

type ServerHandle = JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>;

async fn spawn_server(
    map: &str,
    config: ServerConfig,
) -> (SocketAddr, watch::Sender<bool>, ServerHandle) {
    let (term_tx, term_rx) = watch::channel(false);
    let mut supervisor = Supervisor::bind("127.0.0.1:0", map.to_string(), config, term_rx)
        .await
        .expect("failed to bind test server");
    let addr = supervisor.local_addr().unwrap();
    let handle = tokio::spawn(async move { supervisor.run().await });
    (addr, term_tx, handle)
}

/// Completes the registration handshake and returns the assigned id.
async fn register(stream: &mut TcpStream) -> u32 {
    write_packet(
        stream,
        &Packet::Register {
            client_version: PROTOCOL_VERSION,
        },
    )
    .await
    .unwrap();

    let player_id = match recv(stream).await {
        Some(Packet::Registered { player_id }) => player_id,
        other => panic!("expected Registered, got {:?}", other),
    };
    match recv(stream).await {
        Some(Packet::MapData { .. }) => {}
        other => panic!("expected MapData, got {:?}", other),
    }
    player_id
}

/// Registers two players and consumes both SessionStart frames.
async fn start_session(addr: SocketAddr) -> (TcpStream, TcpStream) {
    let mut first = TcpStream::connect(addr).await.unwrap();
    assert_eq!(register(&mut first).await, 1);
    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_eq!(register(&mut second).await, 2);

    assert_eq!(
        recv(&mut first).await,
        Some(Packet::SessionStart { player_count: 2 })
    );
    assert_eq!(
        recv(&mut second).await,
        Some(Packet::SessionStart { player_count: 2 })
    );
    (first, second)
}

/// Reads one frame with a generous timeout; `None` means the server closed
/// the connection.
async fn recv(stream: &mut TcpStream) -> Option<Packet> {
    timeout(Duration::from_secs(10), read_packet(stream))
        .await
        .expect("timed out waiting for a frame")
        .expect("read error")
}

async fn send_move(stream: &mut TcpStream, direction: Direction) {
    write_packet(stream, &Packet::Move { direction })
        .await
        .unwrap();
}

/// Collects the next `count` PlayerMoved frames.
async fn collect_moves(stream: &mut TcpStream, count: usize) -> Vec<Packet> {
    let mut moves = Vec::new();
    while moves.len() < count {
        match recv(stream).await {
            Some(packet @ Packet::PlayerMoved { .. }) => moves.push(packet),
            Some(other) => panic!("unexpected frame while collecting moves: {:?}", other),
            None => panic!("stream ended after {} of {} moves", moves.len(), count),
        }
    }
    moves
}

/// Replays a broadcast stream onto a fresh game state, asserting every
/// update applies cleanly; the result is the serial execution the observed
/// order describes.
fn replay(map_text: &str, player_count: usize, packets: &[Packet]) -> GameState {
    let mut state = GameState::new(Map::parse(map_text).unwrap(), player_count);
    for packet in packets {
        if let Packet::PlayerMoved { player_id, x, y, .. } = packet {
            let from = state.player(*player_id).unwrap().position;
            let direction = Direction::ALL
                .into_iter()
                .find(|d| {
                    let (dx, dy) = d.delta();
                    (from.x as i32 + dx, from.y as i32 + dy) == (*x as i32, *y as i32)
                })
                .expect("broadcast position must be one step from the previous one");
            let outcome = state.apply_move(*player_id, direction);
            assert!(outcome.changed, "replayed move must be accepted");
        }
    }
    state
}
