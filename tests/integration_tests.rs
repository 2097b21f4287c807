//! Integration tests for the board-game session server
//!
//! These tests validate cross-component interactions and real network behavior.

use bincode::{deserialize, serialize};
use shared::{
    Board, ErrorKind, GameKind, Move, Packet, PieceStep, UserRef, Winner, PROTOCOL_VERSION,
};
use std::net::UdpSocket;
use std::thread;
use std::time::Duration;
use tokio::time::sleep;

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests packet serialization round-trip for network protocol validation
    #[tokio::test]
    async fn packet_serialization_roundtrip() {
        let test_packets = vec![
            Packet::Hello {
                version: PROTOCOL_VERSION,
                user: UserRef::new("ada", 2),
            },
            Packet::CreateOrJoin {
                kind: GameKind::Ludo,
                capacity: 4,
            },
            Packet::JoinInvite {
                kind: GameKind::TicTacToe,
                code: 12345,
            },
            Packet::SubmitMove {
                kind: GameKind::Ludo,
                mv: Move::Pieces(vec![PieceStep {
                    from: -1,
                    to: 42,
                    piece: 1,
                }]),
            },
            Packet::MoveApplied {
                board: Board::Lanes(vec![12, -1]),
                active_seat: 2,
                winners: vec![Winner {
                    username: "ada".to_string(),
                    rank: 1,
                }],
                ended: false,
                round: 1,
                win_counts: vec![0, 0],
                reset: false,
                line: None,
                turn_secs: 30,
            },
            Packet::Failure(ErrorKind::NotYourTurn),
        ];

        for packet in test_packets {
            let serialized = serialize(&packet).unwrap();
            let deserialized: Packet = deserialize(&serialized).unwrap();
            assert_eq!(deserialized, packet);
        }
    }

    /// Tests real UDP socket communication
    #[tokio::test]
    async fn udp_socket_communication() {
        let server_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind server socket");
        let server_addr = server_socket.local_addr().unwrap();

        // Echo server
        let server_socket_clone = server_socket.try_clone().unwrap();
        thread::spawn(move || {
            let mut buf = [0; 1024];
            if let Ok((size, client_addr)) = server_socket_clone.recv_from(&mut buf) {
                let _ = server_socket_clone.send_to(&buf[..size], client_addr);
            }
        });

        sleep(Duration::from_millis(10)).await;

        let client_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind client socket");
        client_socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        let test_packet = Packet::Hello {
            version: PROTOCOL_VERSION,
            user: UserRef::new("ada", 1),
        };
        let serialized = serialize(&test_packet).unwrap();

        client_socket.send_to(&serialized, server_addr).unwrap();

        let mut buf = [0; 1024];
        let (size, _) = client_socket.recv_from(&mut buf).unwrap();
        let received_packet: Packet = deserialize(&buf[..size]).unwrap();

        assert_eq!(received_packet, test_packet);
    }
}

/// SERVICE WIRING TESTS
mod service_tests {
    use super::*;
    use server::matchmaking::{InviteJoin, Matchmaker};
    use server::store::{InviteStore, SessionStore};
    use server::turn::TurnEngine;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    const TURN_MS: u64 = 30_000;

    fn services() -> (Matchmaker, TurnEngine, Arc<RwLock<SessionStore>>) {
        let sessions = Arc::new(RwLock::new(SessionStore::new()));
        let invites = Arc::new(RwLock::new(InviteStore::new()));
        (
            Matchmaker::new(Arc::clone(&sessions), Arc::clone(&invites), TURN_MS),
            TurnEngine::new(Arc::clone(&sessions), TURN_MS),
            sessions,
        )
    }

    /// Tests the full public-matchmaking-to-finish path for a 2-player race
    #[tokio::test]
    async fn matchmake_play_and_finish() {
        let (matchmaker, turns, sessions) = services();
        let ada = UserRef::new("ada", 1);
        let lin = UserRef::new("lin", 2);

        matchmaker
            .create_or_join(&ada, GameKind::Snakes, 2, 1_000)
            .await
            .unwrap();
        let joined = matchmaker
            .create_or_join(&lin, GameKind::Snakes, 2, 2_000)
            .await
            .unwrap();
        assert!(joined.snapshot.started);

        let mid = turns
            .submit_move("ada", GameKind::Snakes, &Move::Advance { dest: 40 }, 3_000)
            .await
            .unwrap();
        assert_eq!(mid.active_seat, 2);

        turns
            .submit_move("lin", GameKind::Snakes, &Move::Advance { dest: 55 }, 4_000)
            .await
            .unwrap();

        let end = turns
            .submit_move("ada", GameKind::Snakes, &Move::Advance { dest: 99 }, 5_000)
            .await
            .unwrap();
        assert!(end.ended);
        assert_eq!(end.winners[0].username, "ada");
        assert_eq!(end.winners[0].rank, 1);
        assert!(sessions.read().await.is_empty());
    }

    /// Tests an invite lobby filling into a started session
    #[tokio::test]
    async fn invite_lobby_starts_session() {
        let (matchmaker, turns, _sessions) = services();
        let ada = UserRef::new("ada", 1);
        let lin = UserRef::new("lin", 2);

        let (code, members, _) = matchmaker
            .create_invite(&ada, GameKind::TicTacToe, 2)
            .await
            .unwrap();
        assert_eq!(members.len(), 1);

        let joined = matchmaker
            .join_invite(&lin, GameKind::TicTacToe, code, 1_000)
            .await
            .unwrap();
        let snapshot = match joined {
            InviteJoin::Started { snapshot, .. } => snapshot,
            InviteJoin::Waiting { .. } => panic!("two joiners must start a 2-seat lobby"),
        };
        assert!(snapshot.started);
        assert_eq!(snapshot.active_seat, 1);

        // The converted session is live: the first member holds the turn.
        let result = turns
            .submit_move(
                "ada",
                GameKind::TicTacToe,
                &Move::Place { from: 0, to: 5 },
                2_000,
            )
            .await
            .unwrap();
        assert_eq!(result.active_seat, 2);
    }

    /// Tests that a stale working copy loses the commit race
    #[tokio::test]
    async fn concurrent_commit_conflicts() {
        let (matchmaker, _turns, sessions) = services();
        let ada = UserRef::new("ada", 1);

        matchmaker
            .create_or_join(&ada, GameKind::Ludo, 2, 1_000)
            .await
            .unwrap();

        let mut store = sessions.write().await;
        let stale = store.find_by_user(GameKind::Ludo, "ada").unwrap();
        let mut fresh = stale.clone();
        fresh.round = 2;
        store.commit(fresh).unwrap();

        assert!(store.commit(stale).is_err());
    }

    /// Tests that the wire snapshot matches the stored session
    #[tokio::test]
    async fn snapshot_reflects_store() {
        let (matchmaker, _turns, sessions) = services();
        let ada = UserRef::new("ada", 7);

        let outcome = matchmaker
            .create_or_join(&ada, GameKind::Ludo, 4, 1_000)
            .await
            .unwrap();

        let stored = sessions
            .read()
            .await
            .find_by_user(GameKind::Ludo, "ada")
            .unwrap();
        assert_eq!(outcome.snapshot.id, stored.id);
        assert_eq!(outcome.snapshot.capacity, 4);
        assert_eq!(outcome.snapshot.participants[0].username, "ada");
        assert_eq!(outcome.snapshot.participants[0].profile, 7);
        assert_eq!(outcome.snapshot.participants[0].seat, 1);
        assert_eq!(outcome.snapshot.board, Board::Track(vec![0; 60]));
    }
}
