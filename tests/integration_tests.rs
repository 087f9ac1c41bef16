//! Integration tests for the peer-to-peer game
//!
//! These tests stand up real peers on ephemeral ports and validate the wire
//! protocol, enrollment, and the move path end to end.

use peer::client::LogView;
use peer::network;
use peer::node::{NodeConfig, PeerNode};
use shared::{Direction, PeerHandle, Request, Response, RunningState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Polls `check` for a few seconds before giving up.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn started(node: &Arc<PeerNode>) -> bool {
    match node.snapshot().await {
        Some(s) => s.running_state == RunningState::GameStarted,
        None => false,
    }
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// A raw framed request against a live peer gets a typed reply back.
    #[tokio::test]
    async fn join_rpc_roundtrip() {
        let host = PeerNode::host(NodeConfig::for_tests(), Box::new(LogView))
            .await
            .unwrap();

        let caller = PeerHandle("127.0.0.1:9999".parse().unwrap());
        let response = network::call(
            host.handle().0,
            &Request::Join { caller },
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        match response {
            Response::Join(reply) => {
                assert!(reply.accepted);
                assert_eq!(reply.player_id.as_deref(), Some("player-1"));
                assert!(reply.become_backup);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        host.shutdown().await;
    }

    /// Credentials are checked on every state-carrying call.
    #[tokio::test]
    async fn forged_ping_is_denied() {
        let host = PeerNode::host(NodeConfig::for_tests(), Box::new(LogView))
            .await
            .unwrap();

        let response = network::call(
            host.handle().0,
            &Request::Ping {
                caller: PeerHandle("127.0.0.1:9999".parse().unwrap()),
                player_id: "player-0".to_string(),
                auth_code: "forged".to_string(),
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(matches!(response, Response::Denied));
        host.shutdown().await;
    }
}

/// ENROLLMENT AND GAME START TESTS
mod enrollment_tests {
    use super::*;

    /// Three peers enroll; when the window closes every one of them observes
    /// the started game, and the board is populated without overlaps.
    #[tokio::test]
    async fn enrollment_window_starts_the_game_for_everyone() {
        let _ = env_logger::builder().is_test(true).try_init();

        let host = PeerNode::host(NodeConfig::for_tests(), Box::new(LogView))
            .await
            .unwrap();
        let backup = PeerNode::join(NodeConfig::for_tests(), host.handle().0, Box::new(LogView))
            .await
            .unwrap();
        let third = PeerNode::join(NodeConfig::for_tests(), host.handle().0, Box::new(LogView))
            .await
            .unwrap();

        assert!(eventually(|| started(&host)).await);
        assert!(eventually(|| started(&backup)).await);
        assert!(eventually(|| started(&third)).await);

        let snapshot = host.snapshot().await.unwrap();
        assert_eq!(snapshot.players.len(), 3);
        assert_eq!(snapshot.treasures.len(), 3);

        let mut cells = std::collections::HashSet::new();
        for p in &snapshot.players {
            assert!(cells.insert((p.x, p.y)), "players share a cell");
        }
        for t in &snapshot.treasures {
            assert!(cells.insert((t.x, t.y)), "treasure spawned under a piece");
        }

        third.shutdown().await;
        backup.shutdown().await;
        host.shutdown().await;
    }

    /// A late joiner is turned away once the game is live.
    #[tokio::test]
    async fn late_join_is_declined() {
        let host = PeerNode::host(NodeConfig::for_tests(), Box::new(LogView))
            .await
            .unwrap();
        let backup = PeerNode::join(NodeConfig::for_tests(), host.handle().0, Box::new(LogView))
            .await
            .unwrap();

        assert!(eventually(|| started(&host)).await);

        let result = PeerNode::join(NodeConfig::for_tests(), host.handle().0, Box::new(LogView)).await;
        assert!(result.is_err());

        backup.shutdown().await;
        host.shutdown().await;
    }

    /// With nobody else enrolled the start is aborted, not forced.
    #[tokio::test]
    async fn lone_host_never_starts() {
        let host = PeerNode::host(NodeConfig::for_tests(), Box::new(LogView))
            .await
            .unwrap();

        sleep(Duration::from_millis(800)).await;
        assert!(!started(&host).await);

        host.shutdown().await;
    }
}

/// MOVE PATH TESTS
mod move_tests {
    use super::*;

    /// A full move round trip through the primary, including the replication
    /// push to the backup.
    #[tokio::test]
    async fn move_round_trip_updates_every_observer() {
        let host = PeerNode::host(NodeConfig::for_tests(), Box::new(LogView))
            .await
            .unwrap();
        let backup = PeerNode::join(NodeConfig::for_tests(), host.handle().0, Box::new(LogView))
            .await
            .unwrap();

        assert!(eventually(|| started(&backup)).await);

        // Hold is always legal and exercises the same path as a real step.
        let reply = backup.submit_move(Direction::Hold).await.unwrap();
        assert!(!reply.illegal);
        assert_eq!(reply.snapshot.running_state, RunningState::GameStarted);

        // The caller's own picture was refreshed from the reply.
        let seen = backup.snapshot().await.unwrap();
        assert_eq!(seen.running_state, RunningState::GameStarted);

        backup.shutdown().await;
        host.shutdown().await;
    }

    /// Moves sent before enrollment closes are rejected as illegal.
    #[tokio::test]
    async fn move_before_start_is_illegal() {
        let host = PeerNode::host(NodeConfig::for_tests(), Box::new(LogView))
            .await
            .unwrap();
        let backup = PeerNode::join(NodeConfig::for_tests(), host.handle().0, Box::new(LogView))
            .await
            .unwrap();

        // No snapshot yet, so the node has no believed primary to call.
        assert!(backup.submit_move(Direction::North).await.is_err());

        backup.shutdown().await;
        host.shutdown().await;
    }
}
