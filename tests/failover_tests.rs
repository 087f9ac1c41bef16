//! Failover tests
//!
//! These tests kill live peers mid-game and assert that the heartbeat,
//! death-report, and promotion machinery converges on a working regime.

use peer::client::LogView;
use peer::node::{NodeConfig, PeerNode};
use shared::{Direction, RunningState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

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

/// Stands up a three-peer game and waits for it to go live.
async fn three_peer_game() -> (Arc<PeerNode>, Arc<PeerNode>, Arc<PeerNode>) {
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
    (host, backup, third)
}

/// Killing the primary promotes exactly one survivor, the game state carries
/// over, and the survivors agree on the new regime.
#[tokio::test]
async fn primary_death_elects_a_new_primary() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (host, backup, third) = three_peer_game().await;

    host.shutdown().await;

    assert!(
        eventually(|| async {
            backup.is_primary().await || third.is_primary().await
        })
        .await
    );
    // Never both.
    assert!(!(backup.is_primary().await && third.is_primary().await));

    let survivor = if backup.is_primary().await {
        &backup
    } else {
        &third
    };
    let new_primary = survivor.handle();

    // Both survivors converge on the new primary.
    assert!(
        eventually(|| async {
            let a = backup.snapshot().await.map(|s| s.config.primary);
            let b = third.snapshot().await.map(|s| s.config.primary);
            a == Some(new_primary) && b == Some(new_primary)
        })
        .await
    );

    // The old primary stays on the roster, dead, and its cell still blocks.
    let snapshot = survivor.snapshot().await.unwrap();
    let old = snapshot.player("player-0").unwrap();
    assert!(!old.alive);
    assert_eq!(snapshot.players.len(), 3);

    third.shutdown().await;
    backup.shutdown().await;
}

/// The game keeps accepting moves after a failover.
#[tokio::test]
async fn moves_keep_working_after_failover() {
    let (host, backup, third) = three_peer_game().await;

    host.shutdown().await;
    assert!(
        eventually(|| async {
            backup.is_primary().await || third.is_primary().await
        })
        .await
    );

    // The first attempt may still target the dead primary; converge on an
    // accepted move rather than asserting the first one lands.
    assert!(
        eventually(|| async {
            matches!(third.submit_move(Direction::Hold).await, Ok(r) if !r.illegal)
        })
        .await
    );

    third.shutdown().await;
    backup.shutdown().await;
}

/// Killing the backup makes the primary demote it and recruit a replacement
/// from its heartbeating players.
#[tokio::test]
async fn backup_death_recruits_a_replacement() {
    let (host, backup, third) = three_peer_game().await;

    backup.shutdown().await;

    assert!(eventually(|| third.is_backup()).await);

    // The host's own picture refreshes on its next heartbeat.
    assert!(
        eventually(|| async {
            match host.snapshot().await {
                Some(s) => {
                    !s.player("player-1").unwrap().alive
                        && s.config.backup_id.as_deref() == Some("player-2")
                }
                None => false,
            }
        })
        .await
    );

    third.shutdown().await;
    host.shutdown().await;
}

/// A false death report does not dethrone a healthy primary.
#[tokio::test]
async fn false_report_leaves_live_primary_in_place() {
    let (host, backup, third) = three_peer_game().await;

    // The reporter believes the primary is dead; the backup's own probe says
    // otherwise and nothing changes.
    let creds = third.credentials().await.unwrap();
    peer::client::report_primary_death(
        &third,
        &creds,
        host.handle(),
        Some(backup.handle()),
    )
    .await;

    assert!(host.is_primary().await);
    assert!(!third.is_primary().await);
    let snapshot = host.snapshot().await.unwrap();
    assert!(snapshot.player("player-0").unwrap().alive);

    third.shutdown().await;
    backup.shutdown().await;
    host.shutdown().await;
}
