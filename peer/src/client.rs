//! The client role every peer carries: credentials, the last observed
//! snapshot, the heartbeat loop, and the rendering collaborator seam.

use crate::network;
use crate::node::PeerNode;
use crate::tasks::TaskGuard;
use log::{debug, info, warn};
use shared::{AuthCode, GameState, PeerHandle, PlayerId, Request, Response, RunningState};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub player_id: PlayerId,
    pub auth_code: AuthCode,
}

/// Rendering collaborator. The core only pushes snapshots at it and asks
/// nothing back; movement intents arrive separately through the node.
pub trait GameView: Send {
    fn on_game_started(&mut self, snapshot: &GameState);
    fn on_state_updated(&mut self, snapshot: &GameState);
}

/// Text view that draws the grid into the log. Players show as the last
/// character of their id, unclaimed treasures as `*`.
pub struct LogView;

impl GameView for LogView {
    fn on_game_started(&mut self, snapshot: &GameState) {
        info!(
            "game started: {0}x{0} board, {1} treasures, {2} players",
            snapshot.board_size,
            snapshot.treasures.len(),
            snapshot.players.len()
        );
        for row in render_rows(snapshot) {
            info!("{row}");
        }
    }

    fn on_state_updated(&mut self, snapshot: &GameState) {
        if snapshot.running_state == RunningState::GameEnded {
            info!("game over");
            for player in &snapshot.players {
                info!("  {}: {} treasures", player.id, player.treasure_count);
            }
            return;
        }
        for row in render_rows(snapshot) {
            debug!("{row}");
        }
    }
}

fn render_rows(snapshot: &GameState) -> Vec<String> {
    let n = snapshot.board_size as usize;
    let mut grid = vec![vec!['.'; n]; n];
    for treasure in &snapshot.treasures {
        if treasure.assigned_player_id.is_none() {
            grid[treasure.y as usize][treasure.x as usize] = '*';
        }
    }
    for player in &snapshot.players {
        let marker = player.id.chars().last().unwrap_or('?');
        grid[player.y as usize][player.x as usize] = marker;
    }
    grid.into_iter().map(|row| row.into_iter().collect()).collect()
}

pub struct ClientRole {
    creds: Option<Credentials>,
    snapshot: Option<GameState>,
    view: Box<dyn GameView>,
}

impl ClientRole {
    pub fn new(view: Box<dyn GameView>) -> Self {
        Self {
            creds: None,
            snapshot: None,
            view,
        }
    }

    pub fn set_credentials(&mut self, creds: Credentials) {
        self.creds = Some(creds);
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.creds.clone()
    }

    pub fn snapshot(&self) -> Option<GameState> {
        self.snapshot.clone()
    }

    pub fn believed_primary(&self) -> Option<PeerHandle> {
        self.snapshot.as_ref().map(|s| s.config.primary)
    }

    pub fn believed_backup(&self) -> Option<PeerHandle> {
        self.snapshot.as_ref().and_then(|s| s.config.backup)
    }

    pub fn game_running(&self) -> bool {
        matches!(
            self.snapshot.as_ref().map(|s| s.running_state),
            Some(RunningState::GameStarted)
        )
    }

    /// Handles the primary's one-shot "game started" push.
    pub fn game_started(&mut self, snapshot: GameState) {
        self.view.on_game_started(&snapshot);
        self.snapshot = Some(snapshot);
    }

    /// Replaces the cached snapshot with a fresher one from any reply.
    pub fn observe(&mut self, snapshot: GameState) {
        self.view.on_state_updated(&snapshot);
        self.snapshot = Some(snapshot);
    }
}

/// Heartbeat loop. Idle until the game has started, then pings the believed
/// primary every interval, falling back to the believed backup on failure.
pub fn start_heartbeat(node: &Arc<PeerNode>) -> TaskGuard {
    let node = Arc::clone(node);
    TaskGuard::new(tokio::spawn(async move {
        let mut ticker = interval(node.config().heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            heartbeat_once(&node).await;
        }
    }))
}

pub async fn heartbeat_once(node: &PeerNode) {
    let (creds, primary, backup, running) = {
        let client = node.client().lock().await;
        (
            client.credentials(),
            client.believed_primary(),
            client.believed_backup(),
            client.game_running(),
        )
    };

    let Some(creds) = creds else { return };
    if !running {
        return;
    }
    let Some(primary) = primary else { return };

    let request = Request::Ping {
        caller: node.handle(),
        player_id: creds.player_id.clone(),
        auth_code: creds.auth_code.clone(),
    };
    match network::call(primary.0, &request, node.config().rpc_timeout).await {
        Ok(Response::Ping(reply)) => {
            node.process_reply(reply.promotion, reply.snapshot, reply.secrets)
                .await;
        }
        Ok(Response::Denied) => warn!("heartbeat denied by {primary}"),
        Ok(other) => warn!("unexpected heartbeat response: {other:?}"),
        Err(e) => {
            warn!("primary {primary} unreachable: {e}");
            report_primary_death(node, &creds, primary, backup).await;
        }
    }
}

/// The failover edge: tell the believed backup that the primary looks dead.
/// When this peer is the backup itself, the report is verified locally
/// through the same dispatch path a remote reporter would take.
pub async fn report_primary_death(
    node: &PeerNode,
    creds: &Credentials,
    dead_primary: PeerHandle,
    backup: Option<PeerHandle>,
) {
    let Some(backup) = backup else {
        warn!("no backup known; cannot fail over");
        return;
    };

    let request = Request::PrimaryDied {
        caller: node.handle(),
        player_id: creds.player_id.clone(),
        auth_code: creds.auth_code.clone(),
        dead_primary,
    };

    let response = if backup == node.handle() {
        node.dispatch(request).await
    } else {
        // The backup verifies the report with its own probe, so this call
        // spans a nested RPC.
        match network::call(backup.0, &request, node.config().rpc_timeout * 2).await {
            Ok(response) => response,
            Err(e) => {
                warn!("backup {backup} also unreachable: {e}");
                return;
            }
        }
    };

    match response {
        Response::Ping(reply) => {
            node.process_reply(reply.promotion, reply.snapshot, reply.secrets)
                .await;
        }
        Response::Denied => warn!("death report denied by {backup}"),
        other => warn!("unexpected death-report response: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{PeerRole, PlayerRecord, Treasure};

    fn handle(port: u16) -> PeerHandle {
        PeerHandle(format!("127.0.0.1:{port}").parse().unwrap())
    }

    fn snapshot() -> GameState {
        let mut state = GameState::new(3, handle(9000));
        state.running_state = RunningState::GameStarted;
        let mut player = PlayerRecord::new("player-0".into(), PeerRole::Primary);
        player.x = 1;
        player.y = 2;
        state.players.push(player);
        state.treasures.push(Treasure {
            id: "treasure-0".into(),
            x: 0,
            y: 0,
            assigned_player_id: None,
        });
        state.config.set_primary("player-0".into(), handle(9000));
        state.config.set_backup("player-1".into(), handle(9001));
        state
    }

    #[test]
    fn test_render_rows_places_markers() {
        let rows = render_rows(&snapshot());
        assert_eq!(rows, vec!["*..", "...", ".0."]);
    }

    #[test]
    fn test_claimed_treasures_are_not_drawn() {
        let mut state = snapshot();
        state.treasures[0].assigned_player_id = Some("player-0".into());
        let rows = render_rows(&state);
        assert_eq!(rows[0], "...");
    }

    #[test]
    fn test_client_role_tracks_servers_from_snapshot() {
        let mut client = ClientRole::new(Box::new(LogView));
        assert!(client.believed_primary().is_none());
        assert!(!client.game_running());

        client.game_started(snapshot());
        assert_eq!(client.believed_primary(), Some(handle(9000)));
        assert_eq!(client.believed_backup(), Some(handle(9001)));
        assert!(client.game_running());
    }

    #[test]
    fn test_observe_replaces_snapshot_wholesale() {
        let mut client = ClientRole::new(Box::new(LogView));
        client.game_started(snapshot());

        let mut newer = snapshot();
        newer.config.set_primary("player-1".into(), handle(9001));
        client.observe(newer);

        assert_eq!(client.believed_primary(), Some(handle(9001)));
    }
}
