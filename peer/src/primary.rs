//! The authoritative role. All game-state mutations are serialized by one
//! lock, and the replication push to the backup happens inside the critical
//! section so a promotion decision cannot race a state change.

use crate::auth;
use crate::network::{self, RpcError};
use crate::node::NodeConfig;
use crate::tasks::TaskGuard;
use log::{error, info, warn};
use shared::board;
use shared::{
    GameState, JoinReply, Move, MoveReply, PeerHandle, PeerRole, PingReply, PlayerId, PlayerRecord,
    Request, RunningState, ServerSecrets,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};

pub struct PrimaryServer {
    owner: PeerHandle,
    config: NodeConfig,
    inner: Mutex<PrimaryState>,
}

struct PrimaryState {
    game: GameState,
    secrets: ServerSecrets,
    /// Last heartbeat or authenticated request per player, feeding the sweep.
    last_seen: HashMap<PlayerId, Instant>,
    /// Raised when a push to the backup fails; the next eligible caller is
    /// granted the backup role and the flag is cleared, all under the lock,
    /// so one failure episode yields exactly one promotion.
    need_new_backup: bool,
    next_player_id: u32,
}

impl PrimaryServer {
    /// Fresh game: the well-known peer that bound the listen address. The
    /// caller is expected to self-join so the bootstrapper becomes player 0.
    pub fn bootstrap(owner: PeerHandle, config: NodeConfig) -> Self {
        let game = GameState::new(config.board_size, owner);
        Self {
            owner,
            config,
            inner: Mutex::new(PrimaryState {
                game,
                secrets: ServerSecrets::default(),
                last_seen: HashMap::new(),
                need_new_backup: false,
                next_player_id: 0,
            }),
        }
    }

    /// Promoted mid-game from the backup's last replicated snapshot.
    pub fn inherit(
        owner: PeerHandle,
        owner_id: PlayerId,
        mut snapshot: GameState,
        secrets: ServerSecrets,
        config: NodeConfig,
    ) -> Self {
        snapshot.config.set_primary(owner_id.clone(), owner);
        if let Some(player) = snapshot.player_mut(&owner_id) {
            player.role = PeerRole::Primary;
        }

        // A backup slot pointing back at this peer is stale (we were the
        // backup before promoting ourselves).
        let need_new_backup = match snapshot.config.backup {
            None => true,
            Some(handle) if handle == owner => {
                snapshot.config.clear_backup();
                true
            }
            Some(_) => false,
        };

        let now = Instant::now();
        let last_seen = snapshot
            .players
            .iter()
            .filter(|p| p.alive)
            .map(|p| (p.id.clone(), now))
            .collect();

        let next_player_id = snapshot.players.len() as u32;
        info!("inherited primary role as {owner_id}");

        Self {
            owner,
            config,
            inner: Mutex::new(PrimaryState {
                game: snapshot,
                secrets,
                last_seen,
                need_new_backup,
                next_player_id,
            }),
        }
    }

    /// Registers a new player while the enrollment window is open. The first
    /// joiner is the bootstrapper itself (role Primary); the second becomes
    /// the backup.
    pub async fn join(&self, caller: PeerHandle) -> JoinReply {
        let mut st = self.inner.lock().await;

        if st.game.running_state != RunningState::AcceptingPlayers {
            info!("declining join from {caller}: no longer accepting players");
            return JoinReply::declined();
        }

        let player_id = format!("player-{}", st.next_player_id);
        st.next_player_id += 1;
        let auth_code = auth::generate_auth_code(&mut rand::thread_rng());

        let role = match st.game.players.len() {
            0 => PeerRole::Primary,
            1 => PeerRole::Backup,
            _ => PeerRole::Normal,
        };
        st.game
            .players
            .push(PlayerRecord::new(player_id.clone(), role));
        st.secrets
            .insert(player_id.clone(), auth_code.clone(), caller);
        st.last_seen.insert(player_id.clone(), Instant::now());

        let become_backup = role == PeerRole::Backup;
        match role {
            PeerRole::Primary => st.game.config.set_primary(player_id.clone(), caller),
            PeerRole::Backup => st.game.config.set_backup(player_id.clone(), caller),
            _ => {}
        }

        info!("player {player_id} joined from {caller} (backup: {become_backup})");
        JoinReply::approved(player_id, auth_code, become_backup)
    }

    /// One-shot enrollment timer. Fires once and either starts the game or
    /// aborts the start when no backup was ever enrolled.
    pub fn start_enrollment_timer(self: &Arc<Self>) -> TaskGuard {
        let server = Arc::clone(self);
        let window = server.config.enrollment_window;
        TaskGuard::new(tokio::spawn(async move {
            sleep(window).await;
            server.start_game().await;
        }))
    }

    async fn start_game(&self) {
        let mut st = self.inner.lock().await;

        if st.game.running_state != RunningState::AcceptingPlayers {
            return;
        }
        if st.game.config.backup.is_none() {
            error!("enrollment window closed with no backup peer; aborting game start");
            return;
        }

        // Placement re-draws a taken cell, so the board must keep at least
        // one cell free or the draw never terminates.
        let cells = u64::from(st.game.board_size) * u64::from(st.game.board_size);
        let pieces = u64::from(self.config.treasure_count) + st.game.players.len() as u64;
        if pieces >= cells {
            error!("board of {cells} cells cannot hold {pieces} pieces; aborting game start");
            return;
        }

        let treasure_count = self.config.treasure_count;
        st.game
            .randomize_board(treasure_count, &mut rand::thread_rng());
        st.game.running_state = RunningState::GameStarted;

        let now = Instant::now();
        let player_ids: Vec<_> = st.game.players.iter().map(|p| p.id.clone()).collect();
        for id in player_ids {
            st.last_seen.insert(id, now);
        }

        info!(
            "game started: {0}x{0} board, {1} treasures, {2} players",
            st.game.board_size,
            st.game.treasures.len(),
            st.game.players.len()
        );

        if let Err(e) = self.push_to_backup(&mut st).await {
            warn!("backup unreachable at game start: {e}");
            st.need_new_backup = true;
        }

        // Best-effort fan-out; an unreachable player is marked dead, never
        // removed.
        let snapshot = st.game.clone();
        let targets: Vec<(PlayerId, PeerHandle)> = snapshot
            .players
            .iter()
            .filter_map(|p| st.secrets.handles.get(&p.id).map(|h| (p.id.clone(), *h)))
            .collect();
        for (player_id, handle) in targets {
            let request = Request::GameStarted {
                snapshot: snapshot.clone(),
            };
            if let Err(e) = network::call(handle.0, &request, self.config.rpc_timeout).await {
                warn!("player {player_id} unreachable at game start: {e}");
                st.game.mark_dead(&player_id);
            }
        }
    }

    /// Authenticates, applies the move, and replicates the result to the
    /// backup before replying. A failed push may grant the caller the backup
    /// role on the spot.
    pub async fn do_move(
        &self,
        caller: PeerHandle,
        mv: Move,
        auth_code: &str,
    ) -> MoveReply {
        let mut st = self.inner.lock().await;

        if !auth::authenticate(&st.game, &st.secrets, caller, &mv.player_id, auth_code) {
            warn!("rejecting unauthenticated move from {caller}");
            return MoveReply::illegal(st.game.clone());
        }
        st.last_seen.insert(mv.player_id.clone(), Instant::now());

        if st.game.running_state != RunningState::GameStarted {
            return MoveReply::illegal(st.game.clone());
        }

        let illegal = board::apply(&mut st.game, &mv);
        if st.game.running_state == RunningState::GameEnded {
            info!("all treasures claimed; game over");
        }

        match self.push_to_backup(&mut st).await {
            Ok(()) => MoveReply::reply(st.game.clone(), illegal),
            Err(e) => {
                warn!("backup unreachable during move: {e}");
                st.need_new_backup = true;
                if self.assign_backup_if_eligible(&mut st, caller, &mv.player_id) {
                    MoveReply::promote_to_backup(st.game.clone(), st.secrets.clone(), illegal)
                } else {
                    MoveReply::reply(st.game.clone(), illegal)
                }
            }
        }
    }

    /// Heartbeat handler. Records liveness and, when a new backup is needed
    /// and the caller is eligible, carries the promotion in the reply.
    /// Returns `None` when authentication fails.
    pub async fn ping(
        &self,
        caller: PeerHandle,
        player_id: &str,
        auth_code: &str,
    ) -> Option<PingReply> {
        let mut st = self.inner.lock().await;

        if !auth::authenticate(&st.game, &st.secrets, caller, player_id, auth_code) {
            warn!("rejecting unauthenticated ping from {caller}");
            return None;
        }
        st.last_seen.insert(player_id.to_string(), Instant::now());

        if st.game.config.primary_id == player_id {
            // The primary pinging itself can never be promoted.
            return Some(PingReply::update(st.game.clone()));
        }

        if self.assign_backup_if_eligible(&mut st, caller, player_id) {
            return Some(PingReply::promote_to_backup(
                st.game.clone(),
                st.secrets.clone(),
            ));
        }

        Some(PingReply::update(st.game.clone()))
    }

    /// Double-checked promotion under the state lock: the flag is tested and
    /// cleared atomically with the config update, so concurrent callers
    /// cannot both be promoted for the same failure episode.
    fn assign_backup_if_eligible(
        &self,
        st: &mut PrimaryState,
        caller: PeerHandle,
        player_id: &str,
    ) -> bool {
        if !st.need_new_backup {
            return false;
        }
        if st.game.config.is_primary(&caller) {
            return false;
        }

        st.need_new_backup = false;
        // The outgoing backup keeps its slot in the roster but not the role;
        // a record already marked dead stays dead.
        if let Some(old_id) = st.game.config.backup_id.clone() {
            if let Some(player) = st.game.player_mut(&old_id) {
                if player.role == PeerRole::Backup {
                    player.role = PeerRole::Normal;
                }
            }
        }
        st.game.config.set_backup(player_id.to_string(), caller);
        if let Some(player) = st.game.player_mut(player_id) {
            player.role = PeerRole::Backup;
        }
        info!("granted backup role to {player_id} at {caller}");
        true
    }

    async fn push_to_backup(&self, st: &mut PrimaryState) -> Result<(), RpcError> {
        let Some(backup) = st.game.config.backup else {
            return Err(RpcError::Unreachable("no backup assigned".to_string()));
        };

        let request = Request::BackupUpdate {
            snapshot: st.game.clone(),
            secrets: st.secrets.clone(),
        };
        network::call(backup.0, &request, self.config.rpc_timeout)
            .await
            .map(|_| ())
    }

    /// Periodic liveness sweep over all known players. Dormant players are
    /// marked dead; a dormant backup gets one retry push before demotion.
    pub fn start_sweep(self: &Arc<Self>) -> TaskGuard {
        let server = Arc::clone(self);
        let period = server.config.sweep_interval;
        TaskGuard::new(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                server.sweep().await;
            }
        }))
    }

    async fn sweep(&self) {
        let mut st = self.inner.lock().await;

        if st.game.running_state != RunningState::GameStarted {
            return;
        }

        let now = Instant::now();
        let dormant: Vec<PlayerId> = st
            .game
            .players
            .iter()
            .filter(|p| p.alive)
            .filter(|p| match st.last_seen.get(&p.id) {
                Some(seen) => now.duration_since(*seen) > self.config.dormant_after,
                None => true,
            })
            .map(|p| p.id.clone())
            .collect();

        for player_id in dormant {
            if st.game.config.primary_id == player_id {
                continue;
            }

            if st.game.config.backup_id.as_deref() == Some(player_id.as_str()) {
                // One retry before giving up on the backup.
                if self.push_to_backup(&mut st).await.is_ok() {
                    st.last_seen.insert(player_id, now);
                } else {
                    warn!("backup {player_id} dormant and unreachable; demoting");
                    st.game.mark_dead(&player_id);
                    st.game.config.clear_backup();
                    st.need_new_backup = true;
                }
            } else {
                warn!("player {player_id} dormant; marking dead");
                st.game.mark_dead(&player_id);
            }
        }
    }

    /// Read-only copy for the owning node.
    pub async fn snapshot(&self) -> GameState {
        self.inner.lock().await.game.clone()
    }

    pub fn owner(&self) -> PeerHandle {
        self.owner
    }
}
