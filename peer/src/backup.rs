//! The hot-standby role. Passive except for one duty: verifying a reported
//! primary death with its own probe before promoting anyone.

use crate::auth;
use crate::network;
use crate::node::NodeConfig;
use log::{debug, info, warn};
use shared::{
    AuthCode, GameState, PeerHandle, PeerRole, PingReply, PlayerId, Request, ServerSecrets,
};
use tokio::sync::Mutex;

pub struct BackupServer {
    owner: PeerHandle,
    owner_id: PlayerId,
    auth_code: AuthCode,
    config: NodeConfig,
    inner: Mutex<Replica>,
}

struct Replica {
    game: GameState,
    secrets: ServerSecrets,
}

impl BackupServer {
    pub fn new(
        owner: PeerHandle,
        owner_id: PlayerId,
        auth_code: AuthCode,
        game: GameState,
        secrets: ServerSecrets,
        config: NodeConfig,
    ) -> Self {
        Self {
            owner,
            owner_id,
            auth_code,
            config,
            inner: Mutex::new(Replica { game, secrets }),
        }
    }

    /// The only mutation path for a backup: the replica is replaced
    /// wholesale, no independent game logic runs here.
    pub async fn update(&self, snapshot: GameState, secrets: ServerSecrets) {
        let mut replica = self.inner.lock().await;
        replica.game = snapshot;
        replica.secrets = secrets;
        debug!("replica updated");
    }

    /// Handles a death report. The backup never trusts the report alone: it
    /// probes the primary directly, and a stale report (wrong handle, or the
    /// primary answers) gets the unmodified snapshot back.
    pub async fn primary_died(
        &self,
        caller: PeerHandle,
        player_id: &str,
        auth_code: &str,
        dead_primary: PeerHandle,
    ) -> Option<PingReply> {
        let mut replica = self.inner.lock().await;

        if !auth::authenticate(&replica.game, &replica.secrets, caller, player_id, auth_code) {
            warn!("rejecting unauthenticated death report from {caller}");
            return None;
        }

        let current_primary = replica.game.config.primary;
        if dead_primary != current_primary {
            debug!("stale death report from {player_id}: primary already moved");
            return Some(PingReply::update(replica.game.clone()));
        }

        let probe = Request::Ping {
            caller: self.owner,
            player_id: self.owner_id.clone(),
            auth_code: self.auth_code.clone(),
        };
        match network::call(current_primary.0, &probe, self.config.rpc_timeout).await {
            Ok(_) => {
                info!("primary {current_primary} still answers; ignoring report from {player_id}");
                Some(PingReply::update(replica.game.clone()))
            }
            Err(e) => {
                warn!("primary {current_primary} confirmed dead: {e}");
                let old_primary_id = replica.game.config.primary_id.clone();
                replica.game.mark_dead(&old_primary_id);

                if caller == self.owner {
                    // Our own heartbeat noticed first: take the primary role,
                    // leaving the backup slot open for the next caller.
                    replica
                        .game
                        .config
                        .set_primary(self.owner_id.clone(), self.owner);
                    replica.game.config.clear_backup();
                    if let Some(player) = replica.game.player_mut(&self.owner_id) {
                        player.role = PeerRole::Primary;
                    }
                    info!("self-promoting to primary as {}", self.owner_id);
                } else {
                    replica
                        .game
                        .config
                        .set_primary(player_id.to_string(), caller);
                    if let Some(player) = replica.game.player_mut(player_id) {
                        player.role = PeerRole::Primary;
                    }
                    info!("promoting reporter {player_id} at {caller} to primary");
                }

                Some(PingReply::promote_to_primary(
                    replica.game.clone(),
                    replica.secrets.clone(),
                ))
            }
        }
    }

    pub async fn snapshot(&self) -> GameState {
        self.inner.lock().await.game.clone()
    }
}
