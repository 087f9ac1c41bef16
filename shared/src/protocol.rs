//! Wire protocol between peers. Every payload is copied, never shared: a
//! snapshot on the wire is a full `GameState`, and the secrets table rides
//! along only when the reply carries a promotion.

use crate::state::{AuthCode, Direction, GameState, PeerHandle, PlayerId, ServerSecrets};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Client -> Primary: register as a player during enrollment.
    Join {
        caller: PeerHandle,
    },
    /// Client -> Primary: make a game move.
    Move {
        caller: PeerHandle,
        direction: Direction,
        player_id: PlayerId,
        auth_code: AuthCode,
    },
    /// Client -> Primary: heartbeat; also the carrier for promotions.
    Ping {
        caller: PeerHandle,
        player_id: PlayerId,
        auth_code: AuthCode,
    },
    /// Primary -> Backup: replace the replica wholesale.
    BackupUpdate {
        snapshot: GameState,
        secrets: ServerSecrets,
    },
    /// Client -> Backup: report that the primary looks dead.
    PrimaryDied {
        caller: PeerHandle,
        player_id: PlayerId,
        auth_code: AuthCode,
        dead_primary: PeerHandle,
    },
    /// Primary -> Client: one-shot push when the board goes live.
    GameStarted {
        snapshot: GameState,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Join(JoinReply),
    Move(MoveReply),
    Ping(PingReply),
    /// Positive, payload-free acknowledgement (BackupUpdate, GameStarted).
    Ack,
    /// Typed negative reply: failed authentication on a state-carrying call,
    /// or a role method routed to a peer not holding that role. Carries
    /// nothing so a rejected caller learns nothing.
    Denied,
}

/// Directive telling the caller which role it now holds, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Promotion {
    None,
    ToPrimary,
    ToBackup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReply {
    pub accepted: bool,
    pub player_id: Option<PlayerId>,
    pub auth_code: Option<AuthCode>,
    pub become_backup: bool,
}

impl JoinReply {
    pub fn declined() -> Self {
        Self {
            accepted: false,
            player_id: None,
            auth_code: None,
            become_backup: false,
        }
    }

    pub fn approved(player_id: PlayerId, auth_code: AuthCode, become_backup: bool) -> Self {
        Self {
            accepted: true,
            player_id: Some(player_id),
            auth_code: Some(auth_code),
            become_backup,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub promotion: Promotion,
    pub snapshot: GameState,
    /// Present iff `promotion` is not `None`.
    pub secrets: Option<ServerSecrets>,
}

impl PingReply {
    pub fn update(snapshot: GameState) -> Self {
        Self {
            promotion: Promotion::None,
            snapshot,
            secrets: None,
        }
    }

    pub fn promote_to_backup(snapshot: GameState, secrets: ServerSecrets) -> Self {
        Self {
            promotion: Promotion::ToBackup,
            snapshot,
            secrets: Some(secrets),
        }
    }

    pub fn promote_to_primary(snapshot: GameState, secrets: ServerSecrets) -> Self {
        Self {
            promotion: Promotion::ToPrimary,
            snapshot,
            secrets: Some(secrets),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveReply {
    pub illegal: bool,
    pub promotion: Promotion,
    pub snapshot: GameState,
    /// Present iff `promotion` is not `None`.
    pub secrets: Option<ServerSecrets>,
}

impl MoveReply {
    pub fn reply(snapshot: GameState, illegal: bool) -> Self {
        Self {
            illegal,
            promotion: Promotion::None,
            snapshot,
            secrets: None,
        }
    }

    pub fn illegal(snapshot: GameState) -> Self {
        Self::reply(snapshot, true)
    }

    pub fn promote_to_backup(snapshot: GameState, secrets: ServerSecrets, illegal: bool) -> Self {
        Self {
            illegal,
            promotion: Promotion::ToBackup,
            snapshot,
            secrets: Some(secrets),
        }
    }
}
