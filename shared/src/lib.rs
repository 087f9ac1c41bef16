//! Shared data model, board engine and wire protocol for the treasure-hunt
//! peers. Everything in this crate is pure: no I/O, no networking, no timers.

pub mod board;
pub mod protocol;
pub mod state;

use std::time::Duration;

/// How long a bootstrapping primary keeps accepting joins before the board
/// is randomized and the game starts.
pub const ENROLLMENT_WINDOW: Duration = Duration::from_secs(20);

/// Interval between client heartbeat pings to the primary.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Interval of the primary's liveness sweep, 1.5x the heartbeat interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// A player whose last heartbeat is older than this (2x the heartbeat
/// interval) is considered dormant by the sweep.
pub const DORMANT_AFTER: Duration = Duration::from_secs(4);

/// Upper bound on a single remote invocation, connect included.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(1);

pub use protocol::{JoinReply, MoveReply, PingReply, Promotion, Request, Response};
pub use state::{
    AuthCode, Direction, GameState, Move, PeerHandle, PeerRole, PlayerId, PlayerRecord,
    RunningState, ServerConfig, ServerSecrets, Treasure,
};
