//! # Treasure-Hunt Peer
//!
//! One symmetric peer process of the multiplayer grid game. Every peer runs
//! the same binary and always carries a client role; on top of that it may
//! hold the primary role (authoritative for joins and moves) or the backup
//! role (hot-standby replica), and both server roles migrate between peers
//! as failures are detected.
//!
//! ## Module organization
//!
//! - [`network`]: length-prefixed bincode RPC over TCP, plus the listener
//!   that makes each peer an RPC server.
//! - [`auth`]: validates `(player id, auth code, caller handle)` triples
//!   against the replicated secrets table.
//! - [`primary`]: the authoritative role. Serializes all mutations under one
//!   lock, replicates to the backup inside the critical section, runs the
//!   enrollment timer and the liveness sweep.
//! - [`backup`]: the passive replica. Verifies death reports with a direct
//!   probe before promoting anyone.
//! - [`client`]: credentials, the last observed snapshot, the heartbeat
//!   loop, and the rendering collaborator interface.
//! - [`node`]: composes the roles behind one RPC endpoint and routes
//!   requests to whichever role currently handles them.
//! - [`tasks`]: cancellable handles for role-scoped background timers.
//!
//! ## Failover in one paragraph
//!
//! Clients heartbeat the peer they believe is primary. When that ping fails
//! they report the death to the believed backup, which probes the primary
//! itself before acting; a confirmed death promotes the reporting peer to
//! primary with the backup's last replicated snapshot and secrets. When the
//! primary loses its backup it grants the backup role to the next
//! authenticated caller. The protocol is best-effort: a stale role claim is
//! self-corrected by the next heartbeat rather than prevented by consensus.

pub mod auth;
pub mod backup;
pub mod client;
pub mod network;
pub mod node;
pub mod primary;
pub mod tasks;
