//! Replicated game data: the board state that travels between primary and
//! backup, and the secrets table that travels only between server peers.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

pub type PlayerId = String;
pub type AuthCode = String;

/// Opaque, comparable identity of a peer: its public listen address. Any
/// peer that has received a handle can call back into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle(pub SocketAddr);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
    /// Stay in place. Always legal, never mutates the board.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    Primary,
    Backup,
    Normal,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunningState {
    AcceptingPlayers,
    GameStarted,
    GameEnded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub x: u32,
    pub y: u32,
    pub treasure_count: u32,
    pub alive: bool,
    pub role: PeerRole,
}

impl PlayerRecord {
    pub fn new(id: PlayerId, role: PeerRole) -> Self {
        Self {
            id,
            x: 0,
            y: 0,
            treasure_count: 0,
            alive: true,
            role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treasure {
    pub id: String,
    pub x: u32,
    pub y: u32,
    /// Write-once: never cleared or reassigned after a pickup.
    pub assigned_player_id: Option<PlayerId>,
}

/// Current primary and backup identities, replicated as part of the state so
/// every peer knows where to send requests and where to fail over to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub primary_id: PlayerId,
    pub primary: PeerHandle,
    pub backup_id: Option<PlayerId>,
    pub backup: Option<PeerHandle>,
}

impl ServerConfig {
    pub fn new(primary: PeerHandle) -> Self {
        Self {
            primary_id: PlayerId::new(),
            primary,
            backup_id: None,
            backup: None,
        }
    }

    pub fn set_primary(&mut self, id: PlayerId, handle: PeerHandle) {
        self.primary_id = id;
        self.primary = handle;
    }

    pub fn set_backup(&mut self, id: PlayerId, handle: PeerHandle) {
        self.backup_id = Some(id);
        self.backup = Some(handle);
    }

    pub fn clear_backup(&mut self) {
        self.backup_id = None;
        self.backup = None;
    }

    pub fn is_primary(&self, handle: &PeerHandle) -> bool {
        self.primary == *handle
    }

    pub fn is_backup(&self, handle: &PeerHandle) -> bool {
        self.backup.as_ref() == Some(handle)
    }
}

/// The unit of replication. Exactly one producer (the current primary)
/// mutates it; every other holder treats its copy as read-only until it is
/// replaced wholesale by the next pushed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub board_size: u32,
    pub running_state: RunningState,
    /// Ordered by join time. Players are never removed, only marked dead.
    pub players: Vec<PlayerRecord>,
    pub treasures: Vec<Treasure>,
    pub config: ServerConfig,
}

impl GameState {
    pub fn new(board_size: u32, primary: PeerHandle) -> Self {
        Self {
            board_size,
            running_state: RunningState::AcceptingPlayers,
            players: Vec::new(),
            treasures: Vec::new(),
            config: ServerConfig::new(primary),
        }
    }

    pub fn player(&self, id: &str) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut PlayerRecord> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Whether any roster player sits on the cell. The alive flag is
    /// deliberately ignored: a dead player's last known cell keeps blocking.
    pub fn occupied(&self, x: u32, y: u32) -> bool {
        self.players.iter().any(|p| p.x == x && p.y == y)
    }

    pub fn all_treasures_claimed(&self) -> bool {
        !self.treasures.is_empty()
            && self.treasures.iter().all(|t| t.assigned_player_id.is_some())
    }

    pub fn mark_dead(&mut self, id: &str) {
        if let Some(player) = self.player_mut(id) {
            player.alive = false;
            player.role = PeerRole::Dead;
        }
    }

    /// Creates the treasures and scatters treasures and players over the
    /// board, re-drawing any coordinate that is already taken so that no two
    /// pieces start on the same cell.
    pub fn randomize_board<R: Rng>(&mut self, treasure_count: u32, rng: &mut R) {
        let mut used: HashSet<(u32, u32)> = HashSet::new();

        self.treasures.clear();
        for i in 0..treasure_count {
            let (x, y) = draw_free_cell(self.board_size, &used, rng);
            used.insert((x, y));
            self.treasures.push(Treasure {
                id: format!("treasure-{i}"),
                x,
                y,
                assigned_player_id: None,
            });
        }

        for player in &mut self.players {
            let (x, y) = draw_free_cell(self.board_size, &used, rng);
            used.insert((x, y));
            player.x = x;
            player.y = y;
        }
    }
}

fn draw_free_cell<R: Rng>(board_size: u32, used: &HashSet<(u32, u32)>, rng: &mut R) -> (u32, u32) {
    loop {
        let cell = (rng.gen_range(0..board_size), rng.gen_range(0..board_size));
        if !used.contains(&cell) {
            return cell;
        }
    }
}

/// Authentication table. Held only by the primary and the backup, pushed to
/// a peer only alongside a promotion, never to plain clients. Entries are
/// never removed; a dead player's secret stays valid but unreachable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSecrets {
    pub auth_codes: HashMap<PlayerId, AuthCode>,
    pub handles: HashMap<PlayerId, PeerHandle>,
}

impl ServerSecrets {
    pub fn insert(&mut self, id: PlayerId, code: AuthCode, handle: PeerHandle) {
        self.auth_codes.insert(id.clone(), code);
        self.handles.insert(id, handle);
    }
}

/// A single movement intent. Transient, not part of the replicated state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Move {
    pub direction: Direction,
    pub player_id: PlayerId,
}
