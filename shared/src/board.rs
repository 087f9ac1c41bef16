//! Deterministic grid movement and treasure pickup. Pure board rules only:
//! authentication, replication and role handling live in the peer crate.

use crate::state::{Direction, GameState, Move, RunningState};

/// Applies one move to the board. Returns `true` if the move was illegal, in
/// which case the state is left untouched.
///
/// A destination cell is blocked by any roster player, dead or alive. A
/// legal move onto an unclaimed treasure assigns it to the mover, and the
/// game ends once every treasure is assigned.
pub fn apply(state: &mut GameState, mv: &Move) -> bool {
    if state.running_state != RunningState::GameStarted {
        return true;
    }

    let Some(mover) = state.players.iter().position(|p| p.id == mv.player_id) else {
        return true;
    };

    let (x, y) = (state.players[mover].x, state.players[mover].y);
    let (dest_x, dest_y) = match mv.direction {
        Direction::Hold => return false,
        Direction::North => {
            if y == 0 {
                return true;
            }
            (x, y - 1)
        }
        Direction::South => {
            if y + 1 >= state.board_size {
                return true;
            }
            (x, y + 1)
        }
        Direction::East => {
            if x + 1 >= state.board_size {
                return true;
            }
            (x + 1, y)
        }
        Direction::West => {
            if x == 0 {
                return true;
            }
            (x - 1, y)
        }
    };

    let blocked = state
        .players
        .iter()
        .enumerate()
        .any(|(i, p)| i != mover && p.x == dest_x && p.y == dest_y);
    if blocked {
        return true;
    }

    state.players[mover].x = dest_x;
    state.players[mover].y = dest_y;

    if let Some(treasure) = state
        .treasures
        .iter_mut()
        .find(|t| t.assigned_player_id.is_none() && t.x == dest_x && t.y == dest_y)
    {
        treasure.assigned_player_id = Some(mv.player_id.clone());
        state.players[mover].treasure_count += 1;
    }

    if state.all_treasures_claimed() {
        state.running_state = RunningState::GameEnded;
    }

    false
}
