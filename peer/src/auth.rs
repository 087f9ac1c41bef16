//! Request authentication against the replicated secrets table.

use rand::Rng;
use shared::{AuthCode, GameState, PeerHandle, ServerSecrets};

pub const AUTH_CODE_LEN: usize = 16;

/// Validates a caller's credentials. The player must exist in the roster,
/// the auth code must match, and the caller handle must be identity-equal to
/// the handle recorded at join time. Every failure mode is reported
/// identically so a rejected caller cannot probe which check tripped.
pub fn authenticate(
    game: &GameState,
    secrets: &ServerSecrets,
    caller: PeerHandle,
    player_id: &str,
    auth_code: &str,
) -> bool {
    if game.player(player_id).is_none() {
        return false;
    }

    match secrets.auth_codes.get(player_id) {
        Some(code) if code == auth_code => {}
        _ => return false,
    }

    matches!(secrets.handles.get(player_id), Some(h) if *h == caller)
}

pub fn generate_auth_code<R: Rng>(rng: &mut R) -> AuthCode {
    std::iter::repeat_with(|| rng.sample(rand::distributions::Alphanumeric))
        .take(AUTH_CODE_LEN)
        .map(char::from)
        .collect()
}
