//! Cancellable background tasks scoped to a role's lifetime.

use tokio::task::JoinHandle;

/// Owns a spawned task and aborts it on drop, so a superseded role's timers
/// are positively cancelled instead of lingering as accidental no-ops.
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
