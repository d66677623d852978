use crate::atomic::AtomicCounter;

/// Counters shared by every user of one test run.
///
/// Created by the caller and handed to the scheduler, each field is updated
/// independently. Reading two fields gives no consistent snapshot, `errors`
/// and `warnings` may be observed at slightly different logical times.
#[derive(Debug, Default)]
pub struct ExecutionCounters {
    /// User threads started by the ramp-up
    pub threads: AtomicCounter,
    /// Sessions opened, also the source of per-session seeds
    pub sessions: AtomicCounter,
    /// Identities handed out by user sources
    pub users: AtomicCounter,
    pub errors: AtomicCounter,
    pub warnings: AtomicCounter,
    /// Users currently inside an iteration
    pub active_users: AtomicCounter,
    pub requests: AtomicCounter,
}

impl ExecutionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.threads.reset();
        self.sessions.reset();
        self.users.reset();
        self.errors.reset();
        self.warnings.reset();
        self.active_users.reset();
        self.requests.reset();
    }
}
