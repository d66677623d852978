use std::{path::PathBuf, sync::Arc, time::SystemTime};

use crate::{
    counters::ExecutionCounters,
    error::Result,
    metrics::RequestMetrics,
    random::{Randomizer, predictable_seed},
    scenario::User,
    shutdown::CancelSignal,
};

/// State of one simulated user's session, handed to every action.
///
/// Owned by exactly one user thread and used strictly sequentially, the
/// [`Randomizer`] is never shared. When users are reused the same state
/// lives across iterations and is reseeded between them.
#[derive(Debug)]
pub struct SessionState {
    user: User,
    thread: u64,
    session: u64,
    iteration: u64,
    instance: i64,
    only_instance_seed: bool,
    randomizer: Randomizer,
    metrics: Arc<RequestMetrics>,
    counters: Arc<ExecutionCounters>,
    signal: CancelSignal,
    outputs_dir: PathBuf,
}

impl SessionState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user: User,
        thread: u64,
        session: u64,
        instance: i64,
        only_instance_seed: bool,
        counters: Arc<ExecutionCounters>,
        signal: CancelSignal,
        outputs_dir: PathBuf,
    ) -> Self {
        let mut state = Self {
            user,
            thread,
            session,
            iteration: 0,
            instance,
            only_instance_seed,
            randomizer: Randomizer::default(),
            metrics: Arc::new(RequestMetrics::new()),
            counters,
            signal,
            outputs_dir,
        };
        state.randomizer = Randomizer::with_seed(state.seed());
        state
    }

    fn seed(&self) -> i64 {
        let session = if self.only_instance_seed {
            0
        } else {
            self.session as i64
        };
        predictable_seed(self.instance, session)
    }

    /// Prepares a reused session for its next iteration: takes a new session
    /// number, reseeds the randomizer from it and clears request metrics.
    pub fn reinit(&mut self) {
        self.session = self.counters.sessions.inc();
        self.iteration += 1;
        let seed = self.seed();
        self.randomizer.reseed(seed);
        self.metrics.reset();
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn thread(&self) -> u64 {
        self.thread
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Iterations completed on this session before the current one
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn rand(&mut self) -> &mut Randomizer {
        &mut self.randomizer
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    pub fn counters(&self) -> &ExecutionCounters {
        &self.counters
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn outputs_dir(&self) -> &PathBuf {
        &self.outputs_dir
    }

    /// Reports a non fatal problem, logged and counted but not an error.
    pub fn warn(&self, msg: &str) {
        self.counters.warnings.inc();
        tracing::warn!(
            thread = self.thread,
            session = self.session,
            user = %self.user,
            "{msg}"
        );
    }

    /// Called by the connection layer when a request went out.
    pub fn request_sent(&self, ts: SystemTime, bytes: i64) -> Result<()> {
        self.counters.requests.inc();
        self.metrics.update_sent(ts, bytes)
    }

    /// Called by the connection layer when a response came back.
    pub fn request_received(&self, ts: SystemTime, bytes: i64) -> Result<()> {
        self.metrics.update_received(ts, bytes)
    }
}
