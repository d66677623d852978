//! The `SimpleScheduler`: linear ramp-up to a fixed number of concurrent
//! users, each of them running the scenario for a number of iterations.
//!
//! # High-level flow
//! 1. The configuration is validated, warnings are logged.
//! 2. A run-scoped cancellation is derived from the caller's signal and
//!    installed next to the scheduler's cancel function. When the execution time is
//!    bounded a timer task cancels the run once it elapses.
//! 3. The spawner starts one user immediately and one more on every ramp-up
//!    tick until the concurrency cap is reached or the run is cancelled.
//! 4. Every user thread loops over its iterations. Without user reuse each
//!    iteration gets a fresh user and session, with reuse the first session
//!    is reseeded before every later iteration.
//! 5. Inside an iteration the actions run in order. An [`ActionError::Abort`]
//!    ends the iteration quietly, a failure is counted, logged and collected.
//!    Between iterations the user paces itself with the [`TimeBuffer`].
//! 6. Once all users returned, their errors are joined into one result.
//!
//! # Error threshold
//! With `maxerrors > 0` the first error that pushes the shared error count
//! above the threshold cancels the whole run. Users stop at their next check.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::Instrument;
use typed_builder::TypedBuilder;

use super::{CancelSlot, Scheduler};
use crate::{
    atomic::AtomicCounter,
    counters::ExecutionCounters,
    error::{Error, Result, join_errors},
    scenario::{ActionError, Scenario},
    session::SessionState,
    shutdown::{CancelFn, CancelSignal, Shutdown},
    timebuffer::TimeBuffer,
};
use internals::*;

/// Sentinel for "no bound" in `executiontime` and `concurrentusers`.
pub const UNLIMITED: i64 = -1;

fn unlimited() -> i64 {
    UNLIMITED
}

fn first_instance() -> i64 {
    1
}

/// Knobs of the [`SimpleScheduler`], named as in the JSON configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct SimpleSettings {
    /// Seconds the run may last, [`UNLIMITED`] for no bound
    #[serde(rename = "executiontime", default = "unlimited")]
    #[builder(default = UNLIMITED)]
    pub execution_time: i64,
    /// Iterations per user, any negative value for no bound
    pub iterations: i64,
    /// Seconds between two user starts
    #[serde(rename = "rampupdelay")]
    pub ramp_up_delay: f64,
    /// Users running at the same time, [`UNLIMITED`] keeps adding users
    #[serde(rename = "concurrentusers")]
    pub concurrent_users: i64,
    #[serde(rename = "reuseusers", default)]
    #[builder(default)]
    pub reuse_users: bool,
    /// Seed every session from the instance alone
    #[serde(rename = "onlyinstanceseed", default)]
    #[builder(default)]
    pub only_instance_seed: bool,
    /// Errors tolerated before the run is cancelled, 0 tolerates any number
    #[serde(rename = "maxerrors", default)]
    #[builder(default)]
    pub max_errors: u64,
    #[serde(rename = "continueonerrors", default)]
    #[builder(default)]
    pub continue_on_errors: bool,
}

impl SimpleSettings {
    pub fn execution_limit(&self) -> Option<Duration> {
        u64::try_from(self.execution_time)
            .ok()
            .map(Duration::from_secs)
    }

    pub fn iteration_limit(&self) -> Option<u64> {
        u64::try_from(self.iterations).ok()
    }

    pub fn user_cap(&self) -> Option<u64> {
        u64::try_from(self.concurrent_users).ok()
    }

    pub fn ramp_up_interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.ramp_up_delay)
            .ok()
            .filter(|delay| !delay.is_zero())
            .ok_or_else(|| {
                invalid(
                    "RampupDelay",
                    self.ramp_up_delay,
                    "must be a positive number of seconds",
                )
            })
    }
}

fn invalid(setting: &'static str, value: impl ToString, reason: &'static str) -> Error {
    Error::InvalidSchedulerSetting {
        setting,
        value: value.to_string(),
        reason,
    }
}

/// Scheduler ramping up to `concurrentusers` users, one every `rampupdelay`
/// seconds.
///
/// # Example
/// ```rust
/// use stampede::{Scheduler, SimpleScheduler, SimpleSettings};
///
/// let scheduler = SimpleScheduler::builder()
///     .settings(
///         SimpleSettings::builder()
///             .iterations(10)
///             .ramp_up_delay(0.5)
///             .concurrent_users(20)
///             .build(),
///     )
///     .build();
/// assert!(scheduler.validate().unwrap().is_empty());
/// ```
#[derive(Debug, Serialize, Deserialize, TypedBuilder)]
pub struct SimpleScheduler {
    /// Load generator instance, part of every session seed
    #[serde(default = "first_instance")]
    #[builder(default = 1)]
    pub instance: i64,
    #[serde(rename = "iterationtimebuffer", default)]
    #[builder(default)]
    pub time_buffer: TimeBuffer,
    pub settings: SimpleSettings,
    #[serde(skip)]
    #[builder(default, setter(skip))]
    cancel: Arc<CancelSlot>,
}

#[async_trait]
impl Scheduler for SimpleScheduler {
    fn validate(&self) -> Result<Vec<String>> {
        let settings = &self.settings;
        if settings.execution_time != UNLIMITED && settings.execution_time < 1 {
            return Err(invalid(
                "ExecutionTime",
                settings.execution_time,
                "must be -1 (unlimited) or at least 1 second",
            ));
        }
        if settings.iterations == 0 {
            return Err(invalid(
                "Iterations",
                settings.iterations,
                "must not be 0, use a negative value for unlimited",
            ));
        }
        settings.ramp_up_interval()?;
        if settings.concurrent_users != UNLIMITED && settings.concurrent_users < 1 {
            return Err(invalid(
                "ConcurrentUsers",
                settings.concurrent_users,
                "must be -1 (unlimited) or at least 1",
            ));
        }
        self.time_buffer.validate()?;

        let mut warnings = Vec::new();
        if settings.execution_limit().is_none() && settings.iteration_limit().is_none() {
            warnings.push(
                "neither execution time nor iterations are limited, the run ends only when cancelled"
                    .to_string(),
            );
        }
        if settings.only_instance_seed && settings.concurrent_users != 1 {
            warnings.push(
                "onlyinstanceseed with more than one concurrent user, every user draws the same random sequence"
                    .to_string(),
            );
        }
        Ok(warnings)
    }

    async fn execute(
        &self,
        signal: CancelSignal,
        scenario: &Scenario,
        counters: Arc<ExecutionCounters>,
    ) -> Result<()> {
        for warning in self.validate()? {
            tracing::warn!("{warning}");
        }
        let delay = self.settings.ramp_up_interval()?;

        let run = Shutdown::child_of(&signal);
        self.cancel.set_run(Some(run.cancel_fn()));

        let ctx = Arc::new(RunContext::new(self, scenario, counters, run.signal()));
        let timer = self
            .settings
            .execution_limit()
            .map(|limit| tokio::spawn(execution_timer(run.clone(), limit)));

        tracing::info!("Running scenario: {}!", scenario.name);
        let (threads, handles): (Vec<u64>, Vec<JoinHandle<Result<()>>>) =
            spawn_users(ctx, delay).await.into_iter().unzip();

        tracing::info!("Waiting for {} users to finish...", handles.len());
        let results = join_all(handles).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        self.cancel.set_run(None);

        let errors = threads
            .into_iter()
            .zip(results)
            .filter_map(|(thread, res)| match res {
                Ok(res) => res.err(),
                Err(e) => {
                    tracing::error!("User thread {thread} panicked with error: {e}");
                    Some(Error::UserThread {
                        thread,
                        reason: e.to_string(),
                    })
                }
            });
        let result = join_errors(errors);

        tracing::info!("Done running scenario: {}!", scenario.name);
        result
    }

    fn set_cancel(&self, cancel: CancelFn) {
        self.cancel.set(cancel);
    }

    fn cancel(&self, msg: &str) {
        self.cancel.cancel(msg);
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Internal components for the `SimpleScheduler`.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use super::*;

    /// Shared state of one run, handed to the spawner and every user thread.
    pub struct RunContext {
        pub scenario: Scenario,
        pub settings: SimpleSettings,
        pub instance: i64,
        /// Template copied by every user thread
        pub time_buffer: TimeBuffer,
        pub counters: Arc<ExecutionCounters>,
        pub signal: CancelSignal,
        pub cancel: Arc<CancelSlot>,
        threshold_reached: AtomicBool,
    }

    impl RunContext {
        pub fn new(
            scheduler: &SimpleScheduler,
            scenario: &Scenario,
            counters: Arc<ExecutionCounters>,
            signal: CancelSignal,
        ) -> Self {
            Self {
                scenario: scenario.clone(),
                settings: scheduler.settings.clone(),
                instance: scheduler.instance,
                time_buffer: scheduler.time_buffer.clone(),
                counters,
                signal,
                cancel: scheduler.cancel.clone(),
                threshold_reached: AtomicBool::new(false),
            }
        }

        fn new_session(&self, thread: u64) -> SessionState {
            let user = self.scenario.users.next(&self.counters);
            let session = self.counters.sessions.inc();
            SessionState::new(
                user,
                thread,
                session,
                self.instance,
                self.settings.only_instance_seed,
                self.counters.clone(),
                self.signal.clone(),
                self.scenario.outputs_dir.clone(),
            )
        }

        /// Counts an error, cancels the run the first time the threshold is
        /// exceeded.
        pub fn record_error(&self) {
            let errors = self.counters.errors.inc();
            let max = self.settings.max_errors;
            if max > 0 && errors > max && !self.threshold_reached.swap(true, Ordering::SeqCst) {
                self.cancel
                    .cancel(&format!("max error count of {max} exceeded ({errors} errors)"));
            }
        }
    }

    /// Counts the user as active until dropped, unwinding included.
    pub struct ActiveUser<'a>(&'a AtomicCounter);

    impl<'a> ActiveUser<'a> {
        pub fn enter(counter: &'a AtomicCounter) -> Self {
            counter.inc();
            Self(counter)
        }
    }

    impl Drop for ActiveUser<'_> {
        fn drop(&mut self) {
            self.0.dec();
        }
    }

    /// Cancels `run` once `limit` elapsed, unless it ends earlier.
    pub async fn execution_timer(run: Shutdown, limit: Duration) {
        let signal = run.signal();
        tokio::select! {
            _ = tokio::time::sleep(limit) => {
                if run.cancel() {
                    tracing::info!("Execution time of {limit:?} reached, cancelling run...");
                }
            }
            _ = signal.cancelled() => {}
        }
    }

    /// Starts one user right away and one more every `delay` until the cap is
    /// reached or the run is cancelled.
    ///
    /// Returns the handles tagged with their thread numbers.
    pub async fn spawn_users(
        ctx: Arc<RunContext>,
        delay: Duration,
    ) -> Vec<(u64, JoinHandle<Result<()>>)> {
        let cap = ctx.settings.user_cap();
        let mut ticker = tokio::time::interval(delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut handles = Vec::new();
        loop {
            tokio::select! {
                _ = ctx.signal.cancelled() => {
                    tracing::info!("Run cancelled, stopping ramp-up after {} users.", handles.len());
                    break;
                }
                _ = ticker.tick() => {}
            }
            if ctx.signal.is_cancelled() {
                break;
            }

            let thread = ctx.counters.threads.inc();
            tracing::debug!("Starting user thread {thread}.");
            handles.push((thread, tokio::spawn(user_thread(ctx.clone(), thread))));

            if cap.is_some_and(|cap| handles.len() as u64 >= cap) {
                tracing::info!("Ramp-up done, {} users started.", handles.len());
                break;
            }
        }
        handles
    }

    /// One simulated user: runs its iterations until done, cancelled or
    /// stopped by an error.
    pub async fn user_thread(ctx: Arc<RunContext>, thread: u64) -> Result<()> {
        let limit = ctx.settings.iteration_limit();
        let mut time_buffer = ctx.time_buffer.clone();
        let mut session: Option<SessionState> = None;
        let mut previous_had_errors: Option<bool> = None;
        let mut errors = Vec::new();
        let mut done = 0u64;

        while limit.is_none_or(|limit| done < limit) {
            // timers and the spawner must run even when no action suspends
            tokio::task::yield_now().await;
            if let Some(had_errors) = previous_had_errors {
                if let Err(err) = time_buffer.wait(&ctx.signal, had_errors).await {
                    errors.push(err);
                    break;
                }
            }
            if ctx.signal.is_cancelled() {
                break;
            }

            let state = match session.take() {
                Some(mut state) if ctx.settings.reuse_users => {
                    state.reinit();
                    state
                }
                _ => ctx.new_session(thread),
            };
            let state = session.insert(state);

            time_buffer.set_duration_start(Instant::now());
            let outcome = run_iteration(&ctx, state, done).await;
            done += 1;

            previous_had_errors = Some(!outcome.errors.is_empty());
            errors.extend(outcome.errors);
            if outcome.stop_user {
                tracing::info!("User thread {thread} stopped after an error.");
                break;
            }
        }

        tracing::debug!("User thread {thread} finished after {done} iterations.");
        join_errors(errors)
    }

    #[derive(Debug, Default)]
    pub struct IterationOutcome {
        pub errors: Vec<Error>,
        /// The user must not run further iterations
        pub stop_user: bool,
    }

    /// Runs the scenario's actions once, in order.
    pub async fn run_iteration(
        ctx: &RunContext,
        session: &mut SessionState,
        iteration: u64,
    ) -> IterationOutcome {
        let span = tracing::info_span!(
            "iteration",
            thread = session.thread(),
            session = session.session(),
            user = %session.user(),
            iteration
        );

        async {
            let _active = ActiveUser::enter(&ctx.counters.active_users);
            let mut outcome = IterationOutcome::default();
            let timeout = ctx.scenario.action_timeout;

            for action in &ctx.scenario.actions {
                tokio::task::yield_now().await;
                if session.is_cancelled() {
                    tracing::debug!("Run cancelled, skipping remaining actions.");
                    break;
                }
                let label = action.label();
                let res = tokio::time::timeout(
                    timeout,
                    action.execute(session, &ctx.scenario.connection),
                )
                .await;

                let err = match res {
                    Ok(Ok(())) => {
                        tracing::debug!(action = label, "Action succeeded.");
                        continue;
                    }
                    Ok(Err(ActionError::Abort)) => {
                        tracing::info!(action = label, "Iteration aborted.");
                        break;
                    }
                    Ok(Err(ActionError::Failed(source))) => Error::Action {
                        action: label.to_string(),
                        source,
                    },
                    Err(_) => Error::ActionTimeout {
                        action: label.to_string(),
                        timeout,
                    },
                };

                tracing::error!(action = label, "{err}");
                ctx.record_error();
                outcome.errors.push(err);
                if !ctx.settings.continue_on_errors {
                    outcome.stop_user = true;
                    break;
                }
            }

            outcome
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicU64};

    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::ConnectionSettings,
        random::predictable_seed,
        scenario::{Action, User, UserSource},
        timebuffer::TimeBufferMode,
    };

    type StepFn = dyn Fn(&mut SessionState) -> std::result::Result<(), ActionError> + Send + Sync;

    /// Test action: optional pause, then a synchronous body.
    struct Step {
        label: &'static str,
        pause: Duration,
        body: Box<StepFn>,
    }

    impl Step {
        fn new(
            label: &'static str,
            body: impl Fn(&mut SessionState) -> std::result::Result<(), ActionError>
            + Send
            + Sync
            + 'static,
        ) -> Arc<dyn Action> {
            Arc::new(Self {
                label,
                pause: Duration::ZERO,
                body: Box::new(body),
            })
        }

        fn sleeping(label: &'static str, pause: Duration) -> Arc<dyn Action> {
            Arc::new(Self {
                label,
                pause,
                body: Box::new(|_| Ok(())),
            })
        }

        fn failing(label: &'static str, pause: Duration) -> Arc<dyn Action> {
            Arc::new(Self {
                label,
                pause,
                body: Box::new(|_| Err(ActionError::failed("request rejected"))),
            })
        }
    }

    #[async_trait]
    impl Action for Step {
        fn label(&self) -> &str {
            self.label
        }

        async fn execute(
            &self,
            session: &mut SessionState,
            _connection: &ConnectionSettings,
        ) -> std::result::Result<(), ActionError> {
            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            (self.body)(session)
        }
    }

    struct Numbered;

    impl UserSource for Numbered {
        fn next(&self, counters: &ExecutionCounters) -> User {
            User::new(format!("user_{}", counters.users.inc()))
        }
    }

    /// Counts how often a step ran, per thread.
    fn counting(label: &'static str, seen: &Arc<Mutex<Vec<u64>>>) -> Arc<dyn Action> {
        let seen = seen.clone();
        Step::new(label, move |session| {
            seen.lock().unwrap().push(session.thread());
            Ok(())
        })
    }

    fn settings(iterations: i64, users: i64) -> SimpleSettings {
        SimpleSettings::builder()
            .iterations(iterations)
            .ramp_up_delay(1.0)
            .concurrent_users(users)
            .build()
    }

    fn scheduler(settings: SimpleSettings) -> SimpleScheduler {
        SimpleScheduler::builder().settings(settings).build()
    }

    fn scenario(actions: Vec<Arc<dyn Action>>) -> Scenario {
        Scenario::builder()
            .name("test")
            .actions(actions)
            .users(Arc::new(Numbered))
            .build()
    }

    async fn run(
        scheduler: &SimpleScheduler,
        scenario: &Scenario,
    ) -> (Result<()>, Arc<ExecutionCounters>) {
        let counters = Arc::new(ExecutionCounters::new());
        let res = scheduler
            .execute(CancelSignal::never(), scenario, counters.clone())
            .await;
        (res, counters)
    }

    fn joined(res: Result<()>) -> Vec<Error> {
        match res {
            Err(Error::Joined(joined)) => joined.into_errors(),
            Err(other) => panic!("expected joined errors, got {other}"),
            Ok(()) => panic!("expected errors, run succeeded"),
        }
    }

    mod validate {
        use super::*;

        #[test]
        fn accepts_sane_settings() {
            assert!(scheduler(settings(10, 10)).validate().unwrap().is_empty());
        }

        #[test]
        fn rejects_each_invalid_setting() {
            let cases: [(fn(&mut SimpleSettings), &str); 6] = [
                (|s| s.execution_time = 0, "ExecutionTime<0>"),
                (|s| s.execution_time = -2, "ExecutionTime<-2>"),
                (|s| s.iterations = 0, "Iterations<0>"),
                (|s| s.ramp_up_delay = 0.0, "RampupDelay<0>"),
                (|s| s.ramp_up_delay = -1.5, "RampupDelay<-1.5>"),
                (|s| s.concurrent_users = 0, "ConcurrentUsers<0>"),
            ];

            for (mutate, fragment) in cases {
                let mut settings = settings(1, 1);
                mutate(&mut settings);
                let msg = scheduler(settings).validate().unwrap_err().to_string();
                assert!(
                    msg.starts_with("Invalid simple scheduler setting: "),
                    "{msg}"
                );
                assert!(msg.contains(fragment), "{msg} lacks {fragment}");
            }
        }

        #[test]
        fn reasons_are_distinct() {
            let mut bad_time = settings(1, 1);
            bad_time.execution_time = 0;
            let mut bad_users = settings(1, 1);
            bad_users.concurrent_users = 0;

            let time_err = scheduler(bad_time).validate().unwrap_err().to_string();
            let users_err = scheduler(bad_users).validate().unwrap_err().to_string();
            assert!(time_err.contains("second"));
            assert!(!users_err.contains("second"));
        }

        #[test]
        fn negative_iterations_mean_unlimited() {
            let mut settings = settings(-5, 2);
            settings.execution_time = 60;
            assert!(scheduler(settings.clone()).validate().unwrap().is_empty());
            assert_eq!(settings.iteration_limit(), None);
        }

        #[test]
        fn warns_about_unbounded_runs() {
            let warnings = scheduler(settings(-1, 1)).validate().unwrap();
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("only when cancelled"));
        }

        #[test]
        fn warns_about_shared_seed() {
            let mut settings = settings(1, 2);
            settings.only_instance_seed = true;
            let warnings = scheduler(settings).validate().unwrap();
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("onlyinstanceseed"));
        }

        #[test]
        fn rejects_invalid_time_buffer() {
            let scheduler = SimpleScheduler::builder()
                .settings(settings(1, 1))
                .time_buffer(TimeBuffer::new(TimeBufferMode::Constant, Duration::ZERO))
                .build();
            assert!(matches!(
                scheduler.validate(),
                Err(Error::InvalidTimeBuffer { .. })
            ));
        }

        #[test]
        fn parses_config() {
            let scheduler: SimpleScheduler = serde_json::from_str(
                r#"{
                    "type": "simple",
                    "instance": 2,
                    "iterationtimebuffer": {"mode": "constant", "duration": "500ms"},
                    "settings": {
                        "executiontime": -1,
                        "iterations": 10,
                        "rampupdelay": 1.0,
                        "concurrentusers": 10,
                        "reuseusers": true,
                        "maxerrors": 5
                    }
                }"#,
            )
            .unwrap();

            assert_eq!(scheduler.instance, 2);
            assert_eq!(scheduler.time_buffer.mode, TimeBufferMode::Constant);
            assert_eq!(scheduler.time_buffer.duration, Duration::from_millis(500));
            assert_eq!(scheduler.settings.iterations, 10);
            assert_eq!(scheduler.settings.execution_limit(), None);
            assert_eq!(scheduler.settings.user_cap(), Some(10));
            assert!(scheduler.settings.reuse_users);
            assert!(!scheduler.settings.continue_on_errors);
            assert_eq!(scheduler.settings.max_errors, 5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ramps_up_one_user_per_delay_up_to_cap() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let peak = Arc::new(AtomicU64::new(0));
        let record = {
            let starts = starts.clone();
            let peak = peak.clone();
            Step::new("record", move |session| {
                starts
                    .lock()
                    .unwrap()
                    .push((session.thread(), Instant::now()));
                peak.fetch_max(session.counters().active_users.current(), Ordering::SeqCst);
                Ok(())
            })
        };
        let hold = Step::sleeping("hold", Duration::from_secs(10));

        let begin = Instant::now();
        let (res, counters) = run(&scheduler(settings(1, 3)), &scenario(vec![record, hold])).await;
        res.unwrap();

        assert_eq!(counters.threads.current(), 3);
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        for (thread, at) in starts.iter() {
            assert!(*at - begin >= Duration::from_secs(thread - 1));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(counters.active_users.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_users_stops_at_cap() {
        let counters = Arc::new(ExecutionCounters::new());
        let scheduler = scheduler(settings(1, 4));
        let ctx = Arc::new(RunContext::new(
            &scheduler,
            &scenario(Vec::new()),
            counters.clone(),
            CancelSignal::never(),
        ));

        let handles = spawn_users(ctx, Duration::from_millis(10)).await;
        assert_eq!(handles.len(), 4);
        let threads: Vec<u64> = handles.iter().map(|(thread, _)| *thread).collect();
        assert_eq!(threads, [1, 2, 3, 4]);
        for (_, handle) in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(counters.sessions.current(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_user_per_iteration_without_reuse() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = {
            let seen = seen.clone();
            Step::new("record", move |session| {
                let seed = session.rand().seed();
                seen.lock()
                    .unwrap()
                    .push((session.user().name.clone(), session.session(), seed));
                Ok(())
            })
        };

        let (res, counters) = run(&scheduler(settings(3, 1)), &scenario(vec![record])).await;
        res.unwrap();

        assert_eq!(counters.users.current(), 3);
        assert_eq!(counters.sessions.current(), 3);
        let seen = seen.lock().unwrap();
        for (n, (user, session, seed)) in seen.iter().enumerate() {
            let n = n as u64 + 1;
            assert_eq!(user, &format!("user_{n}"));
            assert_eq!(*session, n);
            assert_eq!(*seed, predictable_seed(1, n as i64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reused_user_is_reseeded_between_iterations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = {
            let seen = seen.clone();
            Step::new("record", move |session| {
                let seed = session.rand().seed();
                seen.lock()
                    .unwrap()
                    .push((session.user().name.clone(), session.iteration(), seed));
                Ok(())
            })
        };
        let mut settings = settings(3, 1);
        settings.reuse_users = true;

        let (res, counters) = run(&scheduler(settings), &scenario(vec![record])).await;
        res.unwrap();

        assert_eq!(counters.users.current(), 1);
        assert_eq!(counters.sessions.current(), 3);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for (n, (user, iteration, seed)) in seen.iter().enumerate() {
            assert_eq!(user, "user_1");
            assert_eq!(*iteration, n as u64);
            assert_eq!(*seed, predictable_seed(1, n as i64 + 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abort_ends_iteration_without_error() {
        let aborted = Arc::new(Mutex::new(Vec::new()));
        let after = Arc::new(Mutex::new(Vec::new()));
        let abort = {
            let aborted = aborted.clone();
            Step::new("abort", move |session| {
                aborted.lock().unwrap().push(session.thread());
                Err(ActionError::Abort)
            })
        };

        let (res, counters) = run(
            &scheduler(settings(2, 1)),
            &scenario(vec![abort, counting("after", &after)]),
        )
        .await;

        res.unwrap();
        assert_eq!(counters.errors.current(), 0);
        assert_eq!(aborted.lock().unwrap().len(), 2);
        assert!(after.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn error_stops_only_the_failing_user() {
        let after = Arc::new(Mutex::new(Vec::new()));
        let fail_first_thread = Step::new("fail", |session| {
            if session.thread() == 1 {
                Err(ActionError::failed("request rejected"))
            } else {
                Ok(())
            }
        });

        let (res, counters) = run(
            &scheduler(settings(3, 2)),
            &scenario(vec![fail_first_thread, counting("after", &after)]),
        )
        .await;

        let errors = joined(res);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::Action { action, .. } if action == "fail"));
        assert_eq!(counters.errors.current(), 1);

        let after = after.lock().unwrap();
        assert_eq!(after.iter().filter(|t| **t == 1).count(), 0);
        assert_eq!(after.iter().filter(|t| **t == 2).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn continues_after_errors_when_enabled() {
        let after = Arc::new(Mutex::new(Vec::new()));
        let mut settings = settings(3, 1);
        settings.continue_on_errors = true;

        let (res, counters) = run(
            &scheduler(settings),
            &scenario(vec![
                Step::failing("fail", Duration::ZERO),
                counting("after", &after),
            ]),
        )
        .await;

        assert_eq!(joined(res).len(), 3);
        assert_eq!(counters.errors.current(), 3);
        assert_eq!(after.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn max_errors_cancels_the_run() {
        let mut settings = settings(-1, 2);
        settings.max_errors = 2;
        settings.continue_on_errors = true;
        let scheduler = scheduler(settings);

        let outer_called = Arc::new(AtomicBool::new(false));
        let flag = outer_called.clone();
        scheduler.set_cancel(Arc::new(move || flag.store(true, Ordering::SeqCst)));

        let (res, counters) = run(
            &scheduler,
            &scenario(vec![Step::failing("fail", Duration::from_millis(10))]),
        )
        .await;

        assert_eq!(joined(res).len(), 3);
        assert_eq!(counters.errors.current(), 3);
        assert_eq!(counters.threads.current(), 1);
        assert!(outer_called.load(Ordering::SeqCst));
    }

    #[test]
    #[traced_test]
    fn threshold_cancels_exactly_once() {
        let mut settings = settings(1, 1);
        settings.max_errors = 1;
        let scheduler = scheduler(settings);

        let calls = Arc::new(AtomicU64::new(0));
        let counted = calls.clone();
        scheduler.set_cancel(Arc::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }));

        let counters = Arc::new(ExecutionCounters::new());
        let ctx = RunContext::new(
            &scheduler,
            &scenario(Vec::new()),
            counters.clone(),
            CancelSignal::never(),
        );

        ctx.record_error();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        ctx.record_error();
        ctx.record_error();

        assert_eq!(counters.errors.current(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("max error count of 1 exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn execution_time_bounds_the_run() {
        let mut settings = settings(-1, 2);
        settings.execution_time = 1;

        let begin = Instant::now();
        let (res, _) = run(
            &scheduler(settings),
            &scenario(vec![Step::sleeping("think", Duration::from_millis(100))]),
        )
        .await;

        res.unwrap();
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1200), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn external_cancel_stops_unlimited_run() {
        let scheduler = scheduler(settings(-1, UNLIMITED));
        let scenario = scenario(vec![Step::sleeping("think", Duration::from_millis(100))]);
        let counters = Arc::new(ExecutionCounters::new());

        let begin = Instant::now();
        let (res, ()) = tokio::join!(
            scheduler.execute(CancelSignal::never(), &scenario, counters.clone()),
            async {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                scheduler.cancel("operator abort");
            }
        );

        res.unwrap();
        assert_eq!(counters.threads.current(), 3);
        assert!(begin.elapsed() < Duration::from_millis(2700));
        assert_eq!(counters.active_users.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_signal_stops_the_run() {
        let scheduler = scheduler(settings(-1, 1));
        let scenario = scenario(vec![Step::sleeping("think", Duration::from_millis(100))]);
        let parent = Shutdown::new();

        let begin = Instant::now();
        let (res, ()) = tokio::join!(
            scheduler.execute(
                parent.signal(),
                &scenario,
                Arc::new(ExecutionCounters::new())
            ),
            async {
                tokio::time::sleep(Duration::from_millis(550)).await;
                parent.cancel();
            }
        );

        res.unwrap();
        assert!(begin.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_applies_between_iterations_only() {
        let scheduler = SimpleScheduler::builder()
            .settings(settings(3, 1))
            .time_buffer(TimeBuffer::new(
                TimeBufferMode::Constant,
                Duration::from_secs(1),
            ))
            .build();

        let begin = Instant::now();
        let (res, _) = run(&scheduler, &scenario(vec![Step::sleeping("noop", Duration::ZERO)])).await;

        res.unwrap();
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_action_times_out() {
        let scenario = Scenario::builder()
            .name("slow")
            .actions(vec![Step::sleeping("stuck", Duration::from_secs(600))])
            .users(Arc::new(Numbered))
            .action_timeout(Duration::from_secs(1))
            .build();

        let begin = Instant::now();
        let (res, counters) = run(&scheduler(settings(1, 1)), &scenario).await;

        let errors = joined(res);
        assert!(matches!(&errors[0], Error::ActionTimeout { action, .. } if action == "stuck"));
        assert_eq!(counters.errors.current(), 1);
        assert!(begin.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_user_is_reported() {
        let boom = Step::new("boom", |_| panic!("boom"));

        let (res, counters) = run(&scheduler(settings(1, 2)), &scenario(vec![boom])).await;

        let errors = joined(res);
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], Error::UserThread { thread: 1, .. }));
        assert_eq!(counters.threads.current(), 2);
        assert_eq!(counters.active_users.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_installed_mid_run_keeps_run_cancellable() {
        let scheduler = scheduler(settings(-1, 1));
        let scenario = scenario(vec![Step::sleeping("think", Duration::from_millis(100))]);
        let called = Arc::new(AtomicBool::new(false));

        let begin = Instant::now();
        let (res, ()) = tokio::join!(
            scheduler.execute(
                CancelSignal::never(),
                &scenario,
                Arc::new(ExecutionCounters::new())
            ),
            async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let flag = called.clone();
                scheduler.set_cancel(Arc::new(move || flag.store(true, Ordering::SeqCst)));
                tokio::time::sleep(Duration::from_millis(250)).await;
                scheduler.cancel("operator abort");
            }
        );

        res.unwrap();
        assert!(called.load(Ordering::SeqCst));
        assert!(begin.elapsed() < Duration::from_millis(700));
    }

    mod instant_actions {
        use super::*;

        fn bounded() -> SimpleScheduler {
            let mut settings = settings(-1, 2);
            settings.execution_time = 1;
            settings.continue_on_errors = true;
            scheduler(settings)
        }

        async fn finishes(action: Arc<dyn Action>) -> Arc<ExecutionCounters> {
            let scheduler = bounded();
            let scenario = scenario(vec![action]);
            let begin = Instant::now();

            let (res, counters) =
                tokio::time::timeout(Duration::from_secs(5), run(&scheduler, &scenario))
                    .await
                    .expect("1s execution-time run did not finish within 5s");

            res.unwrap();
            assert!(begin.elapsed() >= Duration::from_secs(1));
            assert_eq!(counters.active_users.current(), 0);
            counters
        }

        #[tokio::test]
        async fn execution_time_ends_run_on_current_thread() {
            let counters = finishes(Step::new("ok", |_| Ok(()))).await;
            assert!(counters.sessions.current() > 2);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn execution_time_ends_run_on_multi_thread() {
            finishes(Step::new("ok", |_| Ok(()))).await;
        }

        #[tokio::test]
        async fn aborting_iterations_still_yield() {
            let counters = finishes(Step::new("abort", |_| Err(ActionError::Abort))).await;
            assert_eq!(counters.errors.current(), 0);
        }
    }
}
