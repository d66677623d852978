//! Schedulers ramp up simulated users and drive their iterations.
//!
//! A [`Scheduler`] receives a [`Scenario`] and a shared [`ExecutionCounters`]
//! aggregate, starts users over time and returns once every user finished or
//! the run was cancelled. Different schedulers implement different load
//! shapes; the built-in [`SimpleScheduler`] starts one user per ramp-up tick
//! up to a concurrency cap.
//!
//! Scheduler configurations are JSON documents tagged by `"type"` and turned
//! into schedulers by a [`SchedulerRegistry`].
pub mod registry;
pub mod simple;

pub use registry::{BuiltinScheduler, SchedulerFactory, SchedulerRegistry};
pub use simple::{SimpleScheduler, SimpleSettings, UNLIMITED};

use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::{
    counters::ExecutionCounters,
    error::Result,
    scenario::Scenario,
    shutdown::{CancelFn, CancelSignal},
};

/// The runtime that executes a [`Scenario`].
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Checks the configuration, returns warnings for settings that are valid
    /// but probably unintended.
    fn validate(&self) -> Result<Vec<String>>;

    /// Runs the scenario until every user is done or `signal` fires.
    ///
    /// Failures of individual users never stop the others; all of them are
    /// returned together as one [`crate::Error::Joined`].
    async fn execute(
        &self,
        signal: CancelSignal,
        scenario: &Scenario,
        counters: Arc<ExecutionCounters>,
    ) -> Result<()>;

    /// Installs the function used to abort the run.
    fn set_cancel(&self, cancel: CancelFn);

    /// Aborts the run, `msg` says why. Users stop at their next check.
    fn cancel(&self, msg: &str);
}

/// Lock-free holder of a scheduler's cancel functions.
///
/// The function installed with [`CancelSlot::set`] and the one a running
/// scheduler installs for itself live side by side, replacing one never
/// drops the other.
#[derive(Default)]
pub struct CancelSlot {
    installed: ArcSwapOption<CancelFn>,
    run: ArcSwapOption<CancelFn>,
}

impl CancelSlot {
    pub fn set(&self, cancel: CancelFn) {
        self.installed.store(Some(Arc::new(cancel)));
    }

    pub fn get(&self) -> Option<CancelFn> {
        self.installed.load_full().map(|cancel| (*cancel).clone())
    }

    /// Installs the cancel function of the current run, `None` once it ended.
    pub fn set_run(&self, cancel: Option<CancelFn>) {
        self.run.store(cancel.map(Arc::new));
    }

    /// Invokes the run function, then the installed one. `false` when neither
    /// is present.
    pub fn cancel(&self, msg: &str) -> bool {
        let run = self.run.load_full();
        let installed = self.installed.load_full();
        if run.is_none() && installed.is_none() {
            tracing::warn!(reason = msg, "cancel requested but no run is cancellable");
            return false;
        }

        tracing::info!(reason = msg, "cancelling run");
        for cancel in run.iter().chain(installed.iter()) {
            cancel();
        }
        true
    }
}

impl fmt::Debug for CancelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSlot")
            .field("installed", &self.installed.load().is_some())
            .field("running", &self.run.load().is_some())
            .finish()
    }
}
