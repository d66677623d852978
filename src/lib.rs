//! Stampede, the scheduling core of a load generator.
//!
//! Stampede starts simulated users over time, runs a scripted sequence of
//! actions for each of them and paces their iterations. It knows nothing about
//! the protocol under test: actions are supplied by the caller, stampede only
//! decides when and as whom they run.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Scenario`]: the action sequence together with the shared collaborators
//!   (user source, connection settings, outputs directory).
//! - [`Action`]: one scripted step. Returning [`ActionError::Abort`] ends the
//!   iteration quietly, any other error is counted and reported.
//! - [`Scheduler`]: runs a scenario. The built-in [`SimpleScheduler`] ramps up
//!   one user per delay up to a concurrency cap; other schedulers can be plugged
//!   in through the [`SchedulerRegistry`].
//! - [`SessionState`]: what an action sees of its user, including a
//!   reproducibly seeded [`Randomizer`] and per-session [`RequestMetrics`].
//! - [`ExecutionCounters`]: run-wide atomic counters shared by every user.
//! - [`TimeBuffer`]: pacing applied between two iterations of a user.
//!
//! # Reproducibility
//!
//! Every session is seeded from its load generator instance and session number
//! through [`predictable_seed`], two runs with the same configuration draw the
//! same random sequences.
//!
//! # Feature flags
//! - `builtins` (default): built-in [`UserSource`]s in [`users`]
//! - `internals`: enable access to internal (and unstable) functions of the simple scheduler
//!
//! # Where to start
//!
//! Implement [`Action`] for your steps, build a [`Scenario`] and hand it to a
//! scheduler parsed with [`SchedulerRegistry::parse`].

/// Lock-free counter and timestamp registers
pub mod atomic;
/// Connection settings passed to every action
pub mod config;
/// Run-wide counters
pub mod counters;
/// Error types
pub mod error;
/// Per-session request timing and byte counts
pub mod metrics;
/// Seeded randomness
pub mod random;
/// Actions, users and the scenario that ties them together
pub mod scenario;
/// Schedulers and their registry
pub mod scheduler;
/// State handed to actions
pub mod session;
/// Cooperative cancellation
pub mod shutdown;
/// Pacing between iterations
pub mod timebuffer;
/// Ready-made user sources
#[cfg(feature = "builtins")]
pub mod users;

pub use atomic::{AtomicCounter, AtomicTimeStamp};
pub use config::ConnectionSettings;
pub use counters::ExecutionCounters;
pub use error::{Error, Result};
pub use metrics::RequestMetrics;
pub use random::{Randomizer, Weighted, predictable_seed};
pub use scenario::{Action, ActionError, Scenario, User, UserSource};
pub use scheduler::{Scheduler, SchedulerRegistry, SimpleScheduler, SimpleSettings};
pub use session::SessionState;
pub use shutdown::{CancelFn, CancelSignal, Shutdown};
pub use timebuffer::{TimeBuffer, TimeBufferMode};
