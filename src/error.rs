//! Error types for stampede

use std::fmt;

use thiserror::Error;

/// Boxed error produced by user supplied actions and factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// A scheduler setting failed validation.
    ///
    /// The message prefix is relied upon by existing consumers, keep it stable.
    #[error("Invalid simple scheduler setting: {setting}<{value}> {reason}")]
    InvalidSchedulerSetting {
        setting: &'static str,
        value: String,
        reason: &'static str,
    },

    /// Time buffer configured with a non-positive duration
    #[error("invalid time buffer: mode<{mode}> requires a positive duration, got <{duration:?}>")]
    InvalidTimeBuffer {
        mode: &'static str,
        duration: std::time::Duration,
    },

    #[error("time buffer: no duration start mark set")]
    DurationStartMissing,

    #[error("time buffer: duration start mark is in the future")]
    DurationStartInFuture,

    #[error("negative byte count <{0}>")]
    NegativeBytes(i64),

    /// Compare-and-swap on a timestamp register lost every attempt to concurrent writers.
    #[error("failed to update timestamp, contention exhausted {0} attempts")]
    TimestampContention(usize),

    #[error("randomizer: {0}")]
    Random(#[from] RandomError),

    #[error("action<{action}> failed: {source}")]
    Action {
        action: String,
        #[source]
        source: BoxError,
    },

    #[error("action<{action}> timed out after {timeout:?}")]
    ActionTimeout {
        action: String,
        timeout: std::time::Duration,
    },

    #[error("user thread<{thread}> panicked: {reason}")]
    UserThread { thread: u64, reason: String },

    #[error("unknown scheduler type <{0}>")]
    UnknownScheduler(String),

    #[error("scheduler config is missing the \"type\" tag")]
    MissingSchedulerType,

    #[error("scheduler type <{0}> is already registered")]
    DuplicateScheduler(String),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Joined(#[from] JoinedError),
}

/// Errors raised by [`crate::Randomizer`] draws.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RandomError {
    #[error("cannot draw from an empty list")]
    EmptyList,

    #[error("generator is not initialized")]
    Uninitialized,

    #[error("invalid range, min<{min}> is greater than max<{max}>")]
    InvalidRange { min: String, max: String },

    #[error("sum of weights must be positive, got <{0}>")]
    WeightSum(i128),

    #[error("generated {got} bytes, wanted {wanted}")]
    ShortRead { wanted: usize, got: usize },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Several errors collected at one aggregation boundary (iteration, user thread, run).
#[derive(Debug, Default)]
pub struct JoinedError {
    errors: Vec<Error>,
}

impl JoinedError {
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    /// Adds an error, flattening nested joins so causes stay a single list.
    pub fn push(&mut self, err: Error) {
        match err {
            Error::Joined(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedError {}

impl FromIterator<Error> for JoinedError {
    fn from_iter<I: IntoIterator<Item = Error>>(iter: I) -> Self {
        let mut joined = JoinedError::default();
        for err in iter {
            joined.push(err);
        }
        joined
    }
}

/// Combines collected errors into one, `Ok(())` when nothing failed.
pub fn join_errors<I>(errors: I) -> Result<()>
where
    I: IntoIterator<Item = Error>,
{
    let joined: JoinedError = errors.into_iter().collect();
    if joined.is_empty() {
        Ok(())
    } else {
        Err(Error::Joined(joined))
    }
}
