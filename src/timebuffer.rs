use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    config::duration_str,
    error::{Error, Result},
    shutdown::CancelSignal,
};

/// How a user pauses between two iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBufferMode {
    /// Start the next iteration right away
    #[default]
    NoWait,
    /// Always pause `duration`
    Constant,
    /// Pause `duration` only after an iteration that had errors
    OnError,
    /// Pad the iteration so it lasts at least `duration` from its start mark
    MinDuration,
}

impl TimeBufferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoWait => "nowait",
            Self::Constant => "constant",
            Self::OnError => "onerror",
            Self::MinDuration => "minduration",
        }
    }
}

impl fmt::Display for TimeBufferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pacing applied after every iteration.
///
/// Each user thread works on its own copy, the duration start mark used by
/// [`TimeBufferMode::MinDuration`] is the only state that changes.
///
/// Every pause races the run's [`CancelSignal`] and returns `Ok(())` right
/// away when the run is cancelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeBuffer {
    #[serde(default)]
    pub mode: TimeBufferMode,
    #[serde(default, with = "duration_str")]
    pub duration: Duration,
    #[serde(skip)]
    duration_start: Option<Instant>,
}

impl TimeBuffer {
    pub fn new(mode: TimeBufferMode, duration: Duration) -> Self {
        Self {
            mode,
            duration,
            duration_start: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode != TimeBufferMode::NoWait && self.duration.is_zero() {
            return Err(Error::InvalidTimeBuffer {
                mode: self.mode.as_str(),
                duration: self.duration,
            });
        }
        Ok(())
    }

    /// Marks the start of the interval measured by `MinDuration`.
    pub fn set_duration_start(&mut self, start: Instant) {
        self.duration_start = Some(start);
    }

    /// Pauses according to the mode, `had_errors` tells whether the
    /// iteration that just finished failed.
    pub async fn wait(&self, signal: &CancelSignal, had_errors: bool) -> Result<()> {
        let pause = match self.mode {
            TimeBufferMode::NoWait => return Ok(()),
            TimeBufferMode::Constant => self.duration,
            TimeBufferMode::OnError if had_errors => self.duration,
            TimeBufferMode::OnError => return Ok(()),
            TimeBufferMode::MinDuration => self.remaining()?,
        };
        if pause.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = signal.cancelled() => {
                tracing::debug!(mode = %self.mode, "time buffer interrupted by cancellation");
            }
        }
        Ok(())
    }

    fn remaining(&self) -> Result<Duration> {
        let start = self.duration_start.ok_or(Error::DurationStartMissing)?;
        let now = Instant::now();
        if start > now {
            return Err(Error::DurationStartInFuture);
        }
        Ok(self.duration.saturating_sub(now - start))
    }
}
