use std::time::{Duration, SystemTime};

use crate::{
    atomic::{AtomicCounter, AtomicTimeStamp, ZERO_TIME},
    error::{Error, Result},
};

/// Response-time and traffic figures of one session.
///
/// Fed by the connection layer from many concurrent requests. `first` keeps
/// the earliest send through a compare-and-swap, `last` follows the latest
/// receive with a plain read-compare-set where the last writer may win a race.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    first: AtomicTimeStamp,
    last: AtomicTimeStamp,
    sent: AtomicCounter,
    received: AtomicCounter,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `bytes` sent at `ts`.
    pub fn update_sent(&self, ts: SystemTime, bytes: i64) -> Result<()> {
        let bytes = non_negative(bytes)?;
        self.sent.add(bytes);
        self.first.set_if_older(ts)
    }

    /// Records `bytes` received at `ts`.
    pub fn update_received(&self, ts: SystemTime, bytes: i64) -> Result<()> {
        let bytes = non_negative(bytes)?;
        self.received.add(bytes);
        if ts > self.last.current() {
            self.last.set(ts);
        }
        Ok(())
    }

    /// Returns `(response_time, sent_bytes, received_bytes)`.
    ///
    /// Response time is zero until something was sent. While nothing has been
    /// received it is measured up to now, so an in-flight request keeps growing.
    pub fn metrics(&self) -> (Duration, u64, u64) {
        let sent = self.sent.current();
        let received = self.received.current();

        let first = self.first.current();
        if first == ZERO_TIME {
            return (Duration::ZERO, sent, received);
        }

        let last = match self.last.current() {
            ts if ts == ZERO_TIME => SystemTime::now(),
            ts => ts,
        };
        let response_time = last.duration_since(first).unwrap_or(Duration::ZERO);
        (response_time, sent, received)
    }

    pub fn reset(&self) {
        self.first.reset();
        self.last.reset();
        self.sent.reset();
        self.received.reset();
    }
}

fn non_negative(bytes: i64) -> Result<u64> {
    u64::try_from(bytes).map_err(|_| Error::NegativeBytes(bytes))
}
