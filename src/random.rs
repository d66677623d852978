//! Deterministic, seeded random draws.
//!
//! Every simulated user owns exactly one [`Randomizer`]. Seeding it from
//! [`predictable_seed`] with the runner instance and session number makes a
//! user's choices reproducible across distributed runner instances and across
//! runs, which is what allows two runs to be compared for regressions, while
//! different `(instance, session)` pairs still get unrelated streams.
//!
//! The underlying uniform generator is ChaCha8: portable and stable for a
//! given seed.

use std::{
    fmt::Display,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::RandomError;

type Result<T> = std::result::Result<T, RandomError>;

const INSTANCE_SCALE: u64 = 10_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Derives a reproducible seed from a runner instance and a session number.
///
/// Negative inputs are negated. The instance is reduced so that scaling it by
/// 10000 cannot overflow, the session is reduced so the addition cannot
/// overflow, and the sum is reduced into the positive signed range. Adjacent
/// seeds are spread by the generator's own seed expansion.
pub fn predictable_seed(instance: i64, session: i64) -> i64 {
    let instance = instance.unsigned_abs() % (u64::MAX / INSTANCE_SCALE);
    let scaled = instance * INSTANCE_SCALE;
    let session = session.unsigned_abs() % (u64::MAX - scaled);
    let reduced = (scaled + session) % (u64::MAX / 2);

    // below i64::MAX after the last reduction
    reduced as i64
}

/// An item that can take part in a weighted draw.
pub trait Weighted {
    type Key;

    fn key(&self) -> Self::Key;
    fn weight(&self) -> i64;
}

/// Seeded draw engine owned by a single user.
///
/// A default constructed `Randomizer` has no generator yet and every draw
/// fails with [`RandomError::Uninitialized`] until it is seeded.
#[derive(Debug, Clone, Default)]
pub struct Randomizer {
    rng: Option<ChaCha8Rng>,
    seed: i64,
}

impl Randomizer {
    /// Seeded from the wall clock, for runs that do not need to be reproduced.
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self::with_seed(nanos as i64)
    }

    pub fn with_seed(seed: i64) -> Self {
        Self {
            rng: Some(ChaCha8Rng::seed_from_u64(seed as u64)),
            seed,
        }
    }

    /// Restarts the generator from `seed`.
    pub fn reseed(&mut self, seed: i64) {
        *self = Self::with_seed(seed);
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }

    fn rng(&mut self) -> Result<&mut ChaCha8Rng> {
        self.rng.as_mut().ok_or(RandomError::Uninitialized)
    }

    /// Index in `0..len`.
    fn index(&mut self, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(RandomError::EmptyList);
        }
        Ok(self.rng()?.gen_range(0..len))
    }

    /// Draw in `[0, bound)`, shared by both weighted selections so they agree
    /// for the same seed.
    fn draw_below(&mut self, bound: u128) -> Result<u128> {
        Ok(self.rng()?.gen_range(0..bound))
    }

    /// Uniformly picks one element, works for strings, integers and chars alike.
    pub fn pick<T: Clone>(&mut self, items: &[T]) -> Result<T> {
        let idx = self.index(items.len())?;
        Ok(items[idx].clone())
    }

    /// Uniformly picks one element and returns it together with its position.
    pub fn pick_with_index<T: Clone>(&mut self, items: &[T]) -> Result<(usize, T)> {
        let idx = self.index(items.len())?;
        Ok((idx, items[idx].clone()))
    }

    /// Integer in `[min, max]`.
    pub fn rand_range(&mut self, min: i64, max: i64) -> Result<i64> {
        if min > max {
            return Err(invalid_range(min, max));
        }
        Ok(self.rng()?.gen_range(min..=max))
    }

    /// Duration in `[min, max]`, equal bounds return the bound without a draw.
    pub fn rand_duration(&mut self, min: Duration, max: Duration) -> Result<Duration> {
        if min > max {
            return Err(invalid_range(format!("{min:?}"), format!("{max:?}")));
        }
        if min == max {
            return Ok(min);
        }
        let nanos = self.rng()?.gen_range(min.as_nanos()..=max.as_nanos());
        let secs = u64::try_from(nanos / NANOS_PER_SEC)
            .map_err(|_| invalid_range(format!("{min:?}"), format!("{max:?}")))?;
        let subsec = u32::try_from(nanos % NANOS_PER_SEC)
            .map_err(|_| invalid_range(format!("{min:?}"), format!("{max:?}")))?;
        Ok(Duration::new(secs, subsec))
    }

    /// Index of the bucket a draw in `[0, sum)` falls into, scanning the
    /// cumulative weights left to right.
    ///
    /// The scan order is part of the reproducibility contract: reordering the
    /// weights changes which index a given seed selects.
    pub fn weighted_index(&mut self, weights: &[u64]) -> Result<usize> {
        if weights.is_empty() {
            return Err(RandomError::EmptyList);
        }
        let sum: u128 = weights.iter().map(|&w| u128::from(w)).sum();
        if sum == 0 {
            return Err(RandomError::WeightSum(0));
        }

        let draw = self.draw_below(sum)?;
        let mut cumulative = 0u128;
        for (i, &weight) in weights.iter().enumerate() {
            cumulative += u128::from(weight);
            if draw < cumulative {
                return Ok(i);
            }
        }
        // unreachable while draw < sum
        Ok(weights.len() - 1)
    }

    /// Weighted draw over items exposing a key and a weight, returns the key
    /// of the selected item.
    pub fn weighted_key<W: Weighted>(&mut self, items: &[W]) -> Result<W::Key> {
        if items.is_empty() {
            return Err(RandomError::EmptyList);
        }
        let sum: i128 = items.iter().map(|item| i128::from(item.weight())).sum();
        if sum <= 0 {
            return Err(RandomError::WeightSum(sum));
        }

        let draw = self.draw_below(sum as u128)?;
        let mut cumulative = 0i128;
        for item in items {
            cumulative += i128::from(item.weight());
            if (draw as i128) < cumulative {
                return Ok(item.key());
            }
        }
        Err(RandomError::WeightSum(sum))
    }

    /// `len` random bytes.
    pub fn rand_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.rng()?
            .try_fill_bytes(&mut buf)
            .map_err(|_| RandomError::ShortRead {
                wanted: len,
                got: 0,
            })?;
        Ok(buf)
    }
}

fn invalid_range(min: impl Display, max: impl Display) -> RandomError {
    RandomError::InvalidRange {
        min: min.to_string(),
        max: max.to_string(),
    }
}
