//! Lock-free registers shared by concurrently running users.
//!
//! Both primitives are safe under any number of concurrent callers and never
//! take a lock, they sit on the hot path of every request a simulated user
//! makes.
pub mod counter;
pub mod timestamp;

pub use counter::AtomicCounter;
pub use timestamp::{AtomicTimeStamp, DEFAULT_MAX_ATTEMPTS, ZERO_TIME};
