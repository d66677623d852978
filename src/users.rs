//! Built-in [`UserSource`]s.
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::{
    counters::ExecutionCounters,
    scenario::{User, UserSource},
};

/// Generates `{prefix}_{n}`, counting with the shared `users` counter.
///
/// With `count` set, `n` wraps around and cycles through `1..=count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircularUsers {
    pub prefix: String,
    #[serde(default)]
    pub count: Option<u64>,
}

impl CircularUsers {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            count: None,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count).filter(|c| *c > 0);
        self
    }
}

impl UserSource for CircularUsers {
    fn next(&self, counters: &ExecutionCounters) -> User {
        let n = counters.users.inc();
        let n = match self.count {
            Some(count) => (n - 1) % count + 1,
            None => n,
        };
        User::new(format!("{}_{n}", self.prefix))
    }
}

/// Cycles through a fixed list of users.
#[derive(Debug)]
pub struct UserList {
    users: Vec<User>,
    next: AtomicUsize,
}

impl UserList {
    /// `None` for an empty list.
    pub fn new(users: Vec<User>) -> Option<Self> {
        if users.is_empty() {
            return None;
        }
        Some(Self {
            users,
            next: AtomicUsize::new(0),
        })
    }
}

impl UserSource for UserList {
    fn next(&self, counters: &ExecutionCounters) -> User {
        counters.users.inc();
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.users.len();
        self.users[idx].clone()
    }
}

/// Every session runs as the same user.
#[derive(Debug, Clone)]
pub struct FixedUser(pub User);

impl UserSource for FixedUser {
    fn next(&self, counters: &ExecutionCounters) -> User {
        counters.users.inc();
        self.0.clone()
    }
}
