//! Cooperative cancellation shared by the ramp-up, every user loop and every
//! pacing sleep.
//!
//! A [`Shutdown`] owns the `watch` channel, any number of [`CancelSignal`]s
//! observe it. Nothing is interrupted preemptively: tasks notice the signal at
//! their next check or while awaiting [`CancelSignal::cancelled`].
use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::watch::{Receiver, Sender, channel};

/// Function invoked to abort a whole run.
pub type CancelFn = Arc<dyn Fn() + Send + Sync>;

/// Owner side of a cancellation.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<Sender<bool>>,
    signal: CancelSignal,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = channel(false);
        Self {
            tx: Arc::new(tx),
            signal: CancelSignal {
                receivers: vec![rx],
            },
        }
    }

    /// Cancellation that also fires when `parent` does.
    pub fn child_of(parent: &CancelSignal) -> Self {
        let mut shutdown = Self::new();
        shutdown
            .signal
            .receivers
            .extend(parent.receivers.iter().cloned());
        shutdown
    }

    /// Cancels, returns `true` only for the call that flipped the state.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            let first = !*cancelled;
            *cancelled = true;
            first
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    /// The cancellation wrapped as a [`CancelFn`].
    pub fn cancel_fn(&self) -> CancelFn {
        let shutdown = self.clone();
        Arc::new(move || {
            shutdown.cancel();
        })
    }
}

/// Observer side of a cancellation.
///
/// Holds its own receiver first, followed by those of every ancestor.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    receivers: Vec<Receiver<bool>>,
}

impl CancelSignal {
    /// A signal nobody can ever cancel.
    pub fn never() -> Self {
        Shutdown::new().signal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.receivers.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once cancelled. An owner dropped without cancelling never
    /// resolves its part of the signal.
    pub async fn cancelled(&self) {
        let waits = self.receivers.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    futures::future::pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }
}
