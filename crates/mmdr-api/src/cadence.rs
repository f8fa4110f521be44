//! Quiescence + minimum-interval coalescing.
//!
//! A [`Coalescer`] holds at most one pending value. The first submission
//! after a hand-off opens a window of `min_interval`; the value is handed
//! to the handler when that window closes and submissions have also been
//! quiet for `settle`. Newer submissions replace the pending one, so any
//! burst shorter than `min_interval` collapses into a single call carrying
//! the latest value. Handler calls never overlap, and consecutive calls
//! start at least `min_interval` apart.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Timing policy for a [`Coalescer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadencePolicy {
    pub settle: Duration,
    pub min_interval: Duration,
}

impl CadencePolicy {
    pub fn new(settle: Duration, min_interval: Duration) -> Self {
        Self {
            settle,
            min_interval,
        }
    }
}

/// Handle for submitting values. Dropping it stops the flush loop; a value
/// still pending at that point is discarded.
pub struct Coalescer<T> {
    pending: watch::Sender<Option<T>>,
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start the flush loop.
    pub fn spawn<F, Fut>(policy: CadencePolicy, handler: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (pending, rx) = watch::channel(None);
        let task = tokio::spawn(run(policy, rx, handler));
        (Self { pending }, task)
    }

    /// Replace the pending value.
    pub fn submit(&self, value: T) {
        self.pending.send_replace(Some(value));
    }
}

async fn run<T, F, Fut>(policy: CadencePolicy, mut rx: watch::Receiver<Option<T>>, mut handler: F)
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        if rx.changed().await.is_err() {
            return;
        }

        let opened = Instant::now();
        let mut last_change = opened;
        loop {
            let deadline = (opened + policy.min_interval).max(last_change + policy.settle);
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    last_change = Instant::now();
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let value = rx.borrow_and_update().clone();
        if let Some(value) = value {
            handler(value).await;
        }
    }
}
