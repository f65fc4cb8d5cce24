//! One-shot completion primitive for timeout-raced operations
//!
//! An IMAP session races a wall-clock timer: whichever of {success, error,
//! timeout} fires first commits the outcome, and later firings are no-ops.
//! The guard is an atomic compare-and-set in front of a oneshot channel, so
//! the invariant "exactly one response per request" holds under genuine
//! concurrency, not just by call-order convention.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::errors::{AppError, AppResult};

/// Single-commit slot for a request outcome
///
/// Cloneable via `Arc`; any number of tasks may race to [`commit`], but the
/// receiver observes at most one value.
///
/// [`commit`]: ResponseSlot::commit
pub struct ResponseSlot<T> {
    committed: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> ResponseSlot<T> {
    /// Create a slot and the receiver that observes the committed outcome
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            committed: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }

    /// Attempt to commit the outcome
    ///
    /// Returns `true` for the single winning call; every later call returns
    /// `false` and the value is dropped.
    pub fn commit(&self, value: T) -> bool {
        if self
            .committed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sender = self.sender.lock().ok().and_then(|mut guard| guard.take());
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

/// Run `work` under a wall-clock budget, resolving exactly once
///
/// Spawns the work and a timer as independent tasks racing for the same
/// [`ResponseSlot`]. If the timer wins, the pending work is aborted (the
/// session's connection is dropped, forcibly closing it) and a `Timeout`
/// error is returned.
pub async fn run_with_budget<T, F>(budget: Duration, label: &str, work: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let (slot, rx) = ResponseSlot::channel();

    let worker = tokio::spawn({
        let slot = Arc::clone(&slot);
        async move {
            let outcome = work.await;
            slot.commit(outcome);
        }
    });

    let timer = tokio::spawn({
        let slot = Arc::clone(&slot);
        let label = label.to_owned();
        async move {
            sleep(budget).await;
            let fired = slot.commit(Err(AppError::Timeout(format!(
                "{label} did not complete within {}s",
                budget.as_secs()
            ))));
            if fired {
                tracing::warn!(operation = %label, budget_secs = budget.as_secs(), "operation timed out");
            }
        }
    });

    let outcome = rx
        .await
        .map_err(|_| AppError::Internal("completion channel closed without an outcome".to_owned()));
    worker.abort();
    timer.abort();
    outcome?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_commit_wins() {
        let (slot, mut rx) = ResponseSlot::channel();
        assert!(slot.commit(1));
        assert!(!slot.commit(2));
        assert!(!slot.commit(3));
        assert_eq!(rx.try_recv().expect("value must be present"), 1);
    }

    #[tokio::test]
    async fn work_finishing_first_returns_its_result() {
        let result = run_with_budget(Duration::from_secs(5), "fast op", async { Ok(42) }).await;
        assert_eq!(result.expect("must succeed"), 42);
    }

    #[tokio::test]
    async fn budget_expiry_yields_exactly_one_timeout_error() {
        let result: AppResult<()> =
            run_with_budget(Duration::from_millis(10), "hung session", async {
                sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        let err = result.expect_err("must time out");
        assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn work_error_is_propagated_before_budget() {
        let result: AppResult<()> =
            run_with_budget(Duration::from_secs(5), "failing op", async {
                Err(AppError::Upstream("server said no".to_owned()))
            })
            .await;
        let err = result.expect_err("must fail");
        assert!(matches!(err, AppError::Upstream(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn racing_commits_deliver_a_single_value() {
        let (slot, rx) = ResponseSlot::channel();
        let mut handles = Vec::new();
        for i in 0..8 {
            let slot = Arc::clone(&slot);
            handles.push(tokio::spawn(async move { slot.commit(i) }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.expect("task must not panic") {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        rx.await.expect("exactly one value must arrive");
    }
}
