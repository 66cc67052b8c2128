// SPDX-License-Identifier: AGPL-3.0-or-later

//! FIFO async mutual-exclusion queue.
//!
//! The only mutual-exclusion mechanism in the relay subsystem: tasks pushed
//! onto one executor run strictly in submission order, one at a time, on a
//! single worker loop. A task's failure is delivered to its own caller and
//! never blocks later tasks. `AccountRelayer` and `RelayedSigner` share one
//! executor so account setup and transaction sends are totally ordered.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

use crate::error::RelayerError;

type QueuedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handle to a pushed task; resolves with the task's output once the worker
/// has run it, or with [`RelayerError::ExecutorClosed`] if the worker is gone.
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, RelayerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|res| res.map_err(|_| RelayerError::ExecutorClosed))
    }
}

/// Serial task queue drained by a single spawned worker.
///
/// Cloning is cheap and clones share the same queue. Dropping every clone
/// closes the queue; tasks already pushed still run to completion.
#[derive(Clone)]
pub struct SerialExecutor {
    queue: mpsc::UnboundedSender<QueuedTask>,
}

impl SerialExecutor {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (queue, mut tasks) = mpsc::unbounded_channel::<QueuedTask>();

        tokio::spawn(async move {
            while let Some(task) = tasks.recv().await {
                task.await;
            }
            tracing::debug!(queue = %label, "serial executor drained and closed");
        });

        Self { queue }
    }

    /// Enqueue `task`. The queue position is taken synchronously, so two
    /// `push` calls made in sequence are guaranteed to execute in that order
    /// no matter when (or whether) their handles are awaited.
    pub fn push<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done, receiver) = oneshot::channel();
        let queued: QueuedTask = Box::pin(async move {
            // The caller may have dropped its handle; the result is discarded.
            let _ = done.send(task.await);
        });

        if self.queue.send(queued).is_err() {
            tracing::warn!("task pushed onto a closed serial executor");
        }

        TaskHandle { receiver }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let executor = SerialExecutor::new("order");
        let seen = Arc::new(Mutex::new(Vec::new()));

        // The first task sleeps; if ordering were not enforced the second
        // would finish first.
        let slow = {
            let seen = seen.clone();
            executor.push(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                seen.lock().unwrap().push(1);
            })
        };
        let fast = {
            let seen = seen.clone();
            executor.push(async move {
                seen.lock().unwrap().push(2);
            })
        };

        let (a, b) = tokio::join!(slow, fast);
        a.unwrap();
        b.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn at_most_one_task_runs_at_a_time() {
        let executor = SerialExecutor::new("exclusive");
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                executor.push(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_failing_task_does_not_block_later_tasks() {
        let executor = SerialExecutor::new("isolated");

        let failing = executor.push(async { Err::<(), &str>("boom") });
        let following = executor.push(async { 7u32 });

        assert_eq!(failing.await.unwrap(), Err("boom"));
        assert_eq!(following.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn results_reach_only_their_own_caller() {
        let executor = SerialExecutor::new("results");

        let first = executor.push(async { "first" });
        let second = executor.push(async { "second" });

        assert_eq!(second.await.unwrap(), "second");
        assert_eq!(first.await.unwrap(), "first");
    }
}
