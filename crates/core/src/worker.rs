//! Workers and the bounded worker pool.

use crate::error::PoolError;
use crate::executor::TaskExecutor;
use crate::types::Task;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Runs tasks against a single executor and reports whether it is busy
pub struct Worker {
    id: String,
    executor: Arc<dyn TaskExecutor>,
    running: AtomicBool,
}

/// Clears the busy flag on every exit path, including a dropped future
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Worker {
    pub fn new(id: impl Into<String>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            id: id.into(),
            executor,
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if the worker is currently executing a task
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute a task and return it with its result.
    ///
    /// Executor errors are returned unchanged. A task the executor hands back
    /// without a terminal status is marked completed.
    pub async fn run(&self, mut task: Task, cancel: CancellationToken) -> anyhow::Result<Task> {
        self.running.store(true, Ordering::SeqCst);
        let _busy = BusyGuard(&self.running);

        tracing::debug!("Worker {} running task {} for node {}", self.id, task.id, task.node_id);
        task.mark_running();

        let mut task = self.executor.execute(task, cancel).await?;
        if !task.is_terminal() {
            let result = std::mem::take(&mut task.result);
            task.complete(result);
        }

        Ok(task)
    }
}

/// Decrements the in-flight counter when a submission ends
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounds the number of tasks executing at once.
///
/// The pool only limits concurrency: every submission gets its own logical
/// [`Worker`], and the executor is chosen per submission.
pub struct WorkerPool {
    size: usize,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    total_processed: AtomicU64,
}

impl WorkerPool {
    /// Create a pool that runs at most `size` tasks at once (minimum 1)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            in_flight: AtomicUsize::new(0),
            total_processed: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of free slots
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of tasks currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of submissions that finished successfully
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::SeqCst)
    }

    /// Run a task once a slot is free.
    ///
    /// Fails with [`PoolError::Cancelled`] if `cancel` fires before a slot is
    /// acquired. The slot is released when the submission ends, however it ends.
    pub async fn submit(
        &self,
        executor: Arc<dyn TaskExecutor>,
        task: Task,
        cancel: CancellationToken,
    ) -> Result<Task, PoolError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Submission of task {} cancelled while waiting", task.id);
                return Err(PoolError::Cancelled);
            }
            // The semaphore is never closed, so acquire only fails on shutdown
            permit = self.semaphore.acquire() => permit.map_err(|_| PoolError::Cancelled)?,
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlightGuard(&self.in_flight);

        let worker = Worker::new(format!("{}-worker", task.id), executor);
        let task = worker.run(task, cancel).await?;

        self.total_processed.fetch_add(1, Ordering::SeqCst);
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::executor_fn;
    use crate::types::{NodeId, Payload, TaskStatus};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::task::JoinSet;

    fn task(id: &str) -> Task {
        Task::new(NodeId::new(id), id, Payload::new())
    }

    /// Executor that blocks until notified
    fn gated(gate: Arc<Notify>) -> Arc<dyn TaskExecutor> {
        executor_fn(move |task, _cancel| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok::<_, anyhow::Error>(task)
            }
        })
    }

    /// Executor that records how many calls overlap
    #[derive(Default)]
    struct Tracking {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TaskExecutor for Tracking {
        async fn execute(&self, task: Task, _cancel: CancellationToken) -> anyhow::Result<Task> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(task)
        }
    }

    #[tokio::test]
    async fn test_worker_busy_while_running() {
        let gate = Arc::new(Notify::new());
        let worker = Arc::new(Worker::new("w1", gated(gate.clone())));
        assert_eq!(worker.id(), "w1");
        assert!(!worker.is_running());

        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(task("a"), CancellationToken::new()).await })
        };

        while !worker.is_running() {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let done = handle.await.unwrap().unwrap();
        assert!(!worker.is_running());
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_worker_clears_flag_on_error() {
        let worker = Worker::new(
            "w",
            executor_fn(|_task, _cancel| async move {
                Err::<Task, _>(anyhow::anyhow!("planner crashed"))
            }),
        );

        let err = worker.run(task("a"), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "planner crashed");
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_worker_clears_flag_when_dropped() {
        let worker = Worker::new(
            "w",
            executor_fn(|task, _cancel| async move {
                std::future::pending::<()>().await;
                Ok::<_, anyhow::Error>(task)
            }),
        );

        let outcome = tokio::time::timeout(
            Duration::from_millis(10),
            worker.run(task("a"), CancellationToken::new()),
        )
        .await;

        assert!(outcome.is_err());
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_worker_keeps_executor_status() {
        let worker = Worker::new(
            "w",
            executor_fn(|mut task, _cancel| async move {
                task.fail("partial answer");
                Ok::<_, anyhow::Error>(task)
            }),
        );

        let done = worker.run(task("a"), CancellationToken::new()).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("partial answer"));
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new(2));
        let tracking = Arc::new(Tracking::default());
        let executor: Arc<dyn TaskExecutor> = tracking.clone();

        let mut set = JoinSet::new();
        for i in 0..6 {
            let pool = pool.clone();
            let executor = executor.clone();
            set.spawn(async move {
                pool.submit(executor, task(&format!("t{i}")), CancellationToken::new())
                    .await
            });
        }

        let mut completed = 0;
        while let Some(joined) = set.join_next().await {
            joined.unwrap().unwrap();
            completed += 1;
        }

        assert_eq!(completed, 6);
        assert!(tracking.max.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.total_processed(), 6);
        assert_eq!(pool.available_slots(), 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_pool_cancelled_while_waiting() {
        let pool = Arc::new(WorkerPool::new(1));
        let gate = Arc::new(Notify::new());

        let holder = {
            let pool = pool.clone();
            let executor = gated(gate.clone());
            tokio::spawn(async move {
                pool.submit(executor, task("holder"), CancellationToken::new())
                    .await
            })
        };

        while pool.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.available_slots(), 0);

        let cancel = CancellationToken::new();
        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            let executor = gated(gate.clone());
            tokio::spawn(async move { pool.submit(executor, task("waiter"), cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::Cancelled)));

        gate.notify_one();
        holder.await.unwrap().unwrap();

        // The cancelled waiter never held a slot
        assert_eq!(pool.available_slots(), 1);
        let echo = executor_fn(|task, _cancel| async move { Ok::<_, anyhow::Error>(task) });
        let done = pool
            .submit(echo, task("after"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.node_id, NodeId::new("after"));
    }

    #[tokio::test]
    async fn test_pool_rejects_already_cancelled() {
        let pool = WorkerPool::new(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let echo = executor_fn(|task, _cancel| async move { Ok::<_, anyhow::Error>(task) });
        let result = pool.submit(echo, task("a"), cancel).await;

        assert!(matches!(result, Err(PoolError::Cancelled)));
        assert_eq!(pool.available_slots(), 3);
        assert_eq!(pool.total_processed(), 0);
    }

    #[tokio::test]
    async fn test_pool_passes_executor_error_through() {
        let pool = WorkerPool::new(1);
        let failing = executor_fn(|_task, _cancel| async move {
            Err::<Task, _>(anyhow::anyhow!("rate limited"))
        });

        let err = pool
            .submit(failing, task("a"), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PoolError::Execution(source) => assert_eq!(source.to_string(), "rate limited"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pool.available_slots(), 1);
        assert_eq!(pool.total_processed(), 0);
    }

    #[tokio::test]
    async fn test_pool_size_clamped() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);

        let mut payload = Payload::new();
        payload.insert("k".to_string(), json!(1));
        let echo = executor_fn(|mut task, _cancel| async move {
            let payload = task.payload.clone();
            task.complete(payload);
            Ok::<_, anyhow::Error>(task)
        });
        let done = pool
            .submit(echo, Task::new(NodeId::new("a"), "A", payload), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.result["k"], json!(1));
    }
}
