//! Task queue implementation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::TaskQueueConfig;
use crate::domain::{JobId, TaskHandle};
use crate::pipeline::{PipelineExecutor, RunOutcome};

/// A dispatched task that is queued or running.
struct TaskEntry {
    job_id: JobId,
    cancel: CancellationToken,
}

struct PendingTask {
    handle: TaskHandle,
    job_id: JobId,
}

/// How a worker's run of one task ended.
enum TaskEnd {
    Finished(crate::Result<RunOutcome>),
    Canceled,
    TimedOut,
    Shutdown,
}

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskQueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub running: usize,
    pub completed: u64,
    pub timed_out: u64,
}

struct Shared {
    config: TaskQueueConfig,
    executor: Arc<PipelineExecutor>,
    pending: Mutex<VecDeque<PendingTask>>,
    notify: Notify,
    registry: DashMap<TaskHandle, TaskEntry>,
    shutdown: CancellationToken,
    running: AtomicUsize,
    completed: AtomicU64,
    timed_out: AtomicU64,
}

/// Bounded pool of workers running [`PipelineExecutor`] invocations.
///
/// One dispatch is one execution attempt: failed runs are never retried.
/// A task leaves the in-flight registry only after its run has ended.
pub struct TaskQueue {
    shared: Arc<Shared>,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl TaskQueue {
    pub fn new(executor: Arc<PipelineExecutor>, config: TaskQueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                executor,
                pending: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                registry: DashMap::new(),
                shutdown: CancellationToken::new(),
                running: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
            }),
            workers: Mutex::new(Some(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.shared.config
    }

    /// Enqueue a run of `job_id` and return its handle without waiting.
    pub fn dispatch(&self, job_id: JobId) -> TaskHandle {
        let handle = TaskHandle::generate();
        self.shared.registry.insert(
            handle.clone(),
            TaskEntry {
                job_id,
                cancel: CancellationToken::new(),
            },
        );
        self.shared.pending.lock().push_back(PendingTask {
            handle: handle.clone(),
            job_id,
        });
        self.shared.notify.notify_one();
        debug!(job_id = %job_id, task_id = %handle, "Task dispatched");
        handle
    }

    /// Interrupt the execution behind `handle`.
    ///
    /// A queued task never starts; a running one is dropped, killing its
    /// child process. Returns `false` if the handle is unknown or the task
    /// already ended.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        match self.shared.registry.get(handle) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(job_id = %entry.job_id, task_id = %handle, "Task cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Whether `handle` is still queued or running.
    pub fn is_in_flight(&self, handle: &TaskHandle) -> bool {
        self.shared.registry.contains_key(handle)
    }

    pub fn stats(&self) -> TaskQueueStats {
        TaskQueueStats {
            pending: self.shared.pending.lock().len(),
            in_flight: self.shared.registry.len(),
            running: self.shared.running.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            timed_out: self.shared.timed_out.load(Ordering::SeqCst),
        }
    }

    /// Spawn the workers.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        let Some(join_set) = workers.as_mut() else {
            warn!("Task queue already stopped, not starting workers");
            return;
        };
        if !join_set.is_empty() {
            return;
        }

        info!(
            "Starting task queue with {} workers (soft limit {}s, hard limit {}s)",
            self.shared.config.workers,
            self.shared.config.soft_time_limit_secs,
            self.shared.config.hard_time_limit_secs
        );
        for worker_id in 0..self.shared.config.workers {
            let shared = Arc::clone(&self.shared);
            join_set.spawn(async move { shared.worker_loop(worker_id).await });
        }
    }

    /// Stop the workers and wait for them.
    ///
    /// Runs still in progress are dropped; their jobs stay `running` until
    /// startup recovery resolves them.
    pub async fn stop(&self) {
        info!("Stopping task queue");
        self.shared.shutdown.cancel();

        let join_set = { self.workers.lock().take() };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Task queue stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.is_cancelled()
    }
}

impl Shared {
    async fn worker_loop(&self, worker_id: usize) {
        debug!("Worker {} started", worker_id);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let (task, more) = {
                let mut pending = self.pending.lock();
                let task = pending.pop_front();
                (task, !pending.is_empty())
            };

            match task {
                Some(task) => {
                    // Pass the wakeup on so idle workers pick up the rest.
                    if more {
                        self.notify.notify_one();
                    }
                    self.execute(worker_id, task).await;
                }
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    }
                }
            }
        }

        debug!("Worker {} shutting down", worker_id);
    }

    async fn execute(&self, worker_id: usize, task: PendingTask) {
        let PendingTask { handle, job_id } = task;
        let Some(cancel) = self.registry.get(&handle).map(|e| e.cancel.clone()) else {
            return;
        };

        if cancel.is_cancelled() {
            info!(job_id = %job_id, task_id = %handle, "Task canceled before start");
            self.registry.remove(&handle);
            return;
        }

        debug!(job_id = %job_id, task_id = %handle, "Worker {} picked up task", worker_id);
        self.running.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let end = {
            let mut run = Box::pin(self.executor.run(&job_id));
            let soft = tokio::time::sleep(self.config.soft_time_limit());
            let hard = tokio::time::sleep(self.config.hard_time_limit());
            tokio::pin!(soft, hard);
            let mut soft_fired = false;

            loop {
                tokio::select! {
                    result = &mut run => break TaskEnd::Finished(result),
                    _ = cancel.cancelled() => break TaskEnd::Canceled,
                    _ = self.shutdown.cancelled() => break TaskEnd::Shutdown,
                    _ = &mut hard => break TaskEnd::TimedOut,
                    _ = &mut soft, if !soft_fired => {
                        soft_fired = true;
                        warn!(
                            job_id = %job_id,
                            task_id = %handle,
                            "Task exceeded soft time limit of {}s",
                            self.config.soft_time_limit_secs
                        );
                    }
                }
            }
            // The run future is dropped here, killing any child process.
        };

        let elapsed = started.elapsed().as_secs_f64();
        match end {
            TaskEnd::Finished(Ok(outcome)) => {
                info!(job_id = %job_id, task_id = %handle, outcome = %outcome, "Task finished in {:.1}s", elapsed);
            }
            TaskEnd::Finished(Err(e)) => {
                error!(job_id = %job_id, task_id = %handle, "Task errored after {:.1}s: {}", elapsed, e);
            }
            TaskEnd::Canceled => {
                info!(job_id = %job_id, task_id = %handle, "Task interrupted by cancellation after {:.1}s", elapsed);
            }
            TaskEnd::Shutdown => {
                warn!(job_id = %job_id, task_id = %handle, "Task interrupted by shutdown after {:.1}s", elapsed);
            }
            TaskEnd::TimedOut => {
                self.timed_out.fetch_add(1, Ordering::SeqCst);
                let message = format!(
                    "task exceeded hard time limit of {}s",
                    self.config.hard_time_limit_secs
                );
                error!(job_id = %job_id, task_id = %handle, "{}", message);
                if let Err(e) = self.executor.mark_failed(&job_id, &message).await {
                    error!(job_id = %job_id, "Failed to record timeout: {}", e);
                }
            }
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.registry.remove(&handle);
    }
}
