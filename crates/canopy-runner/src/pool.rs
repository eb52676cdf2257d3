//! A fixed-size worker pool with a single blocking gather.
//!
//! All tasks of a batch are submitted at once. Workers pull descriptors
//! from a shared queue and send back one textual payload each; the
//! [`BatchHandle::gather`] barrier waits until every descriptor has a
//! [`TaskOutcome`].
//!
//! Tasks are stopped cooperatively: each receives a [`TaskContext`] carrying
//! the batch [`CancelToken`] and its own deadline. A task that ignores both
//! is abandoned and its worker thread is left to finish on its own:
//!
//! - past its deadline plus [`ABANDON_GRACE`], the task is reported timed
//!   out and a replacement worker joins the queue, so tasks waiting behind
//!   it still run;
//! - once the batch has been cancelled for [`ABANDON_GRACE`], every task
//!   without an outcome, running or still queued, is reported cancelled.

use canopy_common::{CancelToken, TaskContext};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long `gather` keeps waiting for a task past its deadline or past
/// batch cancellation.
pub const ABANDON_GRACE: Duration = Duration::from_millis(500);

/// How often `gather` re-checks deadlines while no result arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a submitted task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task returned its payload.
    Finished(String),
    /// The task ran past its deadline and was abandoned.
    TimedOut,
    /// The batch was cancelled before the task started, or while it ran
    /// and it did not stop in time.
    Cancelled,
    /// The task panicked.
    Panicked(String),
}

/// Runs batches of tasks on a fixed number of threads.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    task_timeout: Option<Duration>,
    cancel: CancelToken,
}

impl WorkerPool {
    /// A pool of `workers` threads (at least one), no timeout.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            task_timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Limit the wall-clock time of every task.
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Start running `task` once per descriptor.
    ///
    /// Returns as soon as the workers are spawned; call
    /// [`BatchHandle::gather`] to wait for the results.
    pub fn submit<T, F>(&self, task: F, descriptors: Vec<T>) -> io::Result<BatchHandle<T>>
    where
        T: Clone + Send + 'static,
        F: Fn(&T, &TaskContext) -> String + Send + Sync + 'static,
    {
        let count = descriptors.len();
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        for job in descriptors.iter().cloned().enumerate() {
            // The receiver is alive: it is owned right here.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let mut crew = Crew {
            template: Worker {
                jobs: job_rx,
                results: result_tx,
                started: Arc::new(Mutex::new(vec![None; count])),
                cancel: self.cancel.clone(),
                timeout: self.task_timeout,
                task: Arc::new(task),
            },
            spawned: 0,
        };
        for _ in 0..self.workers.min(count) {
            crew.spawn()?;
        }
        tracing::debug!(tasks = count, workers = crew.spawned, "Batch submitted");

        Ok(BatchHandle {
            descriptors,
            results: result_rx,
            crew,
            cancel: self.cancel.clone(),
            timeout: self.task_timeout,
        })
    }
}

type TaskFn<T> = dyn Fn(&T, &TaskContext) -> String + Send + Sync;

struct Worker<T> {
    jobs: Receiver<(usize, T)>,
    results: Sender<(usize, TaskOutcome)>,
    started: Arc<Mutex<Vec<Option<Instant>>>>,
    cancel: CancelToken,
    timeout: Option<Duration>,
    task: Arc<TaskFn<T>>,
}

impl<T> Clone for Worker<T> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            results: self.results.clone(),
            started: Arc::clone(&self.started),
            cancel: self.cancel.clone(),
            timeout: self.timeout,
            task: Arc::clone(&self.task),
        }
    }
}

impl<T> Worker<T> {
    fn run(self) {
        let task = self.task.as_ref();
        while let Ok((index, descriptor)) = self.jobs.recv() {
            let outcome = if self.cancel.is_cancelled() {
                TaskOutcome::Cancelled
            } else {
                let now = Instant::now();
                self.started.lock()[index] = Some(now);
                let ctx = TaskContext::new(self.cancel.clone(), self.timeout.map(|t| now + t));
                match panic::catch_unwind(AssertUnwindSafe(|| task(&descriptor, &ctx))) {
                    Ok(payload) => TaskOutcome::Finished(payload),
                    Err(cause) => TaskOutcome::Panicked(panic_message(cause.as_ref())),
                }
            };
            if self.results.send((index, outcome)).is_err() {
                // The handle was dropped: nobody wants further results.
                break;
            }
        }
    }
}

/// Spawns workers that all pull from the batch queue.
struct Crew<T> {
    template: Worker<T>,
    spawned: usize,
}

impl<T: Send + 'static> Crew<T> {
    fn spawn(&mut self) -> io::Result<()> {
        let worker = self.template.clone();
        thread::Builder::new()
            .name(format!("canopy-worker-{}", self.spawned))
            .spawn(move || worker.run())?;
        self.spawned += 1;
        Ok(())
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Results of a submitted batch, not yet gathered.
pub struct BatchHandle<T> {
    descriptors: Vec<T>,
    results: Receiver<(usize, TaskOutcome)>,
    crew: Crew<T>,
    cancel: CancelToken,
    timeout: Option<Duration>,
}

impl<T> std::fmt::Debug for BatchHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("tasks", &self.descriptors.len())
            .field("workers", &self.crew.spawned)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Send + 'static> BatchHandle<T> {
    /// Number of submitted tasks.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Block until every task has an outcome.
    ///
    /// Results come back in submission order.
    pub fn gather(mut self) -> Vec<(T, TaskOutcome)> {
        let count = self.descriptors.len();
        let mut outcomes: Vec<Option<TaskOutcome>> = vec![None; count];
        let mut pending = count;
        let mut cancelled_at: Option<Instant> = None;

        while pending > 0 {
            match self.results.recv_timeout(POLL_INTERVAL) {
                Ok((index, outcome)) => {
                    if outcomes[index].is_none() {
                        outcomes[index] = Some(outcome);
                        pending -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if self.cancel.is_cancelled() {
                cancelled_at.get_or_insert(now);
            }
            let cancel_expired = cancelled_at.is_some_and(|at| now >= at + ABANDON_GRACE);
            let mut overdue_tasks = 0;
            {
                let started = self.crew.template.started.lock();
                for (index, slot) in outcomes.iter_mut().enumerate() {
                    if slot.is_some() {
                        continue;
                    }
                    let overdue = match (started[index], self.timeout) {
                        (Some(start), Some(timeout)) => now >= start + timeout + ABANDON_GRACE,
                        _ => false,
                    };
                    if overdue {
                        tracing::warn!(task = index, "Abandoning task past its deadline");
                        *slot = Some(TaskOutcome::TimedOut);
                        overdue_tasks += 1;
                    } else if cancel_expired {
                        if started[index].is_some() {
                            tracing::warn!(task = index, "Abandoning task after cancellation");
                        }
                        *slot = Some(TaskOutcome::Cancelled);
                    } else {
                        continue;
                    }
                    pending -= 1;
                }
            }

            // Each abandoned task still holds its worker thread.
            if pending > 0 && cancelled_at.is_none() {
                for _ in 0..overdue_tasks {
                    if let Err(e) = self.crew.spawn() {
                        tracing::error!(error = %e, "Failed to spawn replacement worker");
                    }
                }
            }
        }

        self.descriptors
            .into_iter()
            .zip(outcomes)
            .map(|(descriptor, outcome)| (descriptor, outcome.unwrap_or(TaskOutcome::Cancelled)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_task_runs_once_in_order() {
        let pool = WorkerPool::new(3);
        let handle = pool
            .submit(|n: &u32, _ctx: &TaskContext| (n * 10).to_string(), (0..8).collect())
            .unwrap();
        assert_eq!(handle.len(), 8);
        let results = handle.gather();
        let order: Vec<u32> = results.iter().map(|(n, _)| *n).collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        for (n, outcome) in results {
            assert_eq!(outcome, TaskOutcome::Finished((n * 10).to_string()));
        }
    }

    #[test]
    fn test_empty_batch() {
        let handle = WorkerPool::new(2)
            .submit(|_: &u32, _: &TaskContext| String::new(), Vec::new())
            .unwrap();
        assert!(handle.is_empty());
        assert!(handle.gather().is_empty());
    }

    #[test]
    fn test_panic_is_isolated() {
        let results = WorkerPool::new(2)
            .submit(
                |n: &u32, _: &TaskContext| {
                    if *n == 1 {
                        panic!("bad tile");
                    }
                    "ok".to_string()
                },
                vec![0, 1, 2],
            )
            .unwrap()
            .gather();
        assert_eq!(results[0].1, TaskOutcome::Finished("ok".into()));
        assert_eq!(results[1].1, TaskOutcome::Panicked("bad tile".into()));
        assert_eq!(results[2].1, TaskOutcome::Finished("ok".into()));
    }

    #[test]
    fn test_unresponsive_task_times_out() {
        let results = WorkerPool::new(2)
            .with_task_timeout(Some(Duration::from_millis(50)))
            .submit(
                |n: &u32, _: &TaskContext| {
                    if *n == 0 {
                        thread::sleep(Duration::from_secs(5));
                    }
                    "done".to_string()
                },
                vec![0, 1],
            )
            .unwrap()
            .gather();
        assert_eq!(results[0].1, TaskOutcome::TimedOut);
        assert_eq!(results[1].1, TaskOutcome::Finished("done".into()));
    }

    #[test]
    fn test_overdue_task_does_not_block_the_queue() {
        let started = Instant::now();
        let results = WorkerPool::new(1)
            .with_task_timeout(Some(Duration::from_millis(50)))
            .submit(
                |n: &u32, _: &TaskContext| {
                    if *n == 0 {
                        thread::sleep(Duration::from_secs(5));
                    }
                    format!("done {n}")
                },
                vec![0, 1, 2],
            )
            .unwrap()
            .gather();
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert_eq!(results[0].1, TaskOutcome::TimedOut);
        assert_eq!(results[1].1, TaskOutcome::Finished("done 1".into()));
        assert_eq!(results[2].1, TaskOutcome::Finished("done 2".into()));
    }

    #[test]
    fn test_cancel_resolves_tasks_queued_behind_a_stuck_worker() {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = WorkerPool::new(1)
            .with_cancel_token(cancel)
            .submit(
                |n: &u32, _: &TaskContext| {
                    if *n == 0 {
                        thread::sleep(Duration::from_secs(4));
                    }
                    "done".to_string()
                },
                vec![0, 1],
            )
            .unwrap();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            token.cancel();
        });

        let started = Instant::now();
        let results = handle.gather();
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert_eq!(results[0].1, TaskOutcome::Cancelled);
        assert_eq!(results[1].1, TaskOutcome::Cancelled);
    }

    #[test]
    fn test_cooperative_task_sees_deadline() {
        let results = WorkerPool::new(1)
            .with_task_timeout(Some(Duration::from_millis(30)))
            .submit(
                |_: &u32, ctx: &TaskContext| loop {
                    if let Err(why) = ctx.check() {
                        return why.to_string();
                    }
                    thread::sleep(Duration::from_millis(5));
                },
                vec![0],
            )
            .unwrap()
            .gather();
        assert_eq!(results[0].1, TaskOutcome::Finished("deadline exceeded".into()));
    }

    #[test]
    fn test_cancelled_batch_skips_pending_tasks() {
        let cancel = CancelToken::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let token = cancel.clone();
        let results = WorkerPool::new(1)
            .with_cancel_token(cancel)
            .submit(
                move |_: &u32, ctx: &TaskContext| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    token.cancel();
                    assert!(ctx.check().is_err());
                    "first".to_string()
                },
                vec![0, 1, 2],
            )
            .unwrap()
            .gather();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(results[0].1, TaskOutcome::Finished("first".into()));
        assert_eq!(results[1].1, TaskOutcome::Cancelled);
        assert_eq!(results[2].1, TaskOutcome::Cancelled);
    }
}
