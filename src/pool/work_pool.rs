use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::error::PoolError;
use super::handler::Handler;
use crate::core::stream::{SharedWriter, named_channel};
use crate::core::{CloseReason, Halt, StageFailure, Stream, StreamWriter, Token};

/// Lifecycle of a [`WorkPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoolState {
    /// Constructed, no workers running
    Created,
    /// Workers spawned, no job submitted yet
    Started,
    /// At least one job has been submitted
    Accepting,
    /// The jobs stream is closed; workers are finishing the remaining jobs
    Closing,
    /// Every worker has exited and the results stream is closed
    Drained,
}

/// Per-worker counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub processed: u64,
}

/// Long-lived pool of workers fed by explicit [`submit`](Self::submit) calls
///
/// Every job submitted before [`close`](Self::close) is processed exactly
/// once unless the token is cancelled, in which case in-flight jobs may be
/// abandoned. Results arrive on the stream returned by [`start`](Self::start)
/// in completion order; callers must keep reading it while submitting or
/// workers will stall on delivering results. Dropping the results stream
/// stops the workers, after which submits fail with `Closed`.
///
/// `submit` and `close` take `&self`, so an `Arc<WorkPool>` can be shared by
/// several submitting tasks and closed from any of them.
pub struct WorkPool<J, R> {
    workers: usize,
    capacity: usize,
    jobs: StdMutex<Option<StreamWriter<J>>>,
    token: Token,
    state: Arc<watch::Sender<PoolState>>,
    stats: Arc<DashMap<usize, WorkerStats>>,
    _results: PhantomData<fn() -> R>,
}

impl<J, R> WorkPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Create a pool of `workers` (at least one) whose jobs queue holds `capacity` jobs
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (state, _) = watch::channel(PoolState::Created);
        Self {
            workers: workers.max(1),
            capacity: capacity.max(1),
            jobs: StdMutex::new(None),
            token: Token::new(),
            state: Arc::new(state),
            stats: Arc::new(DashMap::new()),
            _results: PhantomData,
        }
    }

    /// Spawn the workers and return the results stream
    pub fn start<H>(&mut self, token: &Token, handler: H) -> Result<Stream<R>, PoolError>
    where
        H: Handler<J, R>,
    {
        if self.state() != PoolState::Created {
            return Err(PoolError::AlreadyStarted);
        }

        let (jobs_out, jobs_in) = named_channel("work_pool", self.capacity);
        let (results_out, results) = named_channel("work_pool", self.capacity);
        let jobs_in = Arc::new(Mutex::new(jobs_in));
        let handler = Arc::new(handler);

        // Publish Started before any worker can exit, so the barrier's Drained is always the last write
        *self.jobs_slot() = Some(jobs_out);
        self.token = token.clone();
        self.state.send_replace(PoolState::Started);

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            self.stats.insert(worker_id, WorkerStats { worker_id, processed: 0 });
            let worker = PoolWorker {
                worker_id,
                jobs: Arc::clone(&jobs_in),
                results: results_out.share(),
                token: token.clone(),
                handler: Arc::clone(&handler),
                stats: Arc::clone(&self.stats),
            };
            workers.spawn(worker.run());
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut reason = CloseReason::Exhausted;
            while let Some(joined) = workers.join_next().await {
                let worker_reason = match joined {
                    Ok(halt) => halt.into_reason(),
                    Err(e) => CloseReason::Failed(StageFailure::new("work_pool", e.to_string())),
                };
                reason = reason.merge(worker_reason);
            }
            debug!(stage = "work_pool", ?reason, "All workers exited");
            results_out.close_with(reason);
            state.send_replace(PoolState::Drained);
        });

        debug!(stage = "work_pool", workers = self.workers, "Work pool started");

        Ok(results)
    }

    /// Queue a job, waiting for room in the jobs queue
    ///
    /// Fails with `Cancelled` if the token fires while waiting.
    pub async fn submit(&self, job: J) -> Result<(), PoolError> {
        let jobs = {
            let slot = self.jobs_slot();
            match (self.state(), slot.as_ref()) {
                (PoolState::Created, _) => return Err(PoolError::NotStarted),
                (PoolState::Started | PoolState::Accepting, Some(jobs)) => jobs.share(),
                _ => return Err(PoolError::Closed),
            }
        };

        jobs.send(&self.token, job).await.map_err(|halt| match halt {
            Halt::Cancelled => PoolError::Cancelled,
            _ => PoolError::Closed,
        })?;

        self.state.send_if_modified(|state| {
            let first = *state == PoolState::Started;
            if first {
                *state = PoolState::Accepting;
            }
            first
        });
        Ok(())
    }

    /// Stop accepting jobs; workers finish what is already queued
    ///
    /// A submit already waiting for room when the pool closes still delivers its job.
    pub fn close(&self) {
        let jobs = self.jobs_slot().take();
        if let Some(jobs) = jobs {
            jobs.close();
            self.state.send_if_modified(|state| {
                let open = matches!(state, PoolState::Started | PoolState::Accepting);
                if open {
                    *state = PoolState::Closing;
                }
                open
            });
            debug!(stage = "work_pool", "Work pool closed to new jobs");
        }
    }

    fn jobs_slot(&self) -> MutexGuard<'_, Option<StreamWriter<J>>> {
        // The guarded section never panics, so a poisoned lock still holds a consistent value
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    /// Jobs processed by each worker, ordered by worker id
    pub fn stats(&self) -> Vec<WorkerStats> {
        let mut stats: Vec<WorkerStats> = self.stats.iter().map(|entry| entry.value().clone()).collect();
        stats.sort_by_key(|s| s.worker_id);
        stats
    }

    /// Wait until every worker has exited
    pub async fn wait(&self) -> Result<(), PoolError> {
        if self.state() == PoolState::Created {
            return Err(PoolError::NotStarted);
        }
        let mut state = self.state.subscribe();
        state
            .wait_for(|s| *s == PoolState::Drained)
            .await
            .map(|_| ())
            .map_err(|_| PoolError::Closed)
    }
}

impl<J, R> Drop for WorkPool<J, R> {
    fn drop(&mut self) {
        // Dropping the pool counts as closing it
        let jobs = self.jobs.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(jobs) = jobs.take() {
            jobs.close();
        }
    }
}

struct PoolWorker<J, R, H> {
    worker_id: usize,
    jobs: Arc<Mutex<Stream<J>>>,
    results: SharedWriter<R>,
    token: Token,
    handler: Arc<H>,
    stats: Arc<DashMap<usize, WorkerStats>>,
}

impl<J, R, H> PoolWorker<J, R, H>
where
    H: Handler<J, R>,
{
    async fn run(self) -> Halt {
        loop {
            let next = self
                .jobs
                .lock()
                .await
                .recv_for(&self.token, self.results.detached())
                .await;
            let job = match next {
                Ok(job) => job,
                Err(halt) => {
                    debug!(stage = "work_pool", worker_id = self.worker_id, "Worker exiting");
                    return halt;
                }
            };

            let result = match AssertUnwindSafe(self.handler.handle(job)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let failure = StageFailure::from_panic("work_pool", payload);
                    warn!(worker_id = self.worker_id, message = %failure.message, "Job handler panicked");
                    return Halt::Failed(failure);
                }
            };

            if let Some(mut entry) = self.stats.get_mut(&self.worker_id) {
                entry.processed += 1;
            }

            if let Err(halt) = self.results.send(&self.token, result).await {
                return halt;
            }
        }
    }
}
