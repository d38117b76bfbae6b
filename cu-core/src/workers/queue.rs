use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::wasm::EvalOutcome;

use super::pool::{PoolStats, PreparedJob, WorkerPool};
use super::{Result, WorkerError};

/// Concurrency gate in front of a worker pool.
///
/// Admission is a counting semaphore sized to the pool, acquired *before*
/// the prep thunk runs. Submitting work is therefore cheap until a worker
/// slot is free, and the expensive memory clone happens adjacent in time to
/// the execution that consumes it.
pub struct AdmissionQueue {
    pool: Arc<WorkerPool>,
    permits: Arc<Semaphore>,
    /// Callers waiting for a permit (the prep thunk has not run yet).
    queued: AtomicUsize,
    /// Waiting-caller ceiling; `None` is unbounded (primary pool).
    max_queue: Option<usize>,
}

impl AdmissionQueue {
    pub fn new(pool: Arc<WorkerPool>, max_queue: Option<usize>) -> Self {
        let permits = Arc::new(Semaphore::new(pool.workers()));
        Self {
            pool,
            permits,
            queued: AtomicUsize::new(0),
            max_queue,
        }
    }

    /// Admit one evaluation: wait for a slot, run `prep` (the memory
    /// clone), hand the job to the pool, await the outcome.
    ///
    /// With a bounded queue, callers beyond the ceiling are rejected
    /// immediately with [`WorkerError::Overloaded`] instead of waiting.
    pub async fn admit<F>(&self, prep: F) -> Result<EvalOutcome>
    where
        F: FnOnce() -> PreparedJob,
    {
        if let Some(max) = self.max_queue {
            if self.queued.load(Ordering::Relaxed) >= max {
                return Err(WorkerError::Overloaded);
            }
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        let permit = self.permits.acquire().await;
        self.queued.fetch_sub(1, Ordering::Relaxed);
        let _permit = permit.map_err(|_| WorkerError::PoolClosed)?;

        let prepared = prep();
        self.pool.run(prepared).await
    }

    pub fn stats(&self) -> PoolStats {
        let active = self.pool.active();
        PoolStats {
            active,
            idle: self.pool.workers().saturating_sub(active),
            pending_tasks: self.queued.load(Ordering::Relaxed),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}
