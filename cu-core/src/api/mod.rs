//! Read APIs over the evaluation core.
//!
//! `read_state` is the orchestrator entry point and the only path that
//! drives the pipeline; everything suffixed `results` is a pure query
//! against the persistence store and never triggers evaluation. Dry runs
//! share the pipeline up to their anchor point, then evaluate on the
//! dry-run pool without persisting.

mod single_flight;

pub use single_flight::{Claim, PendingReadState, PendingReads};

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::cache::CacheUsage;
use crate::domain::{Evaluation, Ordinate, ScheduledMessage};
use crate::pipeline::{
    dry_run_overlay, evaluate_process, EvalTarget, PipelineError, PipelineRun, Result, StateReply,
};
use crate::store::{EvaluationQuery, SortDir};
use crate::telemetry;
use crate::unit::UnitCore;
use crate::workers::PoolStats;

/// Bounded parallelism for `checkpoint_all`.
const CHECKPOINT_ALL_CONCURRENCY: usize = 10;

#[derive(Clone, Debug, Serialize)]
pub struct HealthReply {
    pub address: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct UnitStats {
    pub primary: PoolStats,
    pub dry_run: PoolStats,
    pub cache: CacheUsage,
    /// Resident set size of the unit process, bytes (0 where unknown).
    pub process_memory_bytes: u64,
}

/// The public face of the core. Cheap to clone; all state lives behind
/// the shared [`UnitCore`].
#[derive(Clone)]
pub struct ReadApi {
    core: Arc<UnitCore>,
    pending: PendingReads,
    checkpoint_latch: Arc<tokio::sync::Mutex<()>>,
}

impl ReadApi {
    pub fn new(core: Arc<UnitCore>) -> Self {
        Self {
            core,
            pending: PendingReads::default(),
            checkpoint_latch: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn core(&self) -> &Arc<UnitCore> {
        &self.core
    }

    /// State of the process at `target`, replaying messages as needed.
    /// Concurrent callers for one process share a single pipeline run.
    #[instrument(skip(self), fields(%target))]
    pub async fn read_state(&self, process_id: &str, target: EvalTarget) -> Result<StateReply> {
        loop {
            match self.pending.claim(process_id, &target) {
                Claim::Run(guard) => {
                    let run = self.spawn_run(guard, process_id, &target).await?;
                    return Ok(run.reply);
                }
                Claim::Attach(rx) => {
                    single_flight::wait_done(rx).await;
                    return self.truncated_view(process_id, &target).await;
                }
                Claim::Retry(rx) => {
                    single_flight::wait_done(rx).await;
                }
            }
        }
    }

    /// Run the pipeline on a detached task. A caller abandoning its wait
    /// drops only the join handle; the run keeps going and attached
    /// readers still benefit.
    async fn spawn_run(
        &self,
        guard: single_flight::RunGuard,
        process_id: &str,
        target: &EvalTarget,
    ) -> Result<PipelineRun> {
        let core = self.core.clone();
        let process_id = process_id.to_string();
        let target = target.clone();
        let handle = tokio::spawn(async move {
            let result = evaluate_process(&core, &process_id, &target).await;
            drop(guard);
            result
        });
        // A join error means the task itself died (panic); waiters were
        // woken by the guard's drop on unwind.
        handle.await.map_err(PipelineError::Join)?
    }

    /// Like `read_state` but the caller needs the terminal memory, so it
    /// never settles for a truncated view: it waits out any in-flight run
    /// and then owns one itself (usually served straight from cache).
    async fn evaluate_to(&self, process_id: &str, target: &EvalTarget) -> Result<PipelineRun> {
        loop {
            match self.pending.claim(process_id, target) {
                Claim::Run(guard) => {
                    return self.spawn_run(guard, process_id, target).await;
                }
                Claim::Attach(rx) | Claim::Retry(rx) => {
                    single_flight::wait_done(rx).await;
                }
            }
        }
    }

    /// Truncated view for callers that attached to a larger run: the
    /// greatest persisted evaluation satisfying their own target.
    async fn truncated_view(&self, process_id: &str, target: &EvalTarget) -> Result<StateReply> {
        let evaluation = match target {
            EvalTarget::Latest => self.core.store.find_latest_evaluation(process_id, None).await,
            EvalTarget::Ordinate(o) => {
                self.core
                    .store
                    .find_latest_evaluation(process_id, Some(o))
                    .await
            }
            EvalTarget::Timestamp(t) => {
                self.core
                    .store
                    .find_latest_evaluation_before_ts(process_id, *t)
                    .await
            }
        }?;
        Ok(StateReply::from_evaluation(&evaluation))
    }

    /// The evaluation produced by one message, by id. Advances the
    /// pipeline to the message's position first if needed.
    #[instrument(skip(self), err)]
    pub async fn read_result(&self, process_id: &str, message_id: &str) -> Result<StateReply> {
        let location = self
            .core
            .locator
            .locate(process_id)
            .await
            .map_err(PipelineError::Locate)?;
        let meta = self
            .core
            .su
            .load_message_meta(&location.url, process_id, message_id)
            .await?;
        self.read_state(process_id, EvalTarget::Ordinate(meta.ordinate.clone()))
            .await?;
        // The dedup rules may have satisfied this message with an earlier
        // row, so resolve by message id rather than position.
        let evaluation = match self
            .core
            .store
            .find_evaluation_by_message_id(process_id, message_id)
            .await
        {
            Ok(evaluation) => evaluation,
            Err(err) if err.is_not_found() => {
                self.core
                    .store
                    .find_evaluation(process_id, &meta.ordinate, None)
                    .await?
            }
            Err(err) => return Err(err.into()),
        };
        Ok(StateReply::from_evaluation(&evaluation))
    }

    /// Pure range query over persisted evaluations; never evaluates.
    pub async fn read_results(
        &self,
        process_id: &str,
        from: Option<Ordinate>,
        to: Option<Ordinate>,
        limit: Option<u32>,
        sort: SortDir,
    ) -> Result<Vec<Evaluation>> {
        Ok(self
            .core
            .store
            .find_evaluations(&EvaluationQuery {
                process_id: process_id.to_string(),
                from,
                to,
                only_cron: false,
                limit,
                sort,
            })
            .await?)
    }

    /// Pure range query over persisted cron evaluations.
    pub async fn read_cron_results(
        &self,
        process_id: &str,
        from: Option<Ordinate>,
        to: Option<Ordinate>,
        limit: Option<u32>,
    ) -> Result<Vec<Evaluation>> {
        Ok(self
            .core
            .store
            .find_evaluations(&EvaluationQuery {
                process_id: process_id.to_string(),
                from,
                to,
                only_cron: true,
                limit,
                sort: SortDir::Asc,
            })
            .await?)
    }

    /// Speculative evaluation of `overlay` on top of the state at
    /// `message_id` (or the latest state). Persists nothing, mutates
    /// nothing; an exhausted dry-run queue surfaces as `Overloaded`.
    #[instrument(skip(self, overlay), err)]
    pub async fn dry_run(
        &self,
        process_id: &str,
        message_id: Option<&str>,
        overlay: ScheduledMessage,
    ) -> Result<StateReply> {
        let target = match message_id {
            Some(id) => {
                let location = self
                    .core
                    .locator
                    .locate(process_id)
                    .await
                    .map_err(PipelineError::Locate)?;
                let meta = self
                    .core
                    .su
                    .load_message_meta(&location.url, process_id, id)
                    .await?;
                EvalTarget::Ordinate(meta.ordinate)
            }
            None => EvalTarget::Latest,
        };
        let run = self.evaluate_to(process_id, &target).await?;
        let outcome = dry_run_overlay(&self.core, &run.memory, overlay).await?;
        Ok(StateReply {
            process_id: process_id.to_string(),
            ordinate: run.memory.cursor.ordinate.clone(),
            cron: None,
            timestamp: run.memory.cursor.timestamp,
            block_height: run.memory.cursor.block_height,
            message_id: None,
            output: Some(outcome.output),
            gas_used: outcome.gas_used,
        })
    }

    /// In-flight evaluations, for observability.
    pub fn pending_read_states(&self) -> Vec<PendingReadState> {
        self.pending.snapshot()
    }

    /// Checkpoint every cached process memory with bounded parallelism.
    /// Never fails; per-entry failures are logged by the writer. A latch
    /// collapses concurrent invocations into one run. Returns how many
    /// checkpoints were attempted.
    #[instrument(skip(self))]
    pub async fn checkpoint_all(&self) -> usize {
        let Ok(_latch) = self.checkpoint_latch.try_lock() else {
            // A run is already in progress; wait for it and report zero
            // attempts of our own.
            let _shared = self.checkpoint_latch.lock().await;
            return 0;
        };
        let entries = self.core.cache.snapshot();
        info!(entries = entries.len(), "checkpointing all cached memories");
        let mut attempted = 0;
        for chunk in entries.chunks(CHECKPOINT_ALL_CONCURRENCY) {
            let results = futures_util::future::join_all(chunk.iter().map(|(_, memory)| {
                let writer = self.core.checkpoints.clone();
                async move { writer.save_checkpoint(memory).await }
            }))
            .await;
            attempted += results.into_iter().filter(|did| *did).count();
        }
        attempted
    }

    /// The unit's wallet identity.
    pub fn healthcheck(&self) -> HealthReply {
        HealthReply {
            address: self.core.signer.address(),
        }
    }

    /// Pool, cache and process-memory gauges.
    pub fn stats(&self) -> UnitStats {
        let cache = self.core.cache.usage();
        telemetry::record_cache_usage(&cache);
        UnitStats {
            primary: self.core.primary.stats(),
            dry_run: self.core.dry_run.stats(),
            cache,
            process_memory_bytes: resident_memory_bytes(),
        }
    }

    /// Prometheus exposition of the unit's counters and gauges.
    pub fn metrics(&self) -> String {
        telemetry::render_metrics()
    }
}

/// Resident set size, read from procfs on Linux.
fn resident_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident_pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
            {
                return resident_pages * 4096;
            }
        }
        tracing::warn!("could not read /proc/self/statm");
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}
