use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::domain::{ModuleMeta, ScheduledMessage};
use crate::wasm::{CompiledModule, EvalOutcome, WasmRuntime};

use super::{Result, WorkerError};

/// A fully prepared unit of work: the memory image has already been cloned
/// (by the admission queue's prep thunk) and is moved into the worker.
pub struct PreparedJob {
    pub process_id: String,
    pub memory: Vec<u8>,
    pub message: ScheduledMessage,
    pub module: Arc<ModuleMeta>,
    pub binary: Arc<Vec<u8>>,
}

struct Job {
    prepared: PreparedJob,
    reply: oneshot::Sender<Result<EvalOutcome>>,
}

/// Live/idle/queued counters for `stats()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub pending_tasks: usize,
}

/// A fixed set of OS threads evaluating messages. Threads are preemptable;
/// the async orchestrator never blocks on compilation or execution. Each
/// thread keeps its own bounded cache of compiled modules, so a module is
/// compiled at most once per worker.
pub struct WorkerPool {
    name: &'static str,
    tx: flume::Sender<Job>,
    active: Arc<AtomicUsize>,
    workers: usize,
}

impl WorkerPool {
    pub fn start(
        name: &'static str,
        workers: usize,
        runtime: Arc<dyn WasmRuntime>,
        compiled_cache_size: usize,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = flume::unbounded::<Job>();
        let active = Arc::new(AtomicUsize::new(0));
        for worker_id in 0..workers {
            let rx = rx.clone();
            let runtime = runtime.clone();
            let active = active.clone();
            std::thread::Builder::new()
                .name(format!("{name}-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx, runtime, active, compiled_cache_size))
                .expect("spawn worker thread");
        }
        debug!(pool = name, workers, "worker pool started");
        Self {
            name,
            tx,
            active,
            workers,
        }
    }

    /// Hand a prepared job to a worker and await its outcome.
    pub async fn run(&self, prepared: PreparedJob) -> Result<EvalOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send_async(Job {
                prepared,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::PoolClosed)?;
        reply_rx.await.map_err(|_| WorkerError::PoolClosed)?
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

fn worker_loop(
    worker_id: usize,
    rx: flume::Receiver<Job>,
    runtime: Arc<dyn WasmRuntime>,
    active: Arc<AtomicUsize>,
    compiled_cache_size: usize,
) {
    let mut compiled: FxHashMap<String, Arc<dyn CompiledModule>> = FxHashMap::default();
    let mut recency: VecDeque<String> = VecDeque::new();
    for Job { prepared, reply } in rx.iter() {
        active.fetch_add(1, Ordering::Relaxed);
        trace!(worker_id, process_id = %prepared.process_id, "evaluating message");
        let outcome = evaluate(
            prepared,
            runtime.as_ref(),
            &mut compiled,
            &mut recency,
            compiled_cache_size,
        );
        // A dropped receiver means the caller went away; the result is
        // simply discarded.
        let _ = reply.send(outcome);
        active.fetch_sub(1, Ordering::Relaxed);
    }
}

fn evaluate(
    prepared: PreparedJob,
    runtime: &dyn WasmRuntime,
    compiled: &mut FxHashMap<String, Arc<dyn CompiledModule>>,
    recency: &mut VecDeque<String>,
    cache_size: usize,
) -> Result<EvalOutcome> {
    let module_id = &prepared.module.id;
    let handle = match compiled.get(module_id) {
        Some(handle) => {
            if let Some(pos) = recency.iter().position(|k| k == module_id) {
                recency.remove(pos);
            }
            recency.push_back(module_id.clone());
            handle.clone()
        }
        None => {
            let handle = runtime.compile(&prepared.module, &prepared.binary)?;
            compiled.insert(module_id.clone(), handle.clone());
            recency.push_back(module_id.clone());
            while compiled.len() > cache_size.max(1) {
                if let Some(evicted) = recency.pop_front() {
                    compiled.remove(&evicted);
                }
            }
            handle
        }
    };
    Ok(handle.apply(prepared.memory, &prepared.message))
}
