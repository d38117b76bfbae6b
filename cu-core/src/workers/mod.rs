//! Evaluation worker pools and their admission queues.
//!
//! Two independent pools of OS worker threads (primary for the evaluation
//! pipeline, dry-run for speculative overlays), each fronted by an
//! [`AdmissionQueue`] whose concurrency equals the pool size. The queue
//! wraps a prep *thunk*: the expensive part of submitting work, cloning a
//! process memory measured in hundreds of megabytes, runs only once a
//! worker slot is actually free, so copies never pile up behind a busy
//! pool. Do not merge the queue into the pool; the deferral is the point.

mod pool;
mod queue;

pub use pool::{PoolStats, PreparedJob, WorkerPool};
pub use queue::AdmissionQueue;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    #[error("dry-run capacity exhausted, try again later")]
    #[diagnostic(
        code(cu::workers::overloaded),
        help("The dry-run admission queue is full; surfaces to clients as 429.")
    )]
    Overloaded,

    #[error("worker pool is shut down")]
    #[diagnostic(code(cu::workers::closed))]
    PoolClosed,

    #[error(transparent)]
    #[diagnostic(code(cu::workers::wasm))]
    Wasm(#[from] crate::wasm::WasmError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
