//! The evaluation pipeline: locate starting memory, stream messages,
//! evaluate each through the primary worker pool, persist every output,
//! checkpoint opportunistically, publish the terminal memory to the cache.
//!
//! One pipeline run owns its process exclusively (the single-flight table
//! in the api layer guarantees it), so the loop can mutate its memory
//! buffer serially: each worker result replaces the buffer before the next
//! message is submitted.

mod eval;
mod target;

pub use eval::{dry_run_overlay, evaluate_process, PipelineRun, StateReply};
pub use target::EvalTarget;

use miette::Diagnostic;
use thiserror::Error;

/// Spec-level error taxonomy, for transport layers mapping errors onto
/// status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Transient,
    Overloaded,
    Fatal,
}

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("process {process_id} is not served by this unit")]
    #[diagnostic(
        code(cu::pipeline::access),
        help("ALLOW_OWNERS / ALLOW_PROCESSES / RESTRICT_PROCESSES exclude it.")
    )]
    AccessDenied { process_id: String },

    #[error(transparent)]
    #[diagnostic(code(cu::pipeline::store))]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    #[diagnostic(code(cu::pipeline::scheduler))]
    Scheduler(#[from] crate::scheduler::SchedulerError),

    #[error(transparent)]
    #[diagnostic(code(cu::pipeline::gateway))]
    Gateway(#[from] crate::gateway::GatewayError),

    #[error("scheduler location lookup failed: {0}")]
    #[diagnostic(code(cu::pipeline::locate))]
    Locate(std::sync::Arc<crate::gateway::GatewayError>),

    #[error(transparent)]
    #[diagnostic(code(cu::pipeline::module))]
    Module(#[from] crate::wasm::WasmError),

    #[error(transparent)]
    #[diagnostic(code(cu::pipeline::worker))]
    Worker(#[from] crate::workers::WorkerError),

    #[error("pipeline task join error: {0}")]
    #[diagnostic(code(cu::pipeline::join))]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    #[diagnostic(code(cu::pipeline::checkpoint))]
    Checkpoint(#[from] crate::checkpoint::CheckpointError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        use crate::wasm::WasmError;
        use crate::workers::WorkerError;
        match self {
            PipelineError::AccessDenied { .. } => ErrorKind::Invalid,
            PipelineError::Store(err) if err.is_not_found() => ErrorKind::NotFound,
            PipelineError::Store(_) => ErrorKind::Fatal,
            PipelineError::Scheduler(crate::scheduler::SchedulerError::NotFound { .. }) => {
                ErrorKind::NotFound
            }
            PipelineError::Scheduler(_) => ErrorKind::Transient,
            PipelineError::Gateway(crate::gateway::GatewayError::NotFound { .. }) => {
                ErrorKind::NotFound
            }
            PipelineError::Gateway(_) | PipelineError::Locate(_) => ErrorKind::Transient,
            PipelineError::Module(WasmError::Fetch(_)) | PipelineError::Module(WasmError::Io(_)) => {
                ErrorKind::Transient
            }
            PipelineError::Module(_) => ErrorKind::Invalid,
            PipelineError::Worker(WorkerError::Overloaded) => ErrorKind::Overloaded,
            PipelineError::Worker(_) | PipelineError::Join(_) => ErrorKind::Fatal,
            PipelineError::Checkpoint(_) => ErrorKind::Transient,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
