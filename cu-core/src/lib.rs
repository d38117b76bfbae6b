//! ```text
//! ReadApi ─┬─► single-flight table ─► EvalPipeline
//!          │                          │
//!          │                          ├─► locate memory (cache → files → gateway → cold)
//!          │                          ├─► SchedulerUnit message stream (+ cron interleave)
//!          │                          ├─► admission queue ─► worker pool ─► WasmRuntime
//!          │                          ├─► UnitStore (evaluations, processes, modules)
//!          │                          └─► CheckpointWriter (throttled, best-effort)
//!          │
//!          └─► pure queries (read_results, read_cron_results) against UnitStore
//! ```
//!
//! Evaluation core of a compute unit: answers "what is the state of process P
//! after message M" by replaying the process's ordered message log through a
//! deterministic wasm evaluator, starting from the nearest known memory
//! snapshot and caching aggressively at every tier.

pub mod api;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod locator;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod unit;
pub mod wasm;
pub mod workers;
