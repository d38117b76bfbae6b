//! Module binaries and the evaluator seam.
//!
//! The core owns everything around execution: fetching and caching module
//! binaries, admissibility checks, worker placement and compiled-artifact
//! caching. The wasm engine itself sits behind [`WasmRuntime`], an
//! external collaborator like the signer and the HTTP transport.

mod loader;

pub use loader::ModuleLoader;

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::config::UnitConfig;
use crate::domain::{EvalOutput, ModuleMeta, ScheduledMessage};

#[derive(Debug, Error, Diagnostic)]
pub enum WasmError {
    #[error("module format {format} is not supported by this unit")]
    #[diagnostic(
        code(cu::wasm::unsupported_format),
        help("Extend PROCESS_WASM_SUPPORTED_FORMATS if the format should be served.")
    )]
    UnsupportedFormat { format: String },

    #[error("module requires unsupported extension {extension}")]
    #[diagnostic(code(cu::wasm::unsupported_extension))]
    UnsupportedExtension { extension: String },

    #[error("module {what} limit {requested} exceeds unit maximum {maximum}")]
    #[diagnostic(code(cu::wasm::limit))]
    LimitExceeded {
        what: &'static str,
        requested: u64,
        maximum: u64,
    },

    #[error("module binary fetch failed: {0}")]
    #[diagnostic(code(cu::wasm::fetch))]
    Fetch(#[from] crate::gateway::GatewayError),

    #[error("module binary io: {0}")]
    #[diagnostic(code(cu::wasm::io))]
    Io(#[from] std::io::Error),

    #[error("module compile failed: {0}")]
    #[diagnostic(code(cu::wasm::compile))]
    Compile(String),
}

pub type Result<T> = std::result::Result<T, WasmError>;

/// Result of applying one message inside a worker. A wasm-level failure
/// (including out-of-gas) lands in `output.error`; it is an evaluation
/// result, not a fault.
#[derive(Clone, Debug)]
pub struct EvalOutcome {
    pub memory: Vec<u8>,
    pub output: EvalOutput,
    pub gas_used: u64,
}

/// A compiled module, cached per worker thread and shared across
/// evaluations of processes running the same module.
pub trait CompiledModule: Send + Sync {
    /// Apply `message` to `memory`. Must be deterministic: identical
    /// memory and message produce an identical outcome on any worker.
    fn apply(&self, memory: Vec<u8>, message: &ScheduledMessage) -> EvalOutcome;
}

/// The engine seam: compiles admissible binaries into executable modules.
pub trait WasmRuntime: Send + Sync {
    fn compile(&self, module: &ModuleMeta, binary: &[u8]) -> Result<Arc<dyn CompiledModule>>;
}

/// Admissibility gate applied when a module is first resolved. Violations
/// are terminal for the calling read.
pub fn validate_module(config: &UnitConfig, module: &ModuleMeta) -> Result<()> {
    if !config
        .wasm_supported_formats
        .iter()
        .any(|f| f == &module.format)
    {
        return Err(WasmError::UnsupportedFormat {
            format: module.format.clone(),
        });
    }
    for extension in &module.options.extensions {
        if !config
            .wasm_supported_extensions
            .iter()
            .any(|e| e == extension)
        {
            return Err(WasmError::UnsupportedExtension {
                extension: extension.clone(),
            });
        }
    }
    if module.options.memory_limit > config.wasm_memory_max_limit {
        return Err(WasmError::LimitExceeded {
            what: "memory",
            requested: module.options.memory_limit,
            maximum: config.wasm_memory_max_limit,
        });
    }
    if module.options.compute_limit > config.wasm_compute_max_limit {
        return Err(WasmError::LimitExceeded {
            what: "compute",
            requested: module.options.compute_limit,
            maximum: config.wasm_compute_max_limit,
        });
    }
    Ok(())
}
