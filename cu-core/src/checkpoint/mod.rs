//! Memory snapshots: local spill/checkpoint files plus signed,
//! content-addressed checkpoints on the network.
//!
//! Two pipelines live here. The save pipeline (hash → build data item →
//! sign → upload → index) is throttled per process and strictly
//! best-effort: every failure is logged and swallowed, the next gas
//! threshold or shutdown retries it. The find pipeline walks the tiers
//! (live cache, local index, checkpoint directory, gateway) and falls back
//! to a cold start.

mod bundle;
mod files;
mod find;
mod writer;

pub use bundle::{build_checkpoint_item, sign_data_item, DataItemSigner};
pub use files::CheckpointFiles;
pub use find::{MemoryBound, MemoryLocator};
pub use writer::CheckpointWriter;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint file io: {0}")]
    #[diagnostic(code(cu::checkpoint::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(cu::checkpoint::store))]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    #[diagnostic(code(cu::checkpoint::gateway))]
    Gateway(#[from] crate::gateway::GatewayError),

    #[error("signing failed: {0}")]
    #[diagnostic(
        code(cu::checkpoint::signing),
        help("Check that WALLET points at a readable wallet file.")
    )]
    Signing(String),

    #[error("checkpoint {tx_id} payload hash mismatch")]
    #[diagnostic(code(cu::checkpoint::hash_mismatch))]
    HashMismatch { tx_id: String },
}

pub type Result<T> = std::result::Result<T, CheckpointError>;
