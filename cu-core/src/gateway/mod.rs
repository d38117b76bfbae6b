//! Client for the content-addressed network: checkpoint discovery by tag,
//! raw transaction download, module metadata/binaries, the block index and
//! the bundler upload endpoint.
//!
//! The [`Gateway`] trait is the seam the rest of the core programs against;
//! [`HttpGateway`] is the production implementation.

mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BlockRef, ModuleMeta, Ordinate, Tag};

#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    #[diagnostic(code(cu::gateway::http))]
    Http(#[from] reqwest::Error),

    #[error("gateway returned malformed payload: {0}")]
    #[diagnostic(code(cu::gateway::malformed))]
    Malformed(String),

    #[error("{what} not found on gateway: {key}")]
    #[diagnostic(code(cu::gateway::not_found))]
    NotFound { what: &'static str, key: String },
}

impl GatewayError {
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Tag filter for checkpoint discovery.
#[derive(Clone, Debug, Default)]
pub struct CheckpointFilter {
    pub process_id: String,
    /// Only checkpoints signed by these owners are returned. Empty matches
    /// nothing: an untrusting unit never discovers remote checkpoints.
    pub trusted_owners: Vec<String>,
    pub limit: u32,
}

/// A checkpoint as advertised by the gateway, before download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointDescriptor {
    pub tx_id: String,
    pub owner: String,
    pub process_id: String,
    pub module_id: String,
    pub ordinate: Ordinate,
    pub timestamp: i64,
    pub block_height: u64,
    pub epoch: u64,
    pub nonce: u64,
    /// Hex SHA-256 of the payload, verified after download.
    pub content_hash: String,
    pub cron: Option<String>,
}

/// Where a process's scheduler lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerLocation {
    pub address: String,
    pub url: String,
}

/// An unsigned bundle entry: payload plus its tag list.
#[derive(Clone, Debug)]
pub struct DataItem {
    pub data: Vec<u8>,
    pub tags: Vec<Tag>,
}

/// A data item after signing, ready for upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedDataItem {
    pub id: String,
    pub owner: String,
    pub signature: String,
    pub tags: Vec<Tag>,
    /// Base64 payload.
    pub data: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UploadReceipt {
    pub id: String,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Checkpoints tagged for the process, newest first, filtered to
    /// trusted owners on the server side.
    async fn query_checkpoints(
        &self,
        filter: &CheckpointFilter,
    ) -> Result<Vec<CheckpointDescriptor>>;

    /// Raw payload of a transaction.
    async fn download(&self, tx_id: &str) -> Result<Vec<u8>>;

    async fn fetch_module_meta(&self, module_id: &str) -> Result<ModuleMeta>;

    async fn fetch_module_binary(&self, module_id: &str) -> Result<Vec<u8>>;

    /// Blocks with `min <= height < max`, ascending.
    async fn load_blocks(&self, min_height: u64, max_height: u64) -> Result<Vec<BlockRef>>;

    /// Resolve the scheduler-location record for a process.
    async fn locate_scheduler(&self, process_id: &str) -> Result<SchedulerLocation>;

    /// Push a signed data item to the bundler. Best-effort from the
    /// caller's perspective; transient failures are retried internally.
    async fn upload(&self, item: &SignedDataItem) -> Result<UploadReceipt>;
}
