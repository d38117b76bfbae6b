use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cache::MemoryCache;
use crate::config::UnitConfig;
use crate::domain::{sha256_hex, EvalCursor, MemorySlot, Ordinate, Process, ProcessMemory};
use crate::gateway::{CheckpointDescriptor, CheckpointFilter, Gateway};
use crate::store::{CheckpointLocation, UnitStore};

use super::files::CheckpointFiles;
use super::Result;

/// How many checkpoint candidates to pull from the gateway per query.
const DISCOVERY_LIMIT: u32 = 50;

/// Bound on the starting memory: never past this ordinate and never past
/// this timestamp. An empty bound means "latest known".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryBound {
    pub ordinate: Option<Ordinate>,
    pub timestamp: Option<i64>,
}

impl MemoryBound {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn at_ordinate(ordinate: Ordinate) -> Self {
        Self {
            ordinate: Some(ordinate),
            timestamp: None,
        }
    }

    pub fn at_timestamp(timestamp: i64) -> Self {
        Self {
            ordinate: None,
            timestamp: Some(timestamp),
        }
    }

    fn admits(&self, ordinate: &Ordinate, timestamp: i64) -> bool {
        if let Some(bound) = &self.ordinate {
            if ordinate > bound {
                return false;
            }
        }
        if let Some(bound) = self.timestamp {
            if timestamp > bound {
                return false;
            }
        }
        true
    }
}

/// The find pipeline: best starting memory for a process at or before a
/// target bound. Tiers, in order: live cache, local checkpoint index,
/// checkpoint directory scan, trusted remote checkpoints, cold start.
pub struct MemoryLocator {
    cache: Arc<MemoryCache>,
    files: Arc<CheckpointFiles>,
    store: UnitStore,
    gateway: Arc<dyn Gateway>,
    trusted_owners: Vec<String>,
    ignore_process_ids: Vec<String>,
    ignore_tx_ids: Vec<String>,
}

impl MemoryLocator {
    pub fn new(
        config: &UnitConfig,
        cache: Arc<MemoryCache>,
        files: Arc<CheckpointFiles>,
        store: UnitStore,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            cache,
            files,
            store,
            gateway,
            trusted_owners: config.trusted_checkpoint_owners.clone(),
            ignore_process_ids: config.ignore_remote_checkpoints_for.clone(),
            ignore_tx_ids: config.ignore_checkpoint_txs.clone(),
        }
    }

    /// Locate and hydrate the latest memory admitted by `bound`. Always
    /// succeeds: the floor is a cold start at ordinate zero.
    #[instrument(skip(self, process), fields(process_id = %process.id))]
    pub async fn find_latest_before(
        &self,
        process: &Process,
        bound: &MemoryBound,
    ) -> Result<ProcessMemory> {
        if let Some(memory) = self.from_cache(process, bound).await {
            return Ok(memory);
        }
        if let Some(memory) = self.from_local_record(process, bound).await {
            return Ok(memory);
        }
        if let Some(memory) = self.from_file_scan(process, bound).await {
            return Ok(memory);
        }
        if let Some(memory) = self.from_gateway(process, bound).await {
            return Ok(memory);
        }
        debug!("no starting memory found, cold start");
        Ok(ProcessMemory::cold_start(&process.id, &process.module_id))
    }

    async fn from_cache(&self, process: &Process, bound: &MemoryBound) -> Option<ProcessMemory> {
        let memory = self.cache.get(&process.id)?;
        if !bound.admits(&memory.cursor.ordinate, memory.cursor.timestamp) {
            return None;
        }
        match self.hydrate(memory).await {
            Ok(memory) => {
                debug!(ordinate = %memory.cursor.ordinate, "starting from cached memory");
                Some(memory)
            }
            Err(err) => {
                warn!(%err, "cached memory unreadable, falling through");
                None
            }
        }
    }

    async fn from_local_record(
        &self,
        process: &Process,
        bound: &MemoryBound,
    ) -> Option<ProcessMemory> {
        let upper = bound.ordinate.clone().unwrap_or_else(max_ordinate);
        let record = self
            .store
            .find_checkpoint_record_before(&process.id, &upper)
            .await
            .ok()?;
        if !bound.admits(&record.ordinate, record.timestamp) {
            return None;
        }
        let bytes = match &record.location {
            CheckpointLocation::File(path) => match self.files.read_file(path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%err, path, "indexed checkpoint file unreadable");
                    return None;
                }
            },
            CheckpointLocation::Remote(tx_id) => {
                if self.remote_ignored(&process.id, tx_id) {
                    return None;
                }
                match self.gateway.download(tx_id).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(%err, tx_id, "indexed remote checkpoint unreadable");
                        return None;
                    }
                }
            }
        };
        debug!(ordinate = %record.ordinate, "starting from indexed checkpoint");
        Some(ProcessMemory {
            slot: MemorySlot::Buffer(bytes),
            module_id: process.module_id.clone(),
            cursor: EvalCursor {
                process_id: process.id.clone(),
                ordinate: record.ordinate,
                timestamp: record.timestamp,
                ..Default::default()
            },
            gas_used: 0,
        })
    }

    /// A fresh database in front of a warm checkpoint directory still
    /// recovers: scan filenames directly.
    async fn from_file_scan(
        &self,
        process: &Process,
        bound: &MemoryBound,
    ) -> Option<ProcessMemory> {
        let (path, timestamp, ordinate) = self
            .files
            .find_file_before(&process.id, bound.ordinate.as_ref())
            .await?;
        if !bound.admits(&ordinate, timestamp) {
            return None;
        }
        let bytes = match self.files.read_file(&path.display().to_string()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, path = %path.display(), "checkpoint file unreadable");
                return None;
            }
        };
        debug!(ordinate = %ordinate, "starting from checkpoint file");
        Some(ProcessMemory {
            slot: MemorySlot::Buffer(bytes),
            module_id: process.module_id.clone(),
            cursor: EvalCursor {
                process_id: process.id.clone(),
                ordinate,
                timestamp,
                ..Default::default()
            },
            gas_used: 0,
        })
    }

    async fn from_gateway(
        &self,
        process: &Process,
        bound: &MemoryBound,
    ) -> Option<ProcessMemory> {
        if self.ignore_process_ids.iter().any(|p| p == &process.id) {
            return None;
        }
        if self.trusted_owners.is_empty() {
            return None;
        }
        let descriptors = match self
            .gateway
            .query_checkpoints(&CheckpointFilter {
                process_id: process.id.clone(),
                trusted_owners: self.trusted_owners.clone(),
                limit: DISCOVERY_LIMIT,
            })
            .await
        {
            Ok(descriptors) => descriptors,
            Err(err) => {
                warn!(%err, "checkpoint discovery failed");
                return None;
            }
        };
        let best = descriptors
            .into_iter()
            .filter(|d| !self.ignore_tx_ids.iter().any(|t| t == &d.tx_id))
            .filter(|d| self.trusted_owners.iter().any(|o| o == &d.owner))
            .filter(|d| bound.admits(&d.ordinate, d.timestamp))
            .max_by(|a, b| a.ordinate.cmp(&b.ordinate))?;

        let bytes = match self.gateway.download(&best.tx_id).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, tx_id = %best.tx_id, "checkpoint download failed");
                return None;
            }
        };
        if sha256_hex(&bytes) != best.content_hash {
            warn!(tx_id = %best.tx_id, "checkpoint payload hash mismatch, rejecting");
            return None;
        }
        info!(tx_id = %best.tx_id, ordinate = %best.ordinate, "starting from remote checkpoint");
        Some(remote_memory(process, &best, bytes))
    }

    /// Replace a file-backed slot with the file's contents.
    pub async fn hydrate(&self, mut memory: ProcessMemory) -> std::io::Result<ProcessMemory> {
        if let MemorySlot::File(path) = &memory.slot {
            let bytes = self.files.read_file(&path.display().to_string()).await?;
            memory.slot = MemorySlot::Buffer(bytes);
        }
        Ok(memory)
    }

    fn remote_ignored(&self, process_id: &str, tx_id: &str) -> bool {
        self.ignore_process_ids.iter().any(|p| p == process_id)
            || self.ignore_tx_ids.iter().any(|t| t == tx_id)
    }
}

fn remote_memory(
    process: &Process,
    descriptor: &CheckpointDescriptor,
    bytes: Vec<u8>,
) -> ProcessMemory {
    ProcessMemory {
        slot: MemorySlot::Buffer(bytes),
        module_id: descriptor.module_id.clone(),
        cursor: EvalCursor {
            process_id: process.id.clone(),
            ordinate: descriptor.ordinate.clone(),
            timestamp: descriptor.timestamp,
            block_height: descriptor.block_height,
            epoch: descriptor.epoch,
            nonce: descriptor.nonce,
            cron: descriptor.cron.clone(),
        },
        gas_used: 0,
    }
}

/// Upper bound used when the caller wants "latest": sorts after any real
/// ordinate.
fn max_ordinate() -> Ordinate {
    Ordinate::new("9".repeat(32))
}
