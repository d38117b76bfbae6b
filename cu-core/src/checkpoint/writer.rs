use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, info, instrument, warn};

use crate::cache::SpillTarget;
use crate::config::UnitConfig;
use crate::domain::{sha256_hex, EvalCursor, MemorySlot, ProcessMemory};
use crate::gateway::Gateway;
use crate::store::{CheckpointLocation, CheckpointRecord, UnitStore};

use super::bundle::{build_checkpoint_item, sign_data_item, DataItemSigner};
use super::files::CheckpointFiles;
use super::Result;

/// The save pipeline. All entry points are best-effort: a failed step is
/// logged and swallowed so the evaluation pipeline never stalls on
/// checkpoint trouble.
pub struct CheckpointWriter {
    files: Arc<CheckpointFiles>,
    store: UnitStore,
    gateway: Arc<dyn Gateway>,
    signer: Arc<dyn DataItemSigner>,
    disabled: bool,
    throttle: Duration,
    /// Last checkpoint time per process, enforcing the throttle window.
    recent: Mutex<FxHashMap<String, Instant>>,
}

impl CheckpointWriter {
    pub fn new(
        config: &UnitConfig,
        files: Arc<CheckpointFiles>,
        store: UnitStore,
        gateway: Arc<dyn Gateway>,
        signer: Arc<dyn DataItemSigner>,
    ) -> Self {
        Self {
            files,
            store,
            gateway,
            signer,
            disabled: config.disable_checkpoint_creation,
            throttle: config.checkpoint_throttle,
            recent: Mutex::new(FxHashMap::default()),
        }
    }

    /// Checkpoint a process memory. Returns whether a checkpoint was
    /// actually attempted (false when throttled or the memory is the cold
    /// start).
    #[instrument(
        skip(self, memory),
        fields(process_id = %memory.cursor.process_id, ordinate = %memory.cursor.ordinate)
    )]
    pub async fn save_checkpoint(&self, memory: &ProcessMemory) -> bool {
        let cursor = &memory.cursor;
        if cursor.ordinate.is_zero() {
            return false;
        }
        if !self.admit(&cursor.process_id) {
            debug!("checkpoint throttled");
            return false;
        }
        if let Err(err) = self.save_inner(memory).await {
            warn!(%err, "checkpoint failed, continuing without");
        }
        true
    }

    /// No two checkpoints for one process within the throttle window.
    fn admit(&self, process_id: &str) -> bool {
        let mut recent = self.recent.lock().expect("throttle lock poisoned");
        match recent.get(process_id) {
            Some(at) if at.elapsed() < self.throttle => false,
            _ => {
                recent.insert(process_id.to_string(), Instant::now());
                true
            }
        }
    }

    async fn save_inner(&self, memory: &ProcessMemory) -> Result<()> {
        let cursor = &memory.cursor;
        let bytes = match &memory.slot {
            MemorySlot::Buffer(buf) => buf.clone(),
            MemorySlot::File(path) => self.files.read_file(&path.display().to_string()).await?,
        };
        let content_hash = sha256_hex(&bytes);

        // Local tier first: a checkpoint file plus its index record. This
        // part runs even with remote creation disabled.
        let path = self.files.write_checkpoint_file(cursor, &bytes).await?;
        self.store
            .write_checkpoint_record(&CheckpointRecord {
                process_id: cursor.process_id.clone(),
                ordinate: cursor.ordinate.clone(),
                timestamp: cursor.timestamp,
                location: CheckpointLocation::File(path.display().to_string()),
            })
            .await?;

        if self.disabled {
            debug!("remote checkpoint creation disabled, local record only");
            return Ok(());
        }

        let item = build_checkpoint_item(cursor, &memory.module_id, &content_hash, bytes);
        let signed = sign_data_item(self.signer.as_ref(), item)?;
        let receipt = self.gateway.upload(&signed).await?;
        self.store
            .write_checkpoint_record(&CheckpointRecord {
                process_id: cursor.process_id.clone(),
                ordinate: cursor.ordinate.clone(),
                timestamp: cursor.timestamp,
                location: CheckpointLocation::Remote(receipt.id.clone()),
            })
            .await?;
        info!(tx_id = %receipt.id, "uploaded checkpoint");
        Ok(())
    }
}

/// The memory cache drains evicted buffers through the same file tier, so
/// a spilled memory is immediately locatable by the find pipeline.
#[async_trait]
impl SpillTarget for CheckpointWriter {
    async fn spill(
        &self,
        cursor: &EvalCursor,
        _module_id: &str,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        let path = self.files.write_memory_file(cursor, bytes).await?;
        if let Err(err) = self
            .store
            .write_checkpoint_record(&CheckpointRecord {
                process_id: cursor.process_id.clone(),
                ordinate: cursor.ordinate.clone(),
                timestamp: cursor.timestamp,
                location: CheckpointLocation::File(path.display().to_string()),
            })
            .await
        {
            warn!(%err, "spill file written but not indexed");
        }
        Ok(path)
    }
}
