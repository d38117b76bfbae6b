use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::fs;
use tracing::debug;

use crate::domain::{EvalCursor, Ordinate};

/// Disambiguates files written within the same millisecond.
static FILE_SEQ: AtomicU32 = AtomicU32::new(0);

/// Local file tiers: the spill directory the memory cache drains into and
/// the checkpoint directory the save pipeline writes.
///
/// Filenames encode `process id ~ timestamp ~ ordinate sort key ~ seq` with
/// `:` mapped to `.`, so a plain lexicographic directory sort within one
/// process matches semantic order. Arweave-style ids never contain `~` or
/// `.`, which keeps the fields parseable.
pub struct CheckpointFiles {
    spill_dir: PathBuf,
    checkpoint_dir: PathBuf,
}

fn encode_name(process_id: &str, timestamp: i64, ordinate: &Ordinate, ext: &str) -> String {
    let seq = FILE_SEQ.fetch_add(1, Ordering::Relaxed) % 10_000;
    let key = ordinate.sort_key().replace(':', ".");
    format!("{process_id}~{timestamp:020}~{key}~{seq:04}.{ext}")
}

/// `(process_id, timestamp, ordinate)` recovered from a file name.
fn decode_name(name: &str) -> Option<(String, i64, Ordinate)> {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    let mut parts = stem.split('~');
    let process_id = parts.next()?.to_string();
    let timestamp: i64 = parts.next()?.parse().ok()?;
    let key = parts.next()?;
    let ordinate = Ordinate::new(
        key.split('.')
            .map(|seg| seg.trim_start_matches('0'))
            .map(|seg| if seg.is_empty() { "0" } else { seg })
            .collect::<Vec<_>>()
            .join(":"),
    );
    Some((process_id, timestamp, ordinate))
}

impl CheckpointFiles {
    pub fn new(spill_dir: impl Into<PathBuf>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            spill_dir: spill_dir.into(),
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Write a spilled process memory; returns the created path.
    pub async fn write_memory_file(
        &self,
        cursor: &EvalCursor,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        let name = encode_name(&cursor.process_id, cursor.timestamp, &cursor.ordinate, "mem");
        let path = self.spill_dir.join(name);
        fs::create_dir_all(&self.spill_dir).await?;
        fs::write(&path, bytes).await?;
        debug!(file = %path.display(), "wrote memory spill file");
        Ok(path)
    }

    /// Write a checkpoint payload into the checkpoint directory.
    pub async fn write_checkpoint_file(
        &self,
        cursor: &EvalCursor,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        let name = encode_name(&cursor.process_id, cursor.timestamp, &cursor.ordinate, "ckpt");
        let path = self.checkpoint_dir.join(name);
        fs::create_dir_all(&self.checkpoint_dir).await?;
        fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Read a memory or checkpoint file back. `location` may be an absolute
    /// path (as indexed) or a bare name in either directory.
    pub async fn read_file(&self, location: &str) -> std::io::Result<Vec<u8>> {
        let direct = Path::new(location);
        if direct.is_absolute() && fs::try_exists(direct).await.unwrap_or(false) {
            return fs::read(direct).await;
        }
        let spill = self.spill_dir.join(location);
        if fs::try_exists(&spill).await.unwrap_or(false) {
            return fs::read(spill).await;
        }
        fs::read(self.checkpoint_dir.join(location)).await
    }

    /// Scan the checkpoint directory for the latest file of `process_id` at
    /// or before `before`. Spill files count too: a drained memory is as
    /// good a starting point as a checkpoint.
    pub async fn find_file_before(
        &self,
        process_id: &str,
        before: Option<&Ordinate>,
    ) -> Option<(PathBuf, i64, Ordinate)> {
        let mut best: Option<(PathBuf, i64, Ordinate)> = None;
        for dir in [&self.checkpoint_dir, &self.spill_dir] {
            let Ok(mut entries) = fs::read_dir(dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some((pid, timestamp, ordinate)) = decode_name(name) else {
                    continue;
                };
                if pid != process_id {
                    continue;
                }
                if let Some(bound) = before {
                    if &ordinate > bound {
                        continue;
                    }
                }
                let better = match &best {
                    Some((_, _, current)) => ordinate > *current,
                    None => true,
                };
                if better {
                    best = Some((entry.path(), timestamp, ordinate));
                }
            }
        }
        best
    }
}
