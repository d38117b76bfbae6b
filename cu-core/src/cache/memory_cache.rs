use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::domain::{EvalCursor, MemorySlot, ProcessMemory};

/// Sink the cache spills evicted buffers into. The checkpoint layer
/// implements this by writing a sortable-named file and indexing it so the
/// find pipeline can locate the memory after the entry is gone.
#[async_trait]
pub trait SpillTarget: Send + Sync {
    async fn spill(
        &self,
        cursor: &EvalCursor,
        module_id: &str,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf>;
}

/// Counters exposed through `stats()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheUsage {
    pub entries: usize,
    pub resident_bytes: usize,
    pub file_backed: usize,
}

struct Entry {
    memory: ProcessMemory,
    last_access: Instant,
}

#[derive(Default)]
struct Inner {
    entries: FxHashMap<String, Entry>,
    /// Recency order, least-recent first. Keys are unique.
    recency: VecDeque<String>,
    resident_bytes: usize,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key.to_string());
    }

    fn forget(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
    }
}

/// Bounded LRU of live process memories. Owned by the orchestrator; worker
/// threads never see it. Buffers cross the worker boundary as explicit
/// moves in the admission queue's prep step.
pub struct MemoryCache {
    max_bytes: usize,
    ttl: Duration,
    spill: std::sync::Arc<dyn SpillTarget>,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(max_bytes: usize, ttl: Duration, spill: std::sync::Arc<dyn SpillTarget>) -> Self {
        Self {
            max_bytes,
            ttl,
            spill,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Latest memory for the process, refreshing recency. File-backed
    /// entries come back as descriptors the caller must hydrate.
    pub fn get(&self, process_id: &str) -> Option<ProcessMemory> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let entry = inner.entries.get_mut(process_id)?;
        entry.last_access = Instant::now();
        let memory = entry.memory.clone();
        inner.touch(process_id);
        Some(memory)
    }

    /// Insert or advance the memory for a process. The stored ordinate is
    /// monotone: an older memory never replaces a newer one.
    pub async fn set(&self, process_id: &str, memory: ProcessMemory) {
        let victims = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            if let Some(existing) = inner.entries.get(process_id) {
                if existing.memory.cursor.ordinate > memory.cursor.ordinate {
                    return;
                }
                inner.resident_bytes -= existing.memory.slot.resident_bytes();
            }
            inner.resident_bytes += memory.slot.resident_bytes();
            inner.entries.insert(
                process_id.to_string(),
                Entry {
                    memory,
                    last_access: Instant::now(),
                },
            );
            inner.touch(process_id);
            self.collect_victims(&mut inner)
        };
        self.drain(victims).await;
    }

    /// Pop least-recent entries until the budget holds. Buffers leave the
    /// map temporarily and are re-inserted file-backed by [`drain`].
    fn collect_victims(&self, inner: &mut Inner) -> Vec<(String, ProcessMemory)> {
        let mut victims = Vec::new();
        while inner.resident_bytes > self.max_bytes {
            let Some(key) = inner.recency.front().cloned() else {
                break;
            };
            let Some(entry) = inner.entries.remove(&key) else {
                inner.recency.pop_front();
                continue;
            };
            inner.resident_bytes -= entry.memory.slot.resident_bytes();
            inner.forget(&key);
            match entry.memory.slot {
                MemorySlot::Buffer(_) => victims.push((key, entry.memory)),
                // Second eviction: drop the entry, the spill file stays on
                // disk for the checkpoint index to find.
                MemorySlot::File(path) => {
                    debug!(process_id = %key, file = %path.display(), "dropped file-backed entry");
                }
            }
        }
        victims
    }

    /// Spill evicted buffers and re-insert them file-backed at the cold end
    /// of the recency order.
    async fn drain(&self, victims: Vec<(String, ProcessMemory)>) {
        for (key, mut memory) in victims {
            let MemorySlot::Buffer(bytes) = &memory.slot else {
                continue;
            };
            match self
                .spill
                .spill(&memory.cursor, &memory.module_id, bytes)
                .await
            {
                Ok(path) => {
                    memory.slot = MemorySlot::File(path);
                    let mut inner = self.inner.lock().expect("cache lock poisoned");
                    // A newer memory may have landed while the file was
                    // being written; the monotone rule still applies.
                    if let Some(existing) = inner.entries.get(&key) {
                        if existing.memory.cursor.ordinate >= memory.cursor.ordinate {
                            continue;
                        }
                        inner.resident_bytes -= existing.memory.slot.resident_bytes();
                        inner.forget(&key);
                    }
                    inner.entries.insert(
                        key.clone(),
                        Entry {
                            memory,
                            last_access: Instant::now(),
                        },
                    );
                    inner.recency.push_front(key);
                }
                Err(err) => {
                    warn!(process_id = %key, %err, "spill failed, dropping evicted memory");
                }
            }
        }
    }

    /// Evict everything idle past the TTL: buffers spill, file-backed
    /// entries drop.
    pub async fn evict_expired(&self) {
        let victims = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            let expired: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.last_access.elapsed() > self.ttl)
                .map(|(k, _)| k.clone())
                .collect();
            let mut victims = Vec::new();
            for key in expired {
                let Some(entry) = inner.entries.remove(&key) else {
                    continue;
                };
                inner.resident_bytes -= entry.memory.slot.resident_bytes();
                inner.forget(&key);
                if matches!(entry.memory.slot, MemorySlot::Buffer(_)) {
                    victims.push((key, entry.memory));
                }
            }
            victims
        };
        self.drain(victims).await;
    }

    /// Point-in-time copy of all entries, for bulk checkpointing. Taken
    /// under the lock but visited outside it, so concurrent `set` calls
    /// cannot deadlock the visitor.
    pub fn snapshot(&self) -> Vec<(String, ProcessMemory)> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.memory.clone()))
            .collect()
    }

    pub fn usage(&self) -> CacheUsage {
        let inner = self.inner.lock().expect("cache lock poisoned");
        CacheUsage {
            entries: inner.entries.len(),
            resident_bytes: inner.resident_bytes,
            file_backed: inner
                .entries
                .values()
                .filter(|e| e.memory.slot.is_file_backed())
                .count(),
        }
    }
}
