use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::fs;
use tracing::{debug, instrument};

use crate::gateway::Gateway;

use super::Result;

/// Fetches and caches module binaries: bounded in-memory tier over the
/// binary directory, network fetch persisted write-through on miss.
pub struct ModuleLoader {
    binary_dir: PathBuf,
    gateway: Arc<dyn Gateway>,
    max_entries: usize,
    cache: Mutex<BinaryCache>,
}

#[derive(Default)]
struct BinaryCache {
    entries: FxHashMap<String, Arc<Vec<u8>>>,
    recency: VecDeque<String>,
}

impl ModuleLoader {
    pub fn new(binary_dir: impl Into<PathBuf>, gateway: Arc<dyn Gateway>, max_entries: usize) -> Self {
        Self {
            binary_dir: binary_dir.into(),
            gateway,
            max_entries: max_entries.max(1),
            cache: Mutex::new(BinaryCache::default()),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn load(&self, module_id: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(binary) = self.cached(module_id) {
            return Ok(binary);
        }
        let path = self.binary_dir.join(module_id);
        let binary = match fs::read(&path).await {
            Ok(bytes) => {
                debug!(module_id, "module binary from disk");
                Arc::new(bytes)
            }
            Err(_) => {
                let bytes = self.gateway.fetch_module_binary(module_id).await?;
                fs::create_dir_all(&self.binary_dir).await?;
                fs::write(&path, &bytes).await?;
                debug!(module_id, size = bytes.len(), "module binary fetched and persisted");
                Arc::new(bytes)
            }
        };
        self.insert(module_id, binary.clone());
        Ok(binary)
    }

    fn cached(&self, module_id: &str) -> Option<Arc<Vec<u8>>> {
        let mut cache = self.cache.lock().expect("loader lock poisoned");
        let binary = cache.entries.get(module_id).cloned()?;
        if let Some(pos) = cache.recency.iter().position(|k| k == module_id) {
            cache.recency.remove(pos);
        }
        cache.recency.push_back(module_id.to_string());
        Some(binary)
    }

    fn insert(&self, module_id: &str, binary: Arc<Vec<u8>>) {
        let mut cache = self.cache.lock().expect("loader lock poisoned");
        if cache.entries.insert(module_id.to_string(), binary).is_none() {
            cache.recency.push_back(module_id.to_string());
        }
        while cache.entries.len() > self.max_entries {
            let Some(evicted) = cache.recency.pop_front() else {
                break;
            };
            cache.entries.remove(&evicted);
        }
    }
}
