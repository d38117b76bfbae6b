//! Batched, deduplicated scheduler location lookups.
//!
//! Concurrent pipelines frequently locate the same process within the same
//! instant. Lookups are coalesced through a short batch window: the first
//! caller for a process opens a shared in-flight future that sleeps out the
//! window before hitting the gateway, later callers within the window
//! attach to it. The window entry is dropped as soon as the batch fires;
//! resolved locations land in a longer-lived cache.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::gateway::{Gateway, GatewayError, SchedulerLocation};

/// Coalescing window. "Same tick" in practice: long enough to batch a
/// burst of concurrent reads, short enough to be invisible per call.
const BATCH_WINDOW: Duration = Duration::from_millis(1);

type SharedLookup = Shared<BoxFuture<'static, Result<SchedulerLocation, Arc<GatewayError>>>>;

pub struct ProcessLocator {
    gateway: Arc<dyn Gateway>,
    /// In-flight lookups, keyed by process id, cleared per batch.
    window: Mutex<FxHashMap<String, SharedLookup>>,
    /// Resolved locations. Scheduler assignments are immutable, so entries
    /// never expire.
    resolved: Mutex<FxHashMap<String, SchedulerLocation>>,
}

impl ProcessLocator {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            window: Mutex::new(FxHashMap::default()),
            resolved: Mutex::new(FxHashMap::default()),
        }
    }

    pub async fn locate(&self, process_id: &str) -> Result<SchedulerLocation, Arc<GatewayError>> {
        if let Some(location) = self
            .resolved
            .lock()
            .expect("locator lock poisoned")
            .get(process_id)
        {
            return Ok(location.clone());
        }

        let lookup = {
            let mut window = self.window.lock().expect("locator lock poisoned");
            match window.get(process_id) {
                Some(shared) => shared.clone(),
                None => {
                    let gateway = self.gateway.clone();
                    let key = process_id.to_string();
                    let shared = async move {
                        tokio::time::sleep(BATCH_WINDOW).await;
                        gateway.locate_scheduler(&key).await.map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    window.insert(process_id.to_string(), shared.clone());
                    debug!(process_id, "opened locator batch window");
                    shared
                }
            }
        };

        let result = lookup.await;
        // Whoever finishes first clears the window entry; the rest are
        // no-ops. The next tick starts from an empty batch.
        self.window
            .lock()
            .expect("locator lock poisoned")
            .remove(process_id);
        if let Ok(location) = &result {
            self.resolved
                .lock()
                .expect("locator lock poisoned")
                .insert(process_id.to_string(), location.clone());
        }
        result
    }
}
