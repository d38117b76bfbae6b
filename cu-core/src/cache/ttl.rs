use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::memory_cache::MemoryCache;

/// Upper bound for a single timer arm. Platform timer wheels cap out well
/// below the TTLs this cache is configured with, so longer waits cascade.
const MAX_TIMER_CHUNK: Duration = Duration::from_millis(1 << 30);

/// Sleep for `duration`, split into timer-safe chunks.
pub async fn long_sleep(duration: Duration) {
    let mut remaining = duration;
    while remaining > MAX_TIMER_CHUNK {
        tokio::time::sleep(MAX_TIMER_CHUNK).await;
        remaining -= MAX_TIMER_CHUNK;
    }
    tokio::time::sleep(remaining).await;
}

/// Background sweep evicting entries idle past the cache TTL. The sweep
/// period is a fraction of the TTL, floored so short test TTLs still fire.
pub fn spawn_ttl_sweeper(cache: Arc<MemoryCache>) -> JoinHandle<()> {
    let ttl = cache.ttl();
    let period = (ttl / 4).max(Duration::from_millis(50));
    tokio::spawn(async move {
        loop {
            long_sleep(period).await;
            cache.evict_expired().await;
        }
    })
}
