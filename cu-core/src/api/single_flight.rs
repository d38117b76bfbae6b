use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::pipeline::EvalTarget;

/// In-flight evaluation table: at most one pipeline run per process.
///
/// A caller either claims the run slot, attaches to an in-flight run whose
/// target covers its own (reading a truncated view from the store once the
/// run finishes), or waits for the current run to finish and tries again.
#[derive(Clone, Default)]
pub struct PendingReads {
    inner: Arc<Mutex<FxHashMap<String, Pending>>>,
}

struct Pending {
    target: EvalTarget,
    done: watch::Receiver<bool>,
}

/// Outcome of asking for the run slot of a process.
pub enum Claim {
    /// Caller owns the run; dropping the guard releases the slot and wakes
    /// every waiter.
    Run(RunGuard),
    /// An in-flight run covers this target: wait, then read the store.
    Attach(watch::Receiver<bool>),
    /// An in-flight run does not cover this target: wait, then claim again.
    Retry(watch::Receiver<bool>),
}

pub struct RunGuard {
    key: String,
    map: Arc<Mutex<FxHashMap<String, Pending>>>,
    done: watch::Sender<bool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.map
            .lock()
            .expect("pending lock poisoned")
            .remove(&self.key);
        // Waiters may all be gone; that is fine.
        let _ = self.done.send(true);
    }
}

/// One row of the observability view.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct PendingReadState {
    pub process_id: String,
    pub target: String,
}

impl PendingReads {
    pub fn claim(&self, process_id: &str, target: &EvalTarget) -> Claim {
        let mut map = self.inner.lock().expect("pending lock poisoned");
        if let Some(pending) = map.get(process_id) {
            return if pending.target.covers(target) {
                Claim::Attach(pending.done.clone())
            } else {
                Claim::Retry(pending.done.clone())
            };
        }
        let (tx, rx) = watch::channel(false);
        map.insert(
            process_id.to_string(),
            Pending {
                target: target.clone(),
                done: rx,
            },
        );
        Claim::Run(RunGuard {
            key: process_id.to_string(),
            map: self.inner.clone(),
            done: tx,
        })
    }

    /// Snapshot of in-flight evaluations, for `pending_read_states`.
    pub fn snapshot(&self) -> Vec<PendingReadState> {
        let map = self.inner.lock().expect("pending lock poisoned");
        let mut rows: Vec<PendingReadState> = map
            .iter()
            .map(|(process_id, pending)| PendingReadState {
                process_id: process_id.clone(),
                target: pending.target.to_string(),
            })
            .collect();
        rows.sort_by(|a, b| a.process_id.cmp(&b.process_id));
        rows
    }
}

/// Await an in-flight run's completion signal.
pub async fn wait_done(mut rx: watch::Receiver<bool>) {
    if *rx.borrow_and_update() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow_and_update() {
            return;
        }
    }
    // Sender dropped: the run is over either way.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ordinate;

    fn ord(s: &str) -> EvalTarget {
        EvalTarget::Ordinate(Ordinate::new(s))
    }

    #[test]
    fn second_claim_attaches_when_covered() {
        let pending = PendingReads::default();
        let guard = match pending.claim("p1", &ord("10")) {
            Claim::Run(guard) => guard,
            _ => panic!("expected run"),
        };
        assert!(matches!(pending.claim("p1", &ord("5")), Claim::Attach(_)));
        assert!(matches!(pending.claim("p1", &ord("11")), Claim::Retry(_)));
        assert_eq!(pending.snapshot().len(), 1);
        drop(guard);
        assert!(pending.snapshot().is_empty());
        assert!(matches!(pending.claim("p1", &ord("11")), Claim::Run(_)));
    }

    #[tokio::test]
    async fn dropping_guard_wakes_waiters() {
        let pending = PendingReads::default();
        let guard = match pending.claim("p1", &EvalTarget::Latest) {
            Claim::Run(guard) => guard,
            _ => panic!("expected run"),
        };
        let rx = match pending.claim("p1", &ord("1")) {
            Claim::Attach(rx) => rx,
            _ => panic!("expected attach"),
        };
        let waiter = tokio::spawn(wait_done(rx));
        drop(guard);
        waiter.await.unwrap();
    }
}
