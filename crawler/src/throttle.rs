//! Per-host politeness delay (spec.md §4.1, §5's "per-host token-bucket"),
//! grounded in `RerankerPool`'s `Semaphore`-gated lease pattern
//! (`retrieval-pipeline/src/reranking/mod.rs`): one permit per host bounds
//! concurrent fetches to that host to 1, and the permit is only handed
//! back out once the configured delay has elapsed since the last request
//! started.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::Instant,
};

pub struct HostGate {
    semaphore: Arc<Semaphore>,
    last_request: Mutex<Option<Instant>>,
    delay: Duration,
}

impl HostGate {
    pub fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(1)),
            last_request: Mutex::new(None),
            delay: Duration::from_millis(delay_ms),
        })
    }

    /// Waits until both a fetch slot is free and the politeness delay has
    /// elapsed since the prior request to this host, then returns a permit
    /// the caller holds for the duration of its fetch.
    pub async fn acquire(self: &Arc<Self>) -> OwnedSemaphorePermit {
        #[allow(clippy::unwrap_used)]
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("host gate semaphore is never closed");

        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_out_the_delay() {
        let gate = HostGate::new(50);
        let start = Instant::now();
        drop(gate.acquire().await);
        drop(gate.acquire().await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn first_acquire_does_not_wait() {
        let gate = HostGate::new(500);
        let start = Instant::now();
        drop(gate.acquire().await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
