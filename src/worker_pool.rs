//! Bounded CPU worker pool for partition/render and chunking work (spec §5:
//! "CPU-bound work ... offloaded to a bounded worker pool so it never blocks
//! the async runtime's cooperative scheduler"). `tokio::task::spawn_blocking`
//! already runs on its own thread pool; the semaphore here additionally caps
//! how many of those blocking tasks may run at once, independent of tokio's
//! own blocking-pool size, so a burst of page renders can't starve other
//! blocking work in the process (e.g. sqlx's blocking DNS resolution).

use crate::error::{ConstructionRagError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Runs `f` on the blocking thread pool, gated by this pool's
    /// concurrency limit. Panics inside `f` surface as a `Generic` error
    /// rather than unwinding the caller's task.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore is never closed");

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await;

        result.map_err(|e| ConstructionRagError::Generic(anyhow::anyhow!("worker pool task panicked: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_work_and_returns_its_result() {
        let pool = WorkerPool::new(2);
        let result = pool.run_blocking(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn caps_concurrency_at_configured_limit() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pool = Arc::new(WorkerPool::new(1));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                pool.run_blocking(move || {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
