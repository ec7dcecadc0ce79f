use std::sync::Arc;

use tokio::sync::Semaphore;

/// Bounds vector-store call concurrency so `add`/`search`/`delete` never
/// pile up enough in-flight HTTP work to starve the rest of the process,
/// mirroring spec.md §5's "small worker pool (default 2 workers)" for
/// blocking store operations. Grounded on the single-permit execution gate
/// in `querymt-querymt::agent::core::AgentCore` (`execution_permit`),
/// generalized to N permits.
#[derive(Clone)]
pub struct VectorStorePool {
    permits: Arc<Semaphore>,
}

impl VectorStorePool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Runs `task` once a permit is available, releasing it on completion
    /// regardless of outcome.
    pub async fn dispatch<F, T>(&self, task: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("vector store pool semaphore is never closed");
        task.await
    }
}

impl Default for VectorStorePool {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn dispatch_bounds_concurrency_to_worker_count() {
        let pool = VectorStorePool::new(2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                pool.dispatch(async {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert!(max_concurrent.load(Ordering::SeqCst) <= 2);
    }
}
