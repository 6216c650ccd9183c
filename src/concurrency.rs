//! Bounded per-tick fan-out
//!
//! A tick may spawn one task per uncached operation or per known worker. The
//! [`TaskGroup`] caps how many run at once and joins them all before returning,
//! so callers read shared state only after every task has finished.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Structured fan-out with a fixed concurrency width.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    permits: Arc<Semaphore>,
    width: usize,
}

impl TaskGroup {
    /// A width of zero is raised to one.
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `task` once per key and wait for all of them.
    ///
    /// Results come back in key order. A task that panics or is cancelled is
    /// logged and left out.
    pub async fn join_all<K, T, F, Fut>(
        &self,
        keys: impl IntoIterator<Item = K>,
        task: F,
    ) -> Vec<(K, T)>
    where
        K: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(K) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for (position, key) in keys.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let work = task(key.clone());
            set.spawn(async move {
                // The semaphore is never closed, so a failed acquire only
                // means running unthrottled.
                let _permit = permits.acquire_owned().await.ok();
                (position, key, work.await)
            });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Fan-out task did not complete"),
            }
        }
        results.sort_by_key(|(position, _, _)| *position);
        results
            .into_iter()
            .map(|(_, key, value)| (key, value))
            .collect()
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_follow_key_order() {
        let group = TaskGroup::new(4);
        let results = group
            .join_all([30u64, 10, 20], |delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay * 2
            })
            .await;

        assert_eq!(results, [(30, 60), (10, 20), (20, 40)]);
    }

    #[tokio::test]
    async fn never_exceeds_width() {
        let group = TaskGroup::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = group
            .join_all(0..10, |_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_task_is_dropped() {
        let group = TaskGroup::new(2);
        let results = group
            .join_all([1, 2, 3], |n| async move {
                if n == 2 {
                    panic!("probe failed");
                }
                n
            })
            .await;

        assert_eq!(results, [(1, 1), (3, 3)]);
    }

    #[test]
    fn zero_width_is_raised() {
        assert_eq!(TaskGroup::new(0).width(), 1);
    }
}
