use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

/// Lazily created per-canvas async locks.
///
/// Entries are never removed; the table grows with the number of distinct
/// canvases a process touches.
#[derive(Default)]
pub struct CanvasLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CanvasLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, canvas_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(canvas_id.to_string())
            .or_default()
            .clone()
    }

    /// Run `mutation` while holding the canvas's lock. Mutations on the same
    /// canvas run one at a time; other canvases are unaffected.
    pub async fn with_canvas_lock<F, Fut, T>(&self, canvas_id: &str, mutation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(canvas_id);
        let _guard = lock.lock().await;
        trace!(canvas_id, "Canvas lock acquired");
        mutation().await
    }

    /// Number of canvases that have a lock.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_canvas_is_exclusive() {
        let locks = Arc::new(CanvasLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    locks
                        .with_canvas_lock("c1", || async move {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_other_canvases_are_independent() {
        let locks = Arc::new(CanvasLocks::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_canvas_lock("a", || async move {
                        let _ = held_tx.send(());
                        let _ = release_rx.await;
                    })
                    .await;
            })
        };
        held_rx.await.unwrap();

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            locks.with_canvas_lock("b", || async { 42 }),
        )
        .await;
        assert_eq!(other.unwrap(), 42);

        let _ = release_tx.send(());
        holder.await.unwrap();
        assert_eq!(locks.len(), 2);
    }
}
