use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

/// A warm, idle container waiting to be handed to an invocation.
#[derive(Debug, Clone)]
pub struct WarmContainer {
    pub container_id: String,
    pub function_id: i32,
}

/// Per-function FIFO queues of warm containers, guarded by a single mutex.
///
/// The mutex protects only the bookkeeping map, never a container itself:
/// callers pop a container id out, drop the lock, then do their (slow)
/// driver I/O against that id. This keeps a single slow `exec`/`run` call
/// from blocking every other function's acquire/release.
pub struct Pool {
    queues: Mutex<HashMap<i32, VecDeque<WarmContainer>>>,
}

impl Pool {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Pops the oldest warm container for `function_id`, if any.
    pub async fn acquire(&self, function_id: i32) -> Option<WarmContainer> {
        let mut queues = self.queues.lock().await;
        queues.get_mut(&function_id).and_then(|q| q.pop_front())
    }

    /// Returns a container to the back of its function's queue for reuse.
    pub async fn release(&self, container: WarmContainer) {
        let mut queues = self.queues.lock().await;
        queues
            .entry(container.function_id)
            .or_insert_with(VecDeque::new)
            .push_back(container);
    }

    /// Adds a freshly-started container straight into the warm queue.
    pub async fn admit(&self, container: WarmContainer) {
        self.release(container).await;
    }

    pub async fn size(&self, function_id: i32) -> usize {
        let queues = self.queues.lock().await;
        queues.get(&function_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Snapshot of every warm container currently queued for `function_id`,
    /// for the maintainer to reconcile against reality without holding the
    /// lock during driver calls.
    pub async fn snapshot(&self, function_id: i32) -> Vec<WarmContainer> {
        let queues = self.queues.lock().await;
        queues
            .get(&function_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Replaces the queue for `function_id` wholesale, used by the
    /// maintainer after it has decided which containers survive a tick.
    pub async fn replace(&self, function_id: i32, containers: Vec<WarmContainer>) {
        let mut queues = self.queues.lock().await;
        queues.insert(function_id, containers.into_iter().collect());
    }

    /// Every function id currently tracked, warm or not.
    pub async fn tracked_functions(&self) -> Vec<i32> {
        let queues = self.queues.lock().await;
        queues.keys().copied().collect()
    }

    /// Container ids claimed by *any* function's queue. Used by stranded
    /// reconciliation (spec §4.2 step 5), which must never dispose a
    /// container that belongs to another function's pool just because it
    /// shares that function's image.
    pub async fn all_container_ids(&self) -> std::collections::HashSet<String> {
        let queues = self.queues.lock().await;
        queues
            .values()
            .flat_map(|q| q.iter().map(|c| c.container_id.clone()))
            .collect()
    }

    /// Removes `function_id`'s queue entirely, handing every container it
    /// held back to the caller for disposal. Used by the registry bridge on
    /// function delete and by lifecycle shutdown's drain.
    pub async fn drop_queue(&self, function_id: i32) -> Vec<WarmContainer> {
        let mut queues = self.queues.lock().await;
        queues
            .remove(&function_id)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Removes every queue, handing back the full set of warm containers
    /// for disposal. Used by lifecycle shutdown.
    pub async fn drain_all(&self) -> Vec<WarmContainer> {
        let mut queues = self.queues.lock().await;
        let drained = queues.drain().flat_map(|(_, q)| q.into_iter()).collect();
        drained
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedPool = Arc<Pool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_fifo() {
        let pool = Pool::new();
        pool.admit(WarmContainer {
            container_id: "a".into(),
            function_id: 1,
        })
        .await;
        pool.admit(WarmContainer {
            container_id: "b".into(),
            function_id: 1,
        })
        .await;

        let first = pool.acquire(1).await.unwrap();
        assert_eq!(first.container_id, "a");
        let second = pool.acquire(1).await.unwrap();
        assert_eq!(second.container_id, "b");
        assert!(pool.acquire(1).await.is_none());
    }

    #[tokio::test]
    async fn acquire_on_unknown_function_is_none() {
        let pool = Pool::new();
        assert!(pool.acquire(42).await.is_none());
    }

    #[tokio::test]
    async fn release_then_acquire_round_trips() {
        let pool = Pool::new();
        let container = WarmContainer {
            container_id: "c".into(),
            function_id: 7,
        };
        pool.release(container.clone()).await;
        assert_eq!(pool.size(7).await, 1);
        let popped = pool.acquire(7).await.unwrap();
        assert_eq!(popped.container_id, container.container_id);
        assert_eq!(pool.size(7).await, 0);
    }

    #[tokio::test]
    async fn pools_are_isolated_per_function() {
        let pool = Pool::new();
        pool.admit(WarmContainer {
            container_id: "x".into(),
            function_id: 1,
        })
        .await;
        pool.admit(WarmContainer {
            container_id: "y".into(),
            function_id: 2,
        })
        .await;

        assert_eq!(pool.size(1).await, 1);
        assert_eq!(pool.size(2).await, 1);
        let popped = pool.acquire(1).await.unwrap();
        assert_eq!(popped.function_id, 1);
        assert_eq!(pool.size(2).await, 1);
    }

    #[tokio::test]
    async fn drop_queue_empties_one_function_and_returns_its_containers() {
        let pool = Pool::new();
        pool.admit(WarmContainer {
            container_id: "a".into(),
            function_id: 1,
        })
        .await;
        pool.admit(WarmContainer {
            container_id: "b".into(),
            function_id: 2,
        })
        .await;

        let dropped = pool.drop_queue(1).await;
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].container_id, "a");
        assert_eq!(pool.size(1).await, 0);
        assert_eq!(pool.size(2).await, 1);
    }

    #[tokio::test]
    async fn drain_all_empties_every_queue() {
        let pool = Pool::new();
        pool.admit(WarmContainer {
            container_id: "a".into(),
            function_id: 1,
        })
        .await;
        pool.admit(WarmContainer {
            container_id: "b".into(),
            function_id: 2,
        })
        .await;

        let drained = pool.drain_all().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(pool.size(1).await, 0);
        assert_eq!(pool.size(2).await, 0);
        assert!(pool.tracked_functions().await.is_empty());
    }

    #[tokio::test]
    async fn all_container_ids_spans_every_function_queue() {
        let pool = Pool::new();
        pool.admit(WarmContainer {
            container_id: "a".into(),
            function_id: 1,
        })
        .await;
        pool.admit(WarmContainer {
            container_id: "b".into(),
            function_id: 2,
        })
        .await;

        let ids = pool.all_container_ids().await;
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a"));
        assert!(ids.contains("b"));
    }
}
