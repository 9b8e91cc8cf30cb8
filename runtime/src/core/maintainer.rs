use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::core::driver::{ContainerDriver, ContainerSpec, DriverContainerStatus};
use crate::core::function::FunctionSpec;
use crate::core::pool::{Pool, WarmContainer};
use crate::shared::error::AppResult;
use crate::shared::utils::random_container_name;

const SETTLE_DELAY_ATTEMPTS: u32 = 3;
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Keeps one function's pool at `pool_size`, reaping dead/excess/stranded
/// containers. Idempotent — safe to call repeatedly, including concurrently
/// for different functions.
pub struct Maintainer<D: ContainerDriver> {
    driver: Arc<D>,
    pool: Arc<Pool>,
    pool_size: usize,
    memory_limit_bytes: i64,
    network_mode: String,
    volume_host_path: String,
    volume_container_path: String,
    /// Observation counter for containers seen unclaimed under a given
    /// image on a maintainer tick but not owned by any known pool queue.
    /// A container is only disposed as stranded after two consecutive
    /// observations, mitigating a race where two functions share an image
    /// and each momentarily appears to own the other's in-flight container.
    stranded_observations: DashMap<String, u8>,
}

impl<D: ContainerDriver> Maintainer<D> {
    pub fn new(
        driver: Arc<D>,
        pool: Arc<Pool>,
        pool_size: usize,
        memory_limit_bytes: i64,
        network_mode: String,
        volume_host_path: String,
        volume_container_path: String,
    ) -> Self {
        Self {
            driver,
            pool,
            pool_size,
            memory_limit_bytes,
            network_mode,
            volume_host_path,
            volume_container_path,
            stranded_observations: DashMap::new(),
        }
    }

    /// Brings `function`'s pool to `pool_size`: drop dead containers, trim
    /// excess, refill via fresh `Driver.run` calls, then reconcile any
    /// containers running the function's image but absent from the queue.
    pub async fn maintain(&self, function: &FunctionSpec) -> AppResult<()> {
        let snapshot = self.pool.snapshot(function.id).await;

        let mut live = Vec::with_capacity(snapshot.len());
        for container in snapshot {
            match self.driver.reload(&container.container_id).await {
                Ok(status) if status.is_usable() => live.push(container),
                Ok(_) => debug!(container_id = %container.container_id, "dropping dead container from pool"),
                Err(e) => warn!(container_id = %container.container_id, error = %e, "reload failed, dropping container"),
            }
        }

        let (keep, excess) = if live.len() > self.pool_size {
            live.split_at(self.pool_size)
        } else {
            (live.as_slice(), [].as_slice())
        };
        let mut keep: Vec<WarmContainer> = keep.to_vec();

        for container in excess {
            self.dispose(&container.container_id).await;
        }

        let deficit = self.pool_size.saturating_sub(keep.len());
        for _ in 0..deficit {
            match self.start_one(function).await {
                Ok(container) => keep.push(container),
                Err(e) => warn!(function_id = function.id, error = %e, "failed to start replacement warm container"),
            }
        }

        self.pool.replace(function.id, keep.clone()).await;
        self.reconcile_stranded(function, &keep).await;

        Ok(())
    }

    /// Starts exactly one fresh warm container for `function` with the
    /// §4.2 step 4 parameters, without touching any pool queue. Shared by
    /// `maintain`'s refill loop and the Invoker's cold-start path (spec
    /// §4.4 step 2), so both go through one `Driver.run` call site and one
    /// settle-retry policy.
    pub(crate) async fn start_one(&self, function: &FunctionSpec) -> AppResult<WarmContainer> {
        let spec = ContainerSpec {
            image: function.image_name.clone(),
            name: random_container_name(function.id),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            memory_limit_bytes: self.memory_limit_bytes,
            network_mode: self.network_mode.clone(),
            volume_host_path: self.volume_host_path.clone(),
            volume_container_path: self.volume_container_path.clone(),
        };

        let container_id = self.driver.run(spec).await?;

        for attempt in 0..SETTLE_DELAY_ATTEMPTS {
            match self.driver.reload(&container_id).await {
                Ok(status) if status.is_usable() => break,
                _ if attempt + 1 < SETTLE_DELAY_ATTEMPTS => sleep(SETTLE_DELAY).await,
                _ => sleep(Duration::from_secs(1)).await,
            }
        }

        info!(container_id = %container_id, function_id = function.id, "started warm container");
        Ok(WarmContainer {
            container_id,
            function_id: function.id,
        })
    }

    async fn dispose(&self, container_id: &str) {
        if let Err(e) = self.driver.stop(container_id).await {
            warn!(container_id, error = %e, "stop failed during disposal");
        }
        if let Err(e) = self.driver.remove(container_id).await {
            warn!(container_id, error = %e, "remove failed during disposal");
        }
    }

    /// Finds containers running this function's image that no known queue
    /// — this function's or any other's, since images may be shared across
    /// functions (spec §4.2 step 5) — currently claims, and disposes them
    /// once they've been seen unclaimed on two consecutive ticks.
    async fn reconcile_stranded(&self, function: &FunctionSpec, keep: &[WarmContainer]) {
        let running = match self.driver.list_by_ancestor(&function.image_name).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(image = %function.image_name, error = %e, "list_by_ancestor failed, skipping stranded reconciliation");
                return;
            }
        };

        let mut claimed: std::collections::HashSet<String> = self.pool.all_container_ids().await;
        claimed.extend(keep.iter().map(|c| c.container_id.clone()));

        let mut still_stranded = std::collections::HashSet::new();

        for container_id in running {
            if claimed.contains(container_id.as_str()) {
                continue;
            }
            still_stranded.insert(container_id.clone());

            let observations = self
                .stranded_observations
                .entry(container_id.clone())
                .or_insert(0);
            let count = *observations + 1;
            drop(observations);
            self.stranded_observations.insert(container_id.clone(), count);

            if count >= 2 {
                warn!(container_id = %container_id, "disposing container stranded across two maintainer ticks");
                self.dispose(&container_id).await;
                self.stranded_observations.remove(&container_id);
            }
        }

        // Anything no longer observed running is no longer a candidate.
        self.stranded_observations
            .retain(|id, _| still_stranded.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::{ContainerStats, ExecOutcome};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct MockDriver {
        run_calls: AtomicUsize,
        live_ids: TokioMutex<std::collections::HashSet<String>>,
        ancestor_ids: TokioMutex<Vec<String>>,
    }

    impl MockDriver {
        fn new() -> Self {
            Self {
                run_calls: AtomicUsize::new(0),
                live_ids: TokioMutex::new(std::collections::HashSet::new()),
                ancestor_ids: TokioMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerDriver for MockDriver {
        async fn run(&self, _spec: ContainerSpec) -> AppResult<String> {
            let n = self.run_calls.fetch_add(1, Ordering::SeqCst);
            let id = format!("mock-{n}");
            self.live_ids.lock().await.insert(id.clone());
            Ok(id)
        }

        async fn exec(
            &self,
            _container_id: &str,
            _command: Vec<String>,
            _env: HashMap<String, String>,
        ) -> AppResult<ExecOutcome> {
            Ok(ExecOutcome {
                exit_code: 0,
                output: String::new(),
            })
        }

        async fn stats(&self, _container_id: &str) -> AppResult<ContainerStats> {
            Ok(ContainerStats::default())
        }

        async fn reload(&self, container_id: &str) -> AppResult<DriverContainerStatus> {
            if self.live_ids.lock().await.contains(container_id) {
                Ok(DriverContainerStatus::Running)
            } else {
                Ok(DriverContainerStatus::Other)
            }
        }

        async fn stop(&self, _container_id: &str) -> AppResult<()> {
            Ok(())
        }

        async fn remove(&self, container_id: &str) -> AppResult<()> {
            self.live_ids.lock().await.remove(container_id);
            Ok(())
        }

        async fn list_by_ancestor(&self, _image: &str) -> AppResult<Vec<String>> {
            Ok(self.ancestor_ids.lock().await.clone())
        }
    }

    fn function() -> FunctionSpec {
        FunctionSpec {
            id: 1,
            route: "/echo".to_string(),
            language: crate::core::handler_store::Language::Python,
            timeout_seconds: 5,
            image_name: "invok/python:3.11".to_string(),
        }
    }

    #[tokio::test]
    async fn maintain_refills_empty_pool_to_pool_size() {
        let driver = Arc::new(MockDriver::new());
        let pool = Arc::new(Pool::new());
        let maintainer = Maintainer::new(
            driver.clone(),
            pool.clone(),
            2,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        );

        maintainer.maintain(&function()).await.unwrap();
        assert_eq!(pool.size(1).await, 2);
    }

    #[tokio::test]
    async fn maintain_trims_excess_to_pool_size() {
        let driver = Arc::new(MockDriver::new());
        let pool = Arc::new(Pool::new());
        for i in 0..4 {
            let id = format!("pre-{i}");
            driver.live_ids.lock().await.insert(id.clone());
            pool.admit(WarmContainer {
                container_id: id,
                function_id: 1,
            })
            .await;
        }

        let maintainer = Maintainer::new(
            driver,
            pool.clone(),
            2,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        );

        maintainer.maintain(&function()).await.unwrap();
        assert_eq!(pool.size(1).await, 2);
    }

    #[tokio::test]
    async fn maintain_drops_dead_containers() {
        let driver = Arc::new(MockDriver::new());
        let pool = Arc::new(Pool::new());
        pool.admit(WarmContainer {
            container_id: "dead".to_string(),
            function_id: 1,
        })
        .await;

        let maintainer = Maintainer::new(
            driver,
            pool.clone(),
            1,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        );

        maintainer.maintain(&function()).await.unwrap();
        // the dead container is gone and a fresh one replaced it
        assert_eq!(pool.size(1).await, 1);
        let survivor = pool.acquire(1).await.unwrap();
        assert_ne!(survivor.container_id, "dead");
    }

    #[tokio::test]
    async fn stranded_container_needs_two_ticks_before_disposal() {
        let driver = Arc::new(MockDriver::new());
        let pool = Arc::new(Pool::new());
        driver
            .live_ids
            .lock()
            .await
            .insert("stranded-1".to_string());
        *driver.ancestor_ids.lock().await = vec!["stranded-1".to_string()];

        let maintainer = Maintainer::new(
            driver.clone(),
            pool.clone(),
            0,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        );

        maintainer.maintain(&function()).await.unwrap();
        assert!(driver.live_ids.lock().await.contains("stranded-1"));

        maintainer.maintain(&function()).await.unwrap();
        assert!(!driver.live_ids.lock().await.contains("stranded-1"));
    }

    #[tokio::test]
    async fn stranded_reconciliation_never_disposes_another_functions_container() {
        let driver = Arc::new(MockDriver::new());
        let pool = Arc::new(Pool::new());

        // function 2's warm container, sharing function 1's image.
        driver.live_ids.lock().await.insert("other-fn-1".to_string());
        pool.admit(WarmContainer {
            container_id: "other-fn-1".to_string(),
            function_id: 2,
        })
        .await;
        *driver.ancestor_ids.lock().await = vec!["other-fn-1".to_string()];

        let maintainer = Maintainer::new(
            driver.clone(),
            pool.clone(),
            0,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        );

        // two ticks of function 1's maintenance, the window in which a
        // same-image container would otherwise be disposed as "stranded".
        maintainer.maintain(&function()).await.unwrap();
        maintainer.maintain(&function()).await.unwrap();

        assert!(driver.live_ids.lock().await.contains("other-fn-1"));
        assert_eq!(pool.size(2).await, 1);
    }
}
