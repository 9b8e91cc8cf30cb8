use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, warn};

use crate::core::driver::ContainerDriver;
use crate::core::function::FunctionSpec;
use crate::core::maintainer::Maintainer;
use crate::core::pool::Pool;

/// A lightweight, no-`PAYLOAD` command used only to confirm a warm container
/// still responds to `exec`. Deliberately not the handler itself (spec §9:
/// re-running the handler without `PAYLOAD` makes every handler that reads
/// it fail once per tick, producing fake-error noise).
const WARMUP_PING_COMMAND: &[&str] = &["true"];

/// Supplies the current function list on each tick. Implemented by
/// `serverless_core::db::function_repo` in production; trivially mockable
/// in tests.
#[async_trait::async_trait]
pub trait FunctionSource: Send + Sync {
    async fn list_functions(&self) -> crate::shared::error::AppResult<Vec<FunctionSpec>>;
}

/// Runs `Maintainer.maintain` for every function on a fixed interval, then
/// issues a warmup ping against each now-warm container. Exec failures
/// during the ping are logged but never remove a container — the next
/// tick's `maintain` call is the only place dead containers are reaped.
pub async fn run_warmup_loop<D: ContainerDriver + 'static>(
    driver: Arc<D>,
    pool: Arc<Pool>,
    maintainer: Arc<Maintainer<D>>,
    source: Arc<dyn FunctionSource>,
    interval_seconds: u64,
) {
    let mut ticker = interval(Duration::from_secs(interval_seconds));
    loop {
        ticker.tick().await;
        tick(&driver, &pool, &maintainer, source.as_ref()).await;
    }
}

async fn tick<D: ContainerDriver>(
    driver: &Arc<D>,
    pool: &Arc<Pool>,
    maintainer: &Maintainer<D>,
    source: &dyn FunctionSource,
) {
    let functions = match source.list_functions().await {
        Ok(functions) => functions,
        Err(e) => {
            warn!(error = %e, "warmup tick: failed to list functions");
            return;
        }
    };

    for function in &functions {
        if let Err(e) = maintainer.maintain(function).await {
            warn!(function_id = function.id, error = %e, "warmup tick: maintain failed");
            continue;
        }

        for container in pool.snapshot(function.id).await {
            let ping = driver
                .exec(
                    &container.container_id,
                    WARMUP_PING_COMMAND.iter().map(|s| s.to_string()).collect(),
                    Default::default(),
                )
                .await;

            match ping {
                Ok(outcome) if outcome.exit_code == 0 => {
                    debug!(container_id = %container.container_id, "warmup ping ok")
                }
                Ok(outcome) => warn!(
                    container_id = %container.container_id,
                    exit_code = outcome.exit_code,
                    "warmup ping returned non-zero, leaving container in place"
                ),
                Err(e) => warn!(
                    container_id = %container.container_id,
                    error = %e,
                    "warmup ping exec failed, leaving container in place"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::{ContainerSpec, ContainerStats, DriverContainerStatus, ExecOutcome};
    use crate::core::handler_store::Language;
    use crate::core::pool::WarmContainer;
    use crate::shared::error::AppResult;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDriver {
        exec_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContainerDriver for StubDriver {
        async fn run(&self, _spec: ContainerSpec) -> AppResult<String> {
            Ok("stub".to_string())
        }

        async fn exec(
            &self,
            _container_id: &str,
            _command: Vec<String>,
            _env: HashMap<String, String>,
        ) -> AppResult<ExecOutcome> {
            self.exec_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecOutcome {
                exit_code: 0,
                output: String::new(),
            })
        }

        async fn stats(&self, _container_id: &str) -> AppResult<ContainerStats> {
            Ok(ContainerStats::default())
        }

        async fn reload(&self, _container_id: &str) -> AppResult<DriverContainerStatus> {
            Ok(DriverContainerStatus::Running)
        }

        async fn stop(&self, _container_id: &str) -> AppResult<()> {
            Ok(())
        }

        async fn remove(&self, _container_id: &str) -> AppResult<()> {
            Ok(())
        }

        async fn list_by_ancestor(&self, _image: &str) -> AppResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct StubSource(Vec<FunctionSpec>);

    #[async_trait::async_trait]
    impl FunctionSource for StubSource {
        async fn list_functions(&self) -> AppResult<Vec<FunctionSpec>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn tick_pings_every_warm_container() {
        let driver = Arc::new(StubDriver {
            exec_calls: AtomicUsize::new(0),
        });
        let pool = Arc::new(Pool::new());
        pool.admit(WarmContainer {
            container_id: "c1".to_string(),
            function_id: 1,
        })
        .await;
        pool.admit(WarmContainer {
            container_id: "c2".to_string(),
            function_id: 1,
        })
        .await;

        let maintainer = Maintainer::new(
            driver.clone(),
            pool.clone(),
            2,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        );

        let function = FunctionSpec {
            id: 1,
            route: "/echo".to_string(),
            language: Language::Python,
            timeout_seconds: 5,
            image_name: "invok/python:3.11".to_string(),
        };
        let source = Arc::new(StubSource(vec![function]));

        tick(&driver, &pool, &maintainer, source.as_ref()).await;
        assert_eq!(driver.exec_calls.load(Ordering::SeqCst), 2);
    }
}
