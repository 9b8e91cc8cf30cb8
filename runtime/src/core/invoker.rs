use std::sync::Arc;
use std::time::Instant;

use tokio::time::{timeout, Duration};
use tracing::{error, warn};

use crate::core::driver::ContainerDriver;
use crate::core::function::{FunctionSpec, InvocationRecord};
use crate::core::handler_store::HandlerStore;
use crate::core::maintainer::Maintainer;
use crate::core::pool::{Pool, WarmContainer};
use crate::shared::error::AppResult;

/// Runs one invocation end to end: acquire-or-cold-start, build the exec
/// command, run it under the function's declared timeout, collect stats,
/// decide reuse-or-dispose, and hand back a fully-populated
/// `InvocationRecord` for the caller to persist.
pub struct Invoker<D: ContainerDriver, H: HandlerStore> {
    driver: Arc<D>,
    pool: Arc<Pool>,
    maintainer: Arc<Maintainer<D>>,
    handler_store: Arc<H>,
}

impl<D: ContainerDriver, H: HandlerStore> Invoker<D, H> {
    pub fn new(
        driver: Arc<D>,
        pool: Arc<Pool>,
        maintainer: Arc<Maintainer<D>>,
        handler_store: Arc<H>,
    ) -> Self {
        Self {
            driver,
            pool,
            maintainer,
            handler_store,
        }
    }

    pub async fn invoke(&self, function: &FunctionSpec, payload_json: &str) -> InvocationRecord {
        let start = Instant::now();
        let payload_size = payload_json.len() as i64;

        let acquired = match self.pool.acquire(function.id).await {
            Some(container) => Ok(container),
            None => self.cold_start(function).await,
        };

        let container = match acquired {
            Ok(container) => container,
            Err(e) => {
                error!(function_id = function.id, error = %e, "failed to acquire or cold-start a container");
                return InvocationRecord {
                    function_id: function.id,
                    execution_time_ms: start.elapsed().as_millis() as i64,
                    status_code: 500,
                    container_id: None,
                    memory_usage_mb: None,
                    cpu_usage_percent: None,
                    error: Some(e.to_string()),
                    payload_size,
                    output: String::new(),
                };
            }
        };

        let container_path = self
            .handler_store
            .container_path(function.id, function.language);
        let command = function.handler_command(&container_path);

        let mut env = std::collections::HashMap::new();
        env.insert("PAYLOAD".to_string(), payload_json.to_string());

        let exec_result = timeout(
            Duration::from_secs(function.timeout_seconds),
            self.driver.exec(&container.container_id, command, env),
        )
        .await;

        let stats = self.driver.stats(&container.container_id).await.ok();
        let (memory_usage_mb, cpu_usage_percent) = match &stats {
            Some(s) => (Some(s.memory_usage_mb()), s.cpu_usage_percent()),
            None => (None, None),
        };

        let record = match exec_result {
            Err(_) => {
                warn!(container_id = %container.container_id, timeout_seconds = function.timeout_seconds, "exec timed out");
                self.dispose(container.clone()).await;
                InvocationRecord {
                    function_id: function.id,
                    execution_time_ms: start.elapsed().as_millis() as i64,
                    status_code: 500,
                    container_id: Some(container.container_id),
                    memory_usage_mb,
                    cpu_usage_percent,
                    error: Some("execution timed out".to_string()),
                    payload_size,
                    output: String::new(),
                }
            }
            Ok(Err(e)) => {
                warn!(container_id = %container.container_id, error = %e, "exec call failed at the driver level");
                self.dispose(container.clone()).await;
                InvocationRecord {
                    function_id: function.id,
                    execution_time_ms: start.elapsed().as_millis() as i64,
                    status_code: 500,
                    container_id: Some(container.container_id),
                    memory_usage_mb,
                    cpu_usage_percent,
                    error: Some(e.to_string()),
                    payload_size,
                    output: String::new(),
                }
            }
            Ok(Ok(outcome)) if outcome.exit_code == 0 => {
                self.pool.release(container.clone()).await;
                InvocationRecord {
                    function_id: function.id,
                    execution_time_ms: start.elapsed().as_millis() as i64,
                    status_code: 0,
                    container_id: Some(container.container_id),
                    memory_usage_mb,
                    cpu_usage_percent,
                    error: None,
                    payload_size,
                    output: outcome.output,
                }
            }
            Ok(Ok(outcome)) => {
                self.dispose(container.clone()).await;
                InvocationRecord {
                    function_id: function.id,
                    execution_time_ms: start.elapsed().as_millis() as i64,
                    status_code: outcome.exit_code as i32,
                    container_id: Some(container.container_id),
                    memory_usage_mb,
                    cpu_usage_percent,
                    error: Some(outcome.output),
                    payload_size,
                    output: String::new(),
                }
            }
        };

        record
    }

    /// Spec §4.4 step 2: on a pool miss, start exactly one container with
    /// the §4.2 step 4 parameters and use it directly — never runs the full
    /// `maintain` refill loop here, since that snapshots and unconditionally
    /// overwrites the whole queue, which would both swallow the driver's own
    /// error behind a generic message and race destructively against other
    /// concurrent cold starts for the same function.
    async fn cold_start(&self, function: &FunctionSpec) -> AppResult<WarmContainer> {
        self.maintainer.start_one(function).await
    }

    async fn dispose(&self, container: WarmContainer) {
        if let Err(e) = self.driver.stop(&container.container_id).await {
            warn!(container_id = %container.container_id, error = %e, "stop failed during post-invocation disposal");
        }
        if let Err(e) = self.driver.remove(&container.container_id).await {
            warn!(container_id = %container.container_id, error = %e, "remove failed during post-invocation disposal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::{ContainerSpec, ContainerStats, DriverContainerStatus, ExecOutcome};
    use crate::core::handler_store::Language;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ScriptedDriver {
        run_calls: AtomicUsize,
        exit_code: i64,
        output: String,
        removed: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerDriver for ScriptedDriver {
        async fn run(&self, _spec: ContainerSpec) -> AppResult<String> {
            let n = self.run_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("scripted-{n}"))
        }

        async fn exec(
            &self,
            _container_id: &str,
            _command: Vec<String>,
            _env: HashMap<String, String>,
        ) -> AppResult<ExecOutcome> {
            Ok(ExecOutcome {
                exit_code: self.exit_code,
                output: self.output.clone(),
            })
        }

        async fn stats(&self, _container_id: &str) -> AppResult<ContainerStats> {
            Ok(ContainerStats {
                cpu_total_usage: 200,
                precpu_total_usage: 100,
                system_cpu_usage: 2000,
                presystem_cpu_usage: 1000,
                num_cpus: 2,
                memory_usage_bytes: 1024 * 1024 * 10,
            })
        }

        async fn reload(&self, _container_id: &str) -> AppResult<DriverContainerStatus> {
            Ok(DriverContainerStatus::Running)
        }

        async fn stop(&self, _container_id: &str) -> AppResult<()> {
            Ok(())
        }

        async fn remove(&self, container_id: &str) -> AppResult<()> {
            self.removed.lock().unwrap().push(container_id.to_string());
            Ok(())
        }

        async fn list_by_ancestor(&self, _image: &str) -> AppResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct StubHandlerStore;

    #[async_trait]
    impl HandlerStore for StubHandlerStore {
        async fn write_handler(
            &self,
            _function_id: i32,
            _language: Language,
            _code: &str,
        ) -> AppResult<()> {
            Ok(())
        }

        async fn remove_handler(&self, _function_id: i32) -> AppResult<()> {
            Ok(())
        }

        fn container_path(&self, function_id: i32, language: Language) -> String {
            format!("/functions/{function_id}/handler.{}", language.extension())
        }
    }

    fn function() -> FunctionSpec {
        FunctionSpec {
            id: 1,
            route: "/echo".to_string(),
            language: Language::Python,
            timeout_seconds: 5,
            image_name: "invok/python:3.11".to_string(),
        }
    }

    fn build_invoker(
        driver: Arc<ScriptedDriver>,
        pool_size: usize,
    ) -> (Invoker<ScriptedDriver, StubHandlerStore>, Arc<Pool>) {
        let pool = Arc::new(Pool::new());
        let maintainer = Arc::new(Maintainer::new(
            driver.clone(),
            pool.clone(),
            pool_size,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        ));
        let handler_store = Arc::new(StubHandlerStore);
        (
            Invoker::new(driver, pool.clone(), maintainer, handler_store),
            pool,
        )
    }

    #[tokio::test]
    async fn successful_exec_reuses_container_and_reports_status_zero() {
        let driver = Arc::new(ScriptedDriver {
            run_calls: AtomicUsize::new(0),
            exit_code: 0,
            output: "{\"echo\":{\"x\":1}}".to_string(),
            removed: StdMutex::new(Vec::new()),
        });
        let (invoker, pool) = build_invoker(driver, 1);

        let record = invoker.invoke(&function(), "{\"x\":1}").await;
        assert_eq!(record.status_code, 0);
        assert!(record.error.is_none());
        assert_eq!(record.output, "{\"echo\":{\"x\":1}}");
        assert!(record.container_id.is_some());
        // container went back to the pool for reuse
        assert_eq!(pool.size(1).await, 1);
    }

    #[tokio::test]
    async fn nonzero_exit_is_function_error_and_disposes_container() {
        let driver = Arc::new(ScriptedDriver {
            run_calls: AtomicUsize::new(0),
            exit_code: 1,
            output: "Traceback...".to_string(),
            removed: StdMutex::new(Vec::new()),
        });
        let (invoker, pool) = build_invoker(driver.clone(), 1);

        let record = invoker.invoke(&function(), "{}").await;
        assert_eq!(record.status_code, 1);
        assert_eq!(record.error.as_deref(), Some("Traceback..."));
        assert_eq!(record.output, "");
        assert_eq!(pool.size(1).await, 0);
        assert_eq!(driver.removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cold_start_creates_exactly_one_container_on_pool_miss() {
        let driver = Arc::new(ScriptedDriver {
            run_calls: AtomicUsize::new(0),
            exit_code: 0,
            output: "ok".to_string(),
            removed: StdMutex::new(Vec::new()),
        });
        let (invoker, _pool) = build_invoker(driver.clone(), 2);

        let record = invoker.invoke(&function(), "{}").await;
        assert_eq!(record.status_code, 0);
        // cold start runs exactly one container directly, never the full
        // pool_size refill a `maintain` call would perform.
        assert_eq!(driver.run_calls.load(Ordering::SeqCst), 1);
    }

    struct FailingRunDriver;

    #[async_trait]
    impl ContainerDriver for FailingRunDriver {
        async fn run(&self, _spec: ContainerSpec) -> AppResult<String> {
            Err(crate::shared::error::RuntimeError::Driver(
                "docker daemon unreachable".to_string(),
            ))
        }

        async fn exec(
            &self,
            _container_id: &str,
            _command: Vec<String>,
            _env: HashMap<String, String>,
        ) -> AppResult<ExecOutcome> {
            unreachable!("no container was ever created")
        }

        async fn stats(&self, _container_id: &str) -> AppResult<ContainerStats> {
            unreachable!("no container was ever created")
        }

        async fn reload(&self, _container_id: &str) -> AppResult<DriverContainerStatus> {
            unreachable!("no container was ever created")
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

    #[tokio::test]
    async fn cold_start_failure_surfaces_the_drivers_own_error_text() {
        let driver = Arc::new(FailingRunDriver);
        let pool = Arc::new(Pool::new());
        let maintainer = Arc::new(Maintainer::new(
            driver.clone(),
            pool.clone(),
            1,
            128 * 1024 * 1024,
            "none".to_string(),
            "/functions".to_string(),
            "/functions".to_string(),
        ));
        let handler_store = Arc::new(StubHandlerStore);
        let invoker = Invoker::new(driver, pool.clone(), maintainer, handler_store);

        let record = invoker.invoke(&function(), "{}").await;
        assert_eq!(record.status_code, 500);
        assert_eq!(record.container_id, None);
        assert_eq!(record.error.as_deref(), Some("Driver Error: docker daemon unreachable"));
        assert_eq!(pool.size(1).await, 0);
    }

    #[tokio::test]
    async fn metrics_are_computed_from_driver_stats() {
        let driver = Arc::new(ScriptedDriver {
            run_calls: AtomicUsize::new(0),
            exit_code: 0,
            output: String::new(),
            removed: StdMutex::new(Vec::new()),
        });
        let (invoker, _pool) = build_invoker(driver, 1);

        let record = invoker.invoke(&function(), "{}").await;
        assert_eq!(record.memory_usage_mb, Some(10.0));
        // (200-100)/(2000-1000) * 2 * 100 == 20.0
        assert_eq!(record.cpu_usage_percent, Some(20.0));
    }
}
