use crate::shared::error::{AppResult, RuntimeError};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StatsOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Resource caps applied to every warm container. Non-negotiable per spec:
/// 128 MiB memory, no network, read-only bind mount of the handler volume.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub command: Vec<String>,
    pub memory_limit_bytes: i64,
    pub network_mode: String,
    pub volume_host_path: String,
    pub volume_container_path: String,
}

/// Parsed subset of the driver's raw stats payload (mirrors Docker's
/// `cpu_stats`/`precpu_stats`/`memory_stats` shape referenced in spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub num_cpus: usize,
    pub memory_usage_bytes: u64,
}

impl ContainerStats {
    /// `(cpu_delta / system_delta) * num_cpus * 100`, per spec §4.4 step 6.
    pub fn cpu_usage_percent(&self) -> Option<f64> {
        let cpu_delta = self.cpu_total_usage.checked_sub(self.precpu_total_usage)?;
        let system_delta = self
            .system_cpu_usage
            .checked_sub(self.presystem_cpu_usage)?;
        if system_delta == 0 || self.num_cpus == 0 {
            return None;
        }
        Some((cpu_delta as f64 / system_delta as f64) * self.num_cpus as f64 * 100.0)
    }

    pub fn memory_usage_mb(&self) -> f64 {
        self.memory_usage_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverContainerStatus {
    Created,
    Running,
    Other,
}

impl DriverContainerStatus {
    pub fn is_usable(self) -> bool {
        matches!(self, DriverContainerStatus::Created | DriverContainerStatus::Running)
    }
}

/// Result of an `exec` call: exit code plus combined stdout/stderr.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub output: String,
}

/// The only capabilities the invocation core needs from a container runtime
/// (spec §6). Kept object-safe and async so the Pool/Maintainer/Invoker can
/// be exercised against a `MockDriver` in tests without a live daemon.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn run(&self, spec: ContainerSpec) -> AppResult<String>;
    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        env: HashMap<String, String>,
    ) -> AppResult<ExecOutcome>;
    async fn stats(&self, container_id: &str) -> AppResult<ContainerStats>;
    async fn reload(&self, container_id: &str) -> AppResult<DriverContainerStatus>;
    async fn stop(&self, container_id: &str) -> AppResult<()>;
    async fn remove(&self, container_id: &str) -> AppResult<()>;
    async fn list_by_ancestor(&self, image: &str) -> AppResult<Vec<String>>;
}

/// `bollard`-backed driver talking to the local Docker daemon.
pub struct BollardDriver {
    docker: Docker,
}

impl BollardDriver {
    pub fn connect() -> AppResult<Self> {
        let docker = Docker::connect_with_http_defaults()
            .map_err(|e| RuntimeError::Driver(format!("failed to connect to Docker: {e}")))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerDriver for BollardDriver {
    async fn run(&self, spec: ContainerSpec) -> AppResult<String> {
        let mut volumes = HashMap::new();
        volumes.insert(
            spec.volume_container_path.clone(),
            HashMap::<(), ()>::new(),
        );

        let host_config = HostConfig {
            memory: Some(spec.memory_limit_bytes),
            network_mode: Some(spec.network_mode.clone()),
            binds: Some(vec![format!(
                "{}:{}:ro",
                spec.volume_host_path, spec.volume_container_path
            )]),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RuntimeError::Driver(format!("create_container failed: {e}")))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| RuntimeError::Driver(format!("start_container failed: {e}")))?;

        debug!(container_id = %created.id, image = %spec.image, "started warm container");
        Ok(created.id)
    }

    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        env: HashMap<String, String>,
    ) -> AppResult<ExecOutcome> {
        let env_vec: Vec<String> = env.into_iter().map(|(k, v)| format!("{k}={v}")).collect();

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(command),
                    env: Some(env_vec),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RuntimeError::Exec(format!("create_exec failed: {e}")))?;

        let mut combined = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::Exec(format!("start_exec failed: {e}")))?
        {
            while let Some(Ok(chunk)) = output.next().await {
                match chunk {
                    LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                        combined.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::Exec(format!("inspect_exec failed: {e}")))?;

        let exit_code = inspect.exit_code.unwrap_or(-1);
        Ok(ExecOutcome {
            exit_code,
            output: combined,
        })
    }

    async fn stats(&self, container_id: &str) -> AppResult<ContainerStats> {
        let mut stream = self.docker.stats(
            container_id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );

        let stats = stream
            .next()
            .await
            .ok_or_else(|| RuntimeError::Driver("no stats payload returned".to_string()))?
            .map_err(|e| RuntimeError::Driver(format!("stats failed: {e}")))?;

        let num_cpus = stats
            .cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(|v| v.len())
            .unwrap_or(1)
            .max(1);

        Ok(ContainerStats {
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            num_cpus,
            memory_usage_bytes: stats.memory_stats.usage.unwrap_or(0),
        })
    }

    async fn reload(&self, container_id: &str) -> AppResult<DriverContainerStatus> {
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| RuntimeError::Driver(format!("inspect_container failed: {e}")))?;

        let status = match inspect.state.and_then(|s| s.status) {
            Some(ContainerStateStatusEnum::RUNNING) => DriverContainerStatus::Running,
            Some(ContainerStateStatusEnum::CREATED) => DriverContainerStatus::Created,
            _ => DriverContainerStatus::Other,
        };
        Ok(status)
    }

    async fn stop(&self, container_id: &str) -> AppResult<()> {
        // Already-stopped containers are not an error for our purposes.
        let _ = self.docker.stop_container(container_id, None).await;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> AppResult<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeError::Driver(format!("remove_container failed: {e}")))?;
        Ok(())
    }

    async fn list_by_ancestor(&self, image: &str) -> AppResult<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("ancestor".to_string(), vec![image.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::Driver(format!("list_containers failed: {e}")))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}
