use std::env;

const POOL_SIZE: &str = "POOL_SIZE";
const WARMUP_INTERVAL_SECONDS: &str = "WARMUP_INTERVAL_SECONDS";
const CONTAINER_MEMORY_LIMIT_MB: &str = "CONTAINER_MEMORY_LIMIT_MB";
const CONTAINER_NETWORK_MODE: &str = "CONTAINER_NETWORK_MODE";
const SHARED_VOLUME_ROOT: &str = "SHARED_VOLUME_ROOT";

const DEFAULT_POOL_SIZE: usize = 2;
const DEFAULT_WARMUP_INTERVAL_SECONDS: u64 = 40;
const DEFAULT_CONTAINER_MEMORY_LIMIT_MB: i64 = 128;
const DEFAULT_CONTAINER_NETWORK_MODE: &str = "none";
const DEFAULT_SHARED_VOLUME_ROOT: &str = "/functions";

/// Runtime-wide tunables, env-driven the way the teacher's
/// `InvokFunctionConfig` loads its settings: one `env::var(..).ok().and_then(parse)`
/// per field, falling back to a named default constant.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub pool_size: usize,
    pub warmup_interval_seconds: u64,
    pub container_memory_limit_mb: i64,
    pub container_network_mode: String,
    pub shared_volume_root: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            pool_size: env::var(POOL_SIZE)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POOL_SIZE),
            warmup_interval_seconds: env::var(WARMUP_INTERVAL_SECONDS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WARMUP_INTERVAL_SECONDS),
            container_memory_limit_mb: env::var(CONTAINER_MEMORY_LIMIT_MB)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONTAINER_MEMORY_LIMIT_MB),
            container_network_mode: env::var(CONTAINER_NETWORK_MODE)
                .ok()
                .unwrap_or_else(|| DEFAULT_CONTAINER_NETWORK_MODE.to_string()),
            shared_volume_root: env::var(SHARED_VOLUME_ROOT)
                .ok()
                .unwrap_or_else(|| DEFAULT_SHARED_VOLUME_ROOT.to_string()),
        }
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        self.container_memory_limit_mb * 1024 * 1024
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            warmup_interval_seconds: DEFAULT_WARMUP_INTERVAL_SECONDS,
            container_memory_limit_mb: DEFAULT_CONTAINER_MEMORY_LIMIT_MB,
            container_network_mode: DEFAULT_CONTAINER_NETWORK_MODE.to_string(),
            shared_volume_root: DEFAULT_SHARED_VOLUME_ROOT.to_string(),
        }
    }
}
