use std::env;

use runtime::core::config::RuntimeConfig;
use thiserror::Error;

const DATABASE_URL: &str = "DATABASE_URL";
const HOST: &str = "HOST";
const PORT: &str = "PORT";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum InvokConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// HTTP-surface settings: bind address plus the registry/metric store
/// connection string. Everything about the invocation core itself lives in
/// `runtime::core::config::RuntimeConfig`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
}

/// Top-level config, env-driven in the same per-field
/// `env::var(..).ok().and_then(parse).unwrap_or(default)` style as the
/// teacher's `InvokFunctionConfig::from_env`, except `database_url` is
/// required — there is no sensible default connection string.
#[derive(Debug, Clone)]
pub struct InvokConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
}

impl InvokConfig {
    pub fn load() -> Result<Self, InvokConfigError> {
        let database_url =
            env::var(DATABASE_URL).map_err(|_| InvokConfigError::MissingEnv(DATABASE_URL.to_string()))?;

        let host = env::var(HOST).unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var(PORT)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                database_url,
            },
            runtime: RuntimeConfig::from_env(),
        })
    }
}
