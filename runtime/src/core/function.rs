use crate::core::handler_store::Language;

/// The subset of a registered function the invocation core needs. Mirrors
/// `db_entities::function::Model` field-for-field but keeps `runtime` free
/// of an ORM dependency — `serverless_core` maps between the two.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub id: i32,
    pub route: String,
    pub language: Language,
    pub timeout_seconds: u64,
    /// Authoritative image tag. Spec §9 Open Question: stored directly
    /// rather than derived from `language`, since two functions of the same
    /// language may need different base images.
    pub image_name: String,
}

impl FunctionSpec {
    pub fn handler_command(&self, container_path: &str) -> Vec<String> {
        vec![self.language.interpreter().to_string(), container_path.to_string()]
    }
}

/// One completed (or failed-to-start) invocation, persisted verbatim as a
/// metric row by the caller.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub function_id: i32,
    pub execution_time_ms: i64,
    pub status_code: i32,
    pub container_id: Option<String>,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub error: Option<String>,
    pub payload_size: i64,
    pub output: String,
}
