pub mod functions;
pub mod metrics;
