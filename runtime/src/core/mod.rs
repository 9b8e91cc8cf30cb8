pub mod config;
pub mod driver;
pub mod function;
pub mod handler_store;
pub mod invoker;
pub mod maintainer;
pub mod pool;
pub mod warmup;
