mod config;
mod handlers;

use axum::routing::{get, post};
use axum::Router;
use config::{InvokConfig, InvokConfigError};
use handlers::functions::{
    create_function, delete_function, execute_by_id, get_function, invoke_by_route,
    list_functions, update_function,
};
use handlers::metrics::{
    get_all_summary, get_function_metrics, get_function_summary, get_function_timeseries,
};
use runtime::core::driver::BollardDriver;
use runtime::core::handler_store::FsHandlerStore;
use runtime::core::invoker::Invoker;
use runtime::core::maintainer::Maintainer;
use runtime::core::pool::Pool;
use runtime::core::warmup::FunctionSource;
use runtime::shared::error::RuntimeError;
use sea_orm::{Database, DatabaseConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::FunctionDBRepo;
use crate::lifecycle_manager::error::ServelessCoreError;
use crate::lifecycle_manager::hooks::{ensure_schema, shutdown, spawn_warmup_loop, RegistryFunctionSource};
use crate::lifecycle_manager::to_function_spec;

/// Application state shared across handlers. The invocation core's generic
/// ports (`ContainerDriver`, `HandlerStore`) are pinned to their concrete
/// production implementations here so the HTTP shell stays monomorphic.
#[derive(Clone)]
pub struct AppState {
    pub db_conn: DatabaseConnection,
    pub pool: Arc<Pool>,
    pub driver: Arc<BollardDriver>,
    pub handler_store: Arc<FsHandlerStore>,
    pub maintainer: Arc<Maintainer<BollardDriver>>,
    pub invoker: Arc<Invoker<BollardDriver, FsHandlerStore>>,
}

/// Top-level error surface for server startup.
#[derive(Debug, Error)]
pub enum InvokAppError {
    #[error("configuration error: {0}")]
    Config(#[from] InvokConfigError),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("container driver error: {0}")]
    Driver(#[from] RuntimeError),

    #[error("startup error: {0}")]
    Startup(#[from] ServelessCoreError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("http server error: {0}")]
    Http(#[from] hyper::Error),
}

/// Starts the server and sets up the necessary connections and routes.
///
/// This function performs the following:
/// - Initializes structured logging.
/// - Loads application configuration.
/// - Connects to the registry/metric database and ensures its schema.
/// - Connects to the container driver and warms every known function's pool.
/// - Spawns the background warmup loop.
/// - Sets up the Axum router with defined routes.
/// - Binds the server to a socket address and serves until shutdown, then
///   drains the pool.
pub async fn start_server() -> Result<(), InvokAppError> {
    tracing_subscriber::fmt::init();

    let config = InvokConfig::load()?;

    let db_conn = Database::connect(config.server.database_url.clone()).await?;
    ensure_schema(&db_conn).await?;

    let driver = Arc::new(BollardDriver::connect()?);
    let pool = Arc::new(Pool::new());
    let handler_store = Arc::new(FsHandlerStore::new(config.runtime.shared_volume_root.clone()));
    let maintainer = Arc::new(Maintainer::new(
        driver.clone(),
        pool.clone(),
        config.runtime.pool_size,
        config.runtime.memory_limit_bytes(),
        config.runtime.container_network_mode.clone(),
        config.runtime.shared_volume_root.clone(),
        "/functions".to_string(),
    ));
    let invoker = Arc::new(Invoker::new(
        driver.clone(),
        pool.clone(),
        maintainer.clone(),
        handler_store.clone(),
    ));

    let known_functions = FunctionDBRepo::list(&db_conn).await?;
    for model in &known_functions {
        match to_function_spec(model) {
            Ok(spec) => {
                if let Err(e) = maintainer.maintain(&spec).await {
                    warn!(function_id = model.id, error = %e, "startup pool warm failed, will retry on next warmup tick");
                }
            }
            Err(e) => warn!(function_id = model.id, error = %e, "skipping malformed function row at startup"),
        }
    }

    let source: Arc<dyn FunctionSource> = Arc::new(RegistryFunctionSource::new(db_conn.clone()));
    let warmup_handle = spawn_warmup_loop(
        driver.clone(),
        pool.clone(),
        maintainer.clone(),
        source,
        config.runtime.warmup_interval_seconds,
    );

    let app_state = AppState {
        db_conn,
        pool: pool.clone(),
        driver: driver.clone(),
        handler_store,
        maintainer,
        invoker,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/functions/", post(create_function).get(list_functions))
        .route(
            "/functions/:id",
            get(get_function).put(update_function).delete(delete_function),
        )
        .route("/functions/:id/execute", post(execute_by_id))
        .route("/invoke/*route", post(invoke_by_route))
        .route("/metrics/function/:id", get(get_function_metrics))
        .route("/metrics/function/:id/summary", get(get_function_summary))
        .route("/metrics/summary", get(get_all_summary))
        .route("/metrics/function/:id/timeseries", get(get_function_timeseries))
        .with_state(app_state);

    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .unwrap_or_else(|_| "0.0.0.0".parse().unwrap()),
        config.server.port,
    );

    info!(%addr, "serverless control plane listening");

    let server = axum::Server::bind(&addr).serve(app.into_make_service());

    tokio::select! {
        result = server => { result?; }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let known_images = distinct_images(&known_functions);
    shutdown(warmup_handle, &pool, driver.as_ref(), &known_images).await;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

fn distinct_images(functions: &[db_entities::function::Model]) -> Vec<String> {
    let mut images: Vec<String> = functions.iter().map(|f| f.image_name.clone()).collect();
    images.sort();
    images.dedup();
    images
}
