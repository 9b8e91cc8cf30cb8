use std::sync::Arc;

use runtime::core::driver::ContainerDriver;
use runtime::core::function::FunctionSpec;
use runtime::core::maintainer::Maintainer;
use runtime::core::pool::Pool;
use runtime::core::warmup::{run_warmup_loop, FunctionSource};
use runtime::shared::error::{AppResult, RuntimeError};
use sea_orm::{ConnectionTrait, DatabaseConnection, Schema};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::db::FunctionDBRepo;
use crate::lifecycle_manager::to_function_spec;
use crate::lifecycle_manager::error::ServelessCoreResult;

/// Bridges the registry's `functions` table to the runtime's
/// `FunctionSource` port so the warmup loop can list every known function
/// without depending on sea-orm itself.
pub struct RegistryFunctionSource {
    db: DatabaseConnection,
}

impl RegistryFunctionSource {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl FunctionSource for RegistryFunctionSource {
    async fn list_functions(&self) -> AppResult<Vec<FunctionSpec>> {
        let models = FunctionDBRepo::list(&self.db)
            .await
            .map_err(|e| RuntimeError::System(e.to_string()))?;

        models
            .iter()
            .map(|m| {
                to_function_spec(m).map_err(|e| RuntimeError::System(e.to_string()))
            })
            .collect()
    }
}

/// Startup lifecycle hook (spec §4.6): bring the schema up, then hand back
/// a handle to the spawned warmup loop task so shutdown can cancel it.
pub async fn ensure_schema(db: &DatabaseConnection) -> ServelessCoreResult<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut create_functions =
        schema.create_table_from_entity(db_entities::function::Entity);
    create_functions.if_not_exists();
    let mut create_metrics = schema.create_table_from_entity(db_entities::metric::Entity);
    create_metrics.if_not_exists();

    db.execute(backend.build(&create_functions))
        .await
        .map_err(crate::lifecycle_manager::error::ServelessCoreError::Database)?;
    db.execute(backend.build(&create_metrics))
        .await
        .map_err(crate::lifecycle_manager::error::ServelessCoreError::Database)?;

    info!("schema ensured");
    Ok(())
}

/// Spawns the warmup loop as a background task, per spec §4.3/§4.6.
/// Returns the `JoinHandle` so shutdown can abort it cooperatively.
pub fn spawn_warmup_loop<D: ContainerDriver + 'static>(
    driver: Arc<D>,
    pool: Arc<Pool>,
    maintainer: Arc<Maintainer<D>>,
    source: Arc<dyn FunctionSource>,
    interval_seconds: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_warmup_loop(driver, pool, maintainer, source, interval_seconds).await;
    })
}

/// Shutdown lifecycle hook (spec §4.6): cancel the warmup loop, drain every
/// pool queue, then belt-and-braces reap any container the driver still
/// lists under a known function image that didn't come out of a queue
/// (e.g. one that was mid-creation when shutdown began).
pub async fn shutdown<D: ContainerDriver>(
    warmup_handle: JoinHandle<()>,
    pool: &Pool,
    driver: &D,
    known_images: &[String],
) {
    warmup_handle.abort();

    for container in pool.drain_all().await {
        if let Err(e) = driver.stop(&container.container_id).await {
            warn!(container_id = %container.container_id, error = %e, "stop failed during shutdown drain");
        }
        if let Err(e) = driver.remove(&container.container_id).await {
            warn!(container_id = %container.container_id, error = %e, "remove failed during shutdown drain");
        }
    }

    for image in known_images {
        let stranded = match driver.list_by_ancestor(image).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(image = %image, error = %e, "failed to list containers during shutdown reap");
                continue;
            }
        };
        for container_id in stranded {
            if let Err(e) = driver.stop(&container_id).await {
                warn!(container_id, error = %e, "stop failed reaping stranded container at shutdown");
            }
            if let Err(e) = driver.remove(&container_id).await {
                warn!(container_id, error = %e, "remove failed reaping stranded container at shutdown");
            }
        }
    }

    info!("shutdown drain complete");
}
