use std::sync::Arc;

use db_entities::function::Model as FunctionModel;
use runtime::core::driver::ContainerDriver;
use runtime::core::handler_store::HandlerStore;
use runtime::core::maintainer::Maintainer;
use runtime::core::pool::Pool;
use sea_orm::DatabaseConnection;
use tracing::{info, warn};

use crate::db::FunctionDBRepo;
use crate::lifecycle_manager::error::{classify_db_error, ServelessCoreError, ServelessCoreResult};
use crate::lifecycle_manager::{parse_language, to_function_spec};

/// Orchestrates `create_function`: persist the row, write the handler file
/// to the shared volume, then bring its pool up to size. Spec §4.5 —
/// file write + chmod + fsync + settle happens inside `HandlerStore`, this
/// just sequences it around the DB write and the maintainer call.
pub async fn create_function<D: ContainerDriver, H: HandlerStore>(
    db: &DatabaseConnection,
    handler_store: &Arc<H>,
    maintainer: &Arc<Maintainer<D>>,
    name: String,
    route: String,
    language: String,
    timeout_seconds: i32,
    image_name: String,
    code: String,
) -> ServelessCoreResult<FunctionModel> {
    let lang = parse_language(&language)?;

    let model = FunctionDBRepo::create(
        db,
        name.clone(),
        route,
        language,
        timeout_seconds,
        image_name,
        code.clone(),
    )
    .await
    .map_err(|e| classify_db_error(&name, e))?;

    handler_store
        .write_handler(model.id, lang, &code)
        .await
        .map_err(|e| ServelessCoreError::SystemError(e.to_string()))?;

    let spec = to_function_spec(&model)?;
    maintainer
        .maintain(&spec)
        .await
        .map_err(|e| ServelessCoreError::DriverUnavailable(e.to_string()))?;

    info!(function_id = model.id, route = %model.route, "function created and pool warmed");
    Ok(model)
}

/// Orchestrates `update_function`: overwrite the handler file and the DB
/// row's code. Spec §4.5: no container restart is forced — the read-only
/// bind mount makes the new handler visible to existing warm containers at
/// their next `exec`, so the maintainer is deliberately not invoked here.
pub async fn update_function<H: HandlerStore>(
    db: &DatabaseConnection,
    handler_store: &Arc<H>,
    id: i32,
    code: String,
) -> ServelessCoreResult<FunctionModel> {
    let existing = FunctionDBRepo::find_by_id(db, id)
        .await
        .map_err(ServelessCoreError::Database)?
        .ok_or_else(|| ServelessCoreError::RegistryNotFound(format!("function {id}")))?;
    let lang = parse_language(&existing.language)?;

    let model = FunctionDBRepo::update_code(db, id, code.clone())
        .await
        .map_err(ServelessCoreError::Database)?;

    handler_store
        .write_handler(id, lang, &code)
        .await
        .map_err(|e| ServelessCoreError::SystemError(e.to_string()))?;

    info!(function_id = id, "function handler updated");
    Ok(model)
}

/// Orchestrates `delete_function`: drain the pool (stop + remove every
/// warm container for this function), remove the handler directory, then
/// delete the DB row. Order matters — disposal failures are logged but
/// must never block the row delete, so a caller retrying delete doesn't
/// get stuck behind a stuck container.
pub async fn delete_function<D: ContainerDriver, H: HandlerStore>(
    db: &DatabaseConnection,
    pool: &Arc<Pool>,
    driver: &Arc<D>,
    handler_store: &Arc<H>,
    id: i32,
) -> ServelessCoreResult<()> {
    FunctionDBRepo::find_by_id(db, id)
        .await
        .map_err(ServelessCoreError::Database)?
        .ok_or_else(|| ServelessCoreError::RegistryNotFound(format!("function {id}")))?;

    for container in pool.drop_queue(id).await {
        if let Err(e) = driver.stop(&container.container_id).await {
            warn!(container_id = %container.container_id, error = %e, "stop failed while draining deleted function's pool");
        }
        if let Err(e) = driver.remove(&container.container_id).await {
            warn!(container_id = %container.container_id, error = %e, "remove failed while draining deleted function's pool");
        }
    }

    if let Err(e) = handler_store.remove_handler(id).await {
        warn!(function_id = id, error = %e, "failed to remove handler directory on delete");
    }

    FunctionDBRepo::delete(db, id)
        .await
        .map_err(ServelessCoreError::Database)?;

    info!(function_id = id, "function deleted, pool drained");
    Ok(())
}
