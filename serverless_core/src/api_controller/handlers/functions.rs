use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::api_controller::AppState;
use crate::db::{FunctionDBRepo, MetricDBRepo};
use crate::lifecycle_manager::error::{ServelessCoreError, ServelessCoreResult};
use crate::lifecycle_manager::{registry_bridge, to_function_spec};

#[derive(Debug, Deserialize)]
pub struct CreateFunctionRequest {
    pub name: String,
    pub route: String,
    pub language: String,
    pub timeout_seconds: i32,
    pub image_name: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFunctionRequest {
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvokeRequest {
    pub payload: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub status: i32,
    pub output: String,
    pub error: Option<String>,
}

pub async fn create_function(
    State(state): State<AppState>,
    Json(req): Json<CreateFunctionRequest>,
) -> ServelessCoreResult<impl IntoResponse> {
    let model = registry_bridge::create_function(
        &state.db_conn,
        &state.handler_store,
        &state.maintainer,
        req.name,
        req.route,
        req.language,
        req.timeout_seconds,
        req.image_name,
        req.code,
    )
    .await?;

    Ok((StatusCode::OK, Json(model)))
}

pub async fn list_functions(State(state): State<AppState>) -> ServelessCoreResult<impl IntoResponse> {
    let functions = FunctionDBRepo::list(&state.db_conn)
        .await
        .map_err(ServelessCoreError::Database)?;
    Ok(Json(functions))
}

pub async fn get_function(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ServelessCoreResult<impl IntoResponse> {
    let function = FunctionDBRepo::find_by_id(&state.db_conn, id)
        .await
        .map_err(ServelessCoreError::Database)?
        .ok_or_else(|| ServelessCoreError::RegistryNotFound(format!("function {id}")))?;
    Ok(Json(function))
}

pub async fn update_function(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateFunctionRequest>,
) -> ServelessCoreResult<impl IntoResponse> {
    let model =
        registry_bridge::update_function(&state.db_conn, &state.handler_store, id, req.code)
            .await?;
    Ok(Json(model))
}

pub async fn delete_function(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ServelessCoreResult<impl IntoResponse> {
    registry_bridge::delete_function(
        &state.db_conn,
        &state.pool,
        &state.driver,
        &state.handler_store,
        id,
    )
    .await?;
    Ok(Json(serde_json::json!({ "message": "function deleted" })))
}

pub async fn execute_by_id(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<InvokeRequest>,
) -> impl IntoResponse {
    let function = match FunctionDBRepo::find_by_id(&state.db_conn, id).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            return ServelessCoreError::RegistryNotFound(format!("function {id}")).into_response()
        }
        Err(e) => return ServelessCoreError::Database(e).into_response(),
    };

    run_invocation(&state, &function, req.payload).await
}

pub async fn invoke_by_route(
    State(state): State<AppState>,
    Path(route): Path<String>,
    Json(req): Json<InvokeRequest>,
) -> impl IntoResponse {
    let canonical_route = if route.starts_with('/') {
        route
    } else {
        format!("/{route}")
    };

    let function = match FunctionDBRepo::find_by_route(&state.db_conn, &canonical_route).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            return ServelessCoreError::RegistryNotFound(format!("route {canonical_route}"))
                .into_response()
        }
        Err(e) => return ServelessCoreError::Database(e).into_response(),
    };

    run_invocation(&state, &function, req.payload).await
}

/// Shared tail of both invocation entry points (spec §4.4): resolve once,
/// then run the Invoker, persist exactly one metric row regardless of
/// outcome, and translate the result to the documented status codes.
async fn run_invocation(
    state: &AppState,
    function: &db_entities::function::Model,
    payload: Option<Value>,
) -> axum::response::Response {
    let spec = match to_function_spec(function) {
        Ok(spec) => spec,
        Err(e) => return e.into_response(),
    };

    let payload_json = serde_json::to_string(&payload.unwrap_or(Value::Object(Default::default())))
        .unwrap_or_else(|_| "{}".to_string());

    let record = state.invoker.invoke(&spec, &payload_json).await;

    if let Err(e) = MetricDBRepo::record(
        &state.db_conn,
        record.function_id,
        record.execution_time_ms,
        record.memory_usage_mb,
        record.cpu_usage_percent,
        record.status_code,
        record.error.clone(),
        record.container_id.clone(),
        record.payload_size,
    )
    .await
    {
        error!(function_id = record.function_id, error = %e, "failed to persist invocation metric");
    }

    let response = InvokeResponse {
        status: record.status_code,
        output: record.output,
        error: record.error,
    };

    let status = if record.status_code == 0 {
        StatusCode::OK
    } else if record.status_code >= 500 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    };

    (status, Json(response)).into_response()
}
