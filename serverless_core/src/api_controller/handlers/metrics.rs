use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::api_controller::AppState;
use crate::db::{FunctionDBRepo, MetricDBRepo, TimeSeriesPeriod};
use crate::lifecycle_manager::error::{ServelessCoreError, ServelessCoreResult};

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesQuery {
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    "hourly".to_string()
}

pub async fn get_function_metrics(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ServelessCoreResult<impl IntoResponse> {
    let metrics = MetricDBRepo::list_by_function(&state.db_conn, id)
        .await
        .map_err(ServelessCoreError::Database)?;

    if metrics.is_empty() {
        return Err(ServelessCoreError::RegistryNotFound(format!(
            "no metrics for function {id}"
        )));
    }

    Ok(Json(metrics))
}

pub async fn get_function_summary(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(query): Query<SummaryQuery>,
) -> ServelessCoreResult<impl IntoResponse> {
    FunctionDBRepo::find_by_id(&state.db_conn, id)
        .await
        .map_err(ServelessCoreError::Database)?
        .ok_or_else(|| ServelessCoreError::RegistryNotFound(format!("function {id}")))?;

    let summary = MetricDBRepo::summary_for_function(&state.db_conn, id, query.days)
        .await
        .map_err(ServelessCoreError::Database)?;

    Ok(Json(summary))
}

pub async fn get_all_summary(State(state): State<AppState>) -> ServelessCoreResult<impl IntoResponse> {
    let summary = MetricDBRepo::summary_all(&state.db_conn)
        .await
        .map_err(ServelessCoreError::Database)?;
    Ok(Json(summary))
}

pub async fn get_function_timeseries(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(query): Query<TimeSeriesQuery>,
) -> ServelessCoreResult<impl IntoResponse> {
    let period = TimeSeriesPeriod::parse(&query.period).ok_or_else(|| {
        ServelessCoreError::BadRequest(format!(
            "period must be hourly, daily, or weekly, got '{}'",
            query.period
        ))
    })?;

    let points = MetricDBRepo::timeseries_for_function(&state.db_conn, id, period)
        .await
        .map_err(ServelessCoreError::Database)?;

    Ok(Json(points))
}
