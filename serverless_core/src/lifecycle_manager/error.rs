use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type ServelessCoreResult<T> = Result<T, ServelessCoreError>;

/// Top-level error surface for the HTTP shell. Maps onto the status codes
/// documented for the control plane's error table: `RegistryNotFound` → 404,
/// `RegistryConflict`/`BadRequest` → 400, `DriverUnavailable`/`SystemError` → 500.
#[derive(Debug, Error)]
pub enum ServelessCoreError {
    #[error("function not found: {0}")]
    RegistryNotFound(String),

    #[error("function already exists: {0}")]
    RegistryConflict(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("container driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("system error: {0}")]
    SystemError(String),
}

impl IntoResponse for ServelessCoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServelessCoreError::RegistryNotFound(_) => StatusCode::NOT_FOUND,
            ServelessCoreError::RegistryConflict(_) => StatusCode::BAD_REQUEST,
            ServelessCoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServelessCoreError::DriverUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServelessCoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServelessCoreError::SystemError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Distinguishes a unique-constraint violation (duplicate function name or
/// route) from any other database error, the way the teacher's Python
/// original caught `sqlalchemy.exc.IntegrityError` specifically around
/// `create_function`. sea-orm doesn't expose a typed unique-violation
/// variant, so this inspects the driver's error text for the Postgres
/// duplicate-key marker.
pub fn classify_db_error(name_or_route: &str, e: sea_orm::DbErr) -> ServelessCoreError {
    let text = e.to_string().to_lowercase();
    if text.contains("duplicate key") || text.contains("unique constraint") {
        ServelessCoreError::RegistryConflict(format!(
            "function with name or route '{name_or_route}' already exists"
        ))
    } else {
        ServelessCoreError::Database(e)
    }
}
