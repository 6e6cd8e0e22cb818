use axum::extract::State;

use crate::api::errors::ApiError;
use crate::api::AppState;
use crate::infrastructure::store::Store;

/// Health check; fails when the shared store is unreachable
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state
        .broker
        .store()
        .ping()
        .await
        .map_err(|e| ApiError::service_unavailable(format!("Store unreachable: {}", e)))?;
    Ok("OK")
}
