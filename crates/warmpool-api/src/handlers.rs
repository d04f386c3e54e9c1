//! REST API handlers.
//!
//! Allocation goes through the `Matcher`; pool-config management goes
//! through the `PoolRegistry`. Errors are returned as `{"error": msg}`
//! with the matching status code.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{error, info};

use warmpool_matcher::InstanceRequest;

use crate::ApiState;

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// POST /request-instance
pub async fn request_instance(
    State(state): State<ApiState>,
    Json(request): Json<InstanceRequest>,
) -> impl IntoResponse {
    let pool_name = match state.matcher.match_pool(&request) {
        Ok(Some(pool_name)) => pool_name,
        Ok(None) => {
            error!(
                requested = %state.matcher.pool_name_for(&request),
                "no matching pool found for request"
            );
            return error_response("no config found for pool", StatusCode::NOT_FOUND)
                .into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    match state.matcher.request_instance(&pool_name).await {
        Ok(Some(mut record)) => {
            info!(name = %record.name, pool = %pool_name, "returning warm instance");
            // Zones may be stored as full provider URLs; return the basename.
            record.zone = record
                .zone
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            Json(record).into_response()
        }
        Ok(None) => {
            error!(pool = %pool_name, "no instances available in pool");
            error_response("no instance available in pool", StatusCode::CONFLICT).into_response()
        }
        Err(e) => {
            error!(pool = %pool_name, error = %e, "instance request failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /pool-configs
pub async fn list_pool_configs(State(state): State<ApiState>) -> impl IntoResponse {
    match state.registry.pools() {
        Ok(pools) => {
            let configs: BTreeMap<String, u32> =
                pools.into_iter().map(|p| (p.name, p.target_size)).collect();
            Json(configs).into_response()
        }
        Err(e) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /pool-configs/{name}
pub async fn get_pool_config(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&name) {
        Ok(Some(pool)) => {
            let mut config = BTreeMap::new();
            config.insert(pool.name, pool.target_size);
            Json(config).into_response()
        }
        Ok(None) => error_response("no config found for pool", StatusCode::NOT_FOUND)
            .into_response(),
        Err(e) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// POST /pool-configs/{name}/{target_size}
pub async fn set_pool_config(
    State(state): State<ApiState>,
    Path((name, target_size)): Path<(String, String)>,
) -> impl IntoResponse {
    // Pool name must be at least image-name:machine-type.
    if name.split(':').filter(|s| !s.is_empty()).count() < 2 {
        return error_response(
            "Pool name must be of format image_name:machine_type(:public)",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    let target_size: u32 = match target_size.parse() {
        Ok(size) => size,
        Err(_) => {
            return error_response(
                "Target pool size must be a non-negative integer",
                StatusCode::BAD_REQUEST,
            )
            .into_response();
        }
    };

    info!(pool = %name, target_size, "updating pool config");
    match state.registry.set(&name, target_size) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// DELETE /pool-configs/{name}
pub async fn delete_pool_config(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.registry.delete(&name) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response("no config found for pool", StatusCode::NOT_FOUND)
            .into_response(),
        Err(e) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /
pub async fn root() -> impl IntoResponse {
    "warmpool alive"
}
