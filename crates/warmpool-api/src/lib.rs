//! warmpool-api — REST API for warmpool.
//!
//! Provides axum route handlers for requesting warm instances and
//! managing pool configurations.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/request-instance` | Pop a warm instance matching the request |
//! | GET | `/pool-configs` | List all pool configs |
//! | GET | `/pool-configs/{name}` | Get one pool config |
//! | POST | `/pool-configs/{name}/{target_size}` | Set a pool's target size |
//! | DELETE | `/pool-configs/{name}` | Delete a pool config |
//! | GET | `/` | Liveness probe |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use warmpool_matcher::Matcher;
use warmpool_store::PoolRegistry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub matcher: Arc<Matcher>,
    pub registry: PoolRegistry,
}

/// Build the complete API router.
pub fn build_router(matcher: Arc<Matcher>, registry: PoolRegistry) -> Router {
    let state = ApiState { matcher, registry };

    Router::new()
        .route("/request-instance", post(handlers::request_instance))
        .route("/pool-configs", get(handlers::list_pool_configs))
        .route(
            "/pool-configs/{name}",
            get(handlers::get_pool_config).delete(handlers::delete_pool_config),
        )
        .route(
            "/pool-configs/{name}/{target_size}",
            post(handlers::set_pool_config),
        )
        .route("/", get(handlers::root))
        .with_state(state)
}
