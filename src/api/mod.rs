// API layer module (adapters for controllers)
// Follows Hexagonal Architecture - API is an adapter

pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domain::repositories::StateRepository;
use crate::infrastructure::broker::MessageBroker;
use handlers::{health, plans, queues};

/// Shared state of the intake surface
#[derive(Clone)]
pub struct AppState {
    pub broker: MessageBroker,
    pub plans: Arc<dyn StateRepository>,
    /// Agent whose queue receives new requests
    pub entry_agent: String,
    /// Consumer name of the reply channel new requests answer to
    pub results_consumer: String,
}

/// Build the HTTP router with tracing and permissive CORS
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Plan routes
        .route("/api/plans", post(plans::create_plan))
        .route("/api/plans/:user_id/:plan_id", get(plans::get_plan))
        // Queue inspection
        .route("/api/queues/:agent", get(queues::queue_depths))
        .route("/api/queues/:agent/dlq", get(queues::dead_letters))
        .route("/api/queues/:agent/recover", post(queues::recover))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Shared state
        .with_state(state)
}
