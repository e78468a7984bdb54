// API module - HTTP routes and the WebSocket endpoint
//
// Layering, outermost first:
// 1. CORS (so preflight requests never hit auth)
// 2. Request tracing
// 3. Per-client rate limiting
// 4. Bearer token auth (everything except /api/health)

use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::SharedState;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod ws;

/// Builds the full router around `state`
pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/api/system/overview", get(handlers::system_overview))
        .route("/api/system/cpu", get(handlers::system_cpu))
        .route("/api/system/memory", get(handlers::system_memory))
        .route("/api/system/disk", get(handlers::system_disk))
        .route("/api/system/network", get(handlers::system_network))
        .route("/api/docker/containers", get(handlers::docker_containers))
        .route(
            "/api/docker/containers/:id/stats",
            get(handlers::container_stats),
        )
        .route(
            "/api/docker/containers/:id/logs",
            get(handlers::container_logs),
        )
        .route("/ws/metrics", get(ws::metrics_socket))
        .route_layer(from_fn_with_state(state.clone(), auth::require_token));

    Router::new()
        .route("/api/health", get(handlers::health))
        .merge(protected)
        .layer(from_fn_with_state(state.clone(), rate_limit::limit_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

/// CORS restricted to the configured origins
///
/// Origins that do not parse as header values are skipped with a warning.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
