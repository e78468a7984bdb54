// Request handlers
//
// System families and the container list are served through the cache:
// a hit returns the stored value, a miss polls the source and stores the
// result. Container stats and logs always go to the source.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

use super::error::ApiError;
use crate::metrics::docker::is_valid_container_id;
use crate::metrics::{now_iso, CollectError, ContainerLogs, ContainerStats, LogQuery};
use crate::state::SharedState;

/// Success response body
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(ApiResponse {
            success: true,
            data,
            timestamp: now_iso(),
        })
    }
}

type ApiResult = Result<Json<ApiResponse<Value>>, ApiError>;

/// Serves `key` from the cache, or polls `fetch` and caches the result
///
/// An unavailable source yields the zeroed payload, which is not cached so
/// the next request tries the source again.
async fn cached<T, F, Fut>(state: &SharedState, key: &str, fetch: F) -> Result<Value, ApiError>
where
    T: Serialize + Default,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CollectError>>,
{
    if let Some(value) = state.cache.get(key) {
        debug!("Cache hit for {}", key);
        return Ok(value);
    }

    debug!("Cache miss for {}", key);
    match fetch().await {
        Ok(fresh) => {
            let value = serde_json::to_value(fresh)?;
            state.cache.set(key, value.clone());
            Ok(value)
        }
        Err(CollectError::Unavailable(source)) => {
            warn!("{} source unavailable, serving empty data", source);
            Ok(serde_json::to_value(T::default())?)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn system_overview(State(state): State<SharedState>) -> ApiResult {
    let data = cached(&state, "system:overview", || state.host.overview()).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn system_cpu(State(state): State<SharedState>) -> ApiResult {
    let data = cached(&state, "system:cpu", || state.host.cpu()).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn system_memory(State(state): State<SharedState>) -> ApiResult {
    let data = cached(&state, "system:memory", || state.host.memory()).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn system_disk(State(state): State<SharedState>) -> ApiResult {
    let data = cached(&state, "system:disk", || state.host.disk()).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn system_network(State(state): State<SharedState>) -> ApiResult {
    let data = cached(&state, "system:network", || state.host.network()).await?;
    Ok(ApiResponse::ok(data))
}

pub async fn docker_containers(State(state): State<SharedState>) -> ApiResult {
    let data = cached(&state, "docker:containers", || state.containers.list_containers()).await?;
    Ok(ApiResponse::ok(data))
}

fn checked_id(id: String) -> Result<String, ApiError> {
    if is_valid_container_id(&id) {
        Ok(id)
    } else {
        Err(ApiError::InvalidContainerId(id))
    }
}

pub async fn container_stats(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = checked_id(id)?;
    let stats = match state.containers.container_stats(&id).await {
        Err(CollectError::Unavailable(_)) => ContainerStats::empty(&id),
        result => result?,
    };
    Ok(ApiResponse::ok(serde_json::to_value(stats)?))
}

pub async fn container_logs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> ApiResult {
    let id = checked_id(id)?;
    let Query(query) = query.map_err(|e| ApiError::BadQuery(e.body_text()))?;
    query.validate()?;

    let logs = match state.containers.container_logs(&id, &query).await {
        Err(CollectError::Unavailable(_)) => ContainerLogs::empty(&id),
        result => result?,
    };
    Ok(ApiResponse::ok(serde_json::to_value(logs)?))
}

/// Health report
///
/// Docker being unavailable is reported but leaves the bridge healthy; only
/// a failing host source makes it unhealthy.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub subscribers: usize,

    /// Cached responses, including expired ones not yet swept
    pub cache_entries: usize,

    pub checks: HealthChecks,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub system: &'static str,
    pub docker: &'static str,
}

pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthReport>) {
    let system_ok = match state.host.memory().await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check: system metrics failing: {}", e);
            false
        }
    };

    let report = HealthReport {
        status: if system_ok { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        subscribers: state.registry.len(),
        cache_entries: state.cache.len(),
        checks: HealthChecks {
            system: if system_ok { "ok" } else { "error" },
            docker: if state.containers.is_available() {
                "available"
            } else {
                "unavailable"
            },
        },
        timestamp: now_iso(),
    };

    let status = if system_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::metrics::fake::{FakeContainers, FakeHost};
    use crate::state::AppState;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn state_with(host: Arc<FakeHost>, containers: Arc<FakeContainers>) -> SharedState {
        Arc::new(AppState::new(BridgeConfig::default(), host, containers))
    }

    #[tokio::test(start_paused = true)]
    async fn test_overview_served_from_cache_within_ttl() {
        let host = Arc::new(FakeHost::new());
        let state = state_with(host.clone(), Arc::new(FakeContainers::new()));

        let first = system_overview(State(state.clone())).await.unwrap();
        let second = system_overview(State(state.clone())).await.unwrap();

        assert_eq!(first.0.data, second.0.data);
        assert_eq!(host.calls(), 1);
        assert!(first.0.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overview_repolled_after_ttl() {
        let host = Arc::new(FakeHost::new());
        let state = state_with(host.clone(), Arc::new(FakeContainers::new()));

        let first = system_overview(State(state.clone())).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let second = system_overview(State(state.clone())).await.unwrap();

        assert_eq!(host.calls(), 2);
        assert_ne!(first.0.data["timestamp"], second.0.data["timestamp"]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_503() {
        let host = Arc::new(FakeHost::failing(CollectError::Timeout("cpu")));
        let state = state_with(host, Arc::new(FakeContainers::new()));

        let err = system_cpu(State(state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unavailable_source_degrades_to_zeroed_payload() {
        let host = Arc::new(FakeHost::failing(CollectError::Unavailable("disk")));
        let state = state_with(host.clone(), Arc::new(FakeContainers::new()));

        let response = system_disk(State(state.clone())).await.unwrap();
        assert_eq!(response.0.data["totals"]["total_bytes"], 0);

        // Degraded payloads are not cached
        let _response = system_disk(State(state)).await.unwrap();
        assert_eq!(host.calls(), 2);
    }

    #[tokio::test]
    async fn test_container_list_cached() {
        let containers = Arc::new(FakeContainers::new());
        let state = state_with(Arc::new(FakeHost::new()), containers.clone());

        let response = docker_containers(State(state.clone())).await.unwrap();
        let _response = docker_containers(State(state)).await.unwrap();

        assert_eq!(response.0.data[0]["name"], "web");
        assert_eq!(containers.calls(), 1);
    }

    #[tokio::test]
    async fn test_container_stats_rejects_bad_id() {
        let containers = Arc::new(FakeContainers::new());
        let state = state_with(Arc::new(FakeHost::new()), containers.clone());

        let err = container_stats(State(state), Path("../etc".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(containers.calls(), 0);
    }

    #[tokio::test]
    async fn test_container_stats_not_found() {
        let state = state_with(Arc::new(FakeHost::new()), Arc::new(FakeContainers::new()));

        let err = container_stats(State(state), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_container_logs() {
        let state = state_with(Arc::new(FakeHost::new()), Arc::new(FakeContainers::new()));

        let query = LogQuery {
            lines: Some(2),
            ..Default::default()
        };
        let response = container_logs(State(state), Path("web".to_string()), Ok(Query(query)))
            .await
            .unwrap();
        assert_eq!(response.0.data["count"], 2);
    }

    #[tokio::test]
    async fn test_container_logs_invalid_range() {
        let state = state_with(Arc::new(FakeHost::new()), Arc::new(FakeContainers::new()));

        let query = LogQuery {
            lines: Some(50_000),
            ..Default::default()
        };
        let err = container_logs(State(state), Path("web".to_string()), Ok(Query(query)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_docker_unavailable_is_still_healthy() {
        let containers = Arc::new(FakeContainers::new());
        containers.available.store(false, Ordering::SeqCst);
        let state = state_with(Arc::new(FakeHost::new()), containers);

        let (status, Json(report)) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, "healthy");
        assert_eq!(report.checks.docker, "unavailable");
    }

    #[tokio::test]
    async fn test_health_reports_cache_entries() {
        let state = state_with(Arc::new(FakeHost::new()), Arc::new(FakeContainers::new()));
        let _response = system_memory(State(state.clone())).await.unwrap();

        let (_, Json(report)) = health(State(state)).await;
        assert_eq!(report.cache_entries, 1);
    }

    #[tokio::test]
    async fn test_health_failing_host_is_unhealthy() {
        let host = Arc::new(FakeHost::failing(CollectError::Source("proc".into())));
        let state = state_with(host, Arc::new(FakeContainers::new()));

        let (status, Json(report)) = health(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.checks.system, "error");
    }
}
