//! HTTP surface of the saga orchestrator.
//!
//! Exposes saga start/status/list/statistics/compensate endpoints plus
//! liveness, remote-service readiness, and Prometheus metrics, with
//! structured logging (tracing) on every request.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::RetryPolicy;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{SagaOrchestrator, SagaRegistry, ServiceEndpoints, ServiceGateway};
use saga_log::SagaLogStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::sagas::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: Arc<AppState<S, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    // Params at the same position must share a name, so the saga type in
    // POST /sagas/{id} binds under {id} too; the handler reads it as a type.
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas", get(routes::sagas::list::<S, G>))
        .route("/sagas/statistics", get(routes::sagas::statistics::<S, G>))
        .route("/sagas/{id}", post(routes::sagas::start::<S, G>))
        .route("/sagas/{id}/status", get(routes::sagas::status::<S, G>))
        .route(
            "/sagas/{id}/compensate",
            post(routes::sagas::compensate::<S, G>),
        )
        .route("/services/status", get(routes::services::status::<S, G>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the shared state: one orchestrator over the given log and gateway,
/// with the standard saga registry for the configured endpoints.
pub fn create_state<S, G>(log: S, gateway: G, endpoints: ServiceEndpoints) -> Arc<AppState<S, G>>
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let registry = Arc::new(SagaRegistry::standard(&endpoints));
    let orchestrator = SagaOrchestrator::new(log.clone(), gateway.clone(), registry);

    Arc::new(AppState {
        orchestrator,
        log,
        gateway,
        endpoints,
        probe_policy: RetryPolicy::new(
            2,
            std::time::Duration::from_millis(200),
            std::time::Duration::from_secs(1),
        ),
    })
}
