//! API server entry point.

use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{HttpServiceGateway, ServiceGateway};
use saga_log::{InMemorySagaLogStore, PostgresSagaLogStore, SagaLogStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S, G>(log: S, gateway: G, config: Config, metrics_handle: PrometheusHandle)
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let state = api::create_state(log, gateway, config.endpoints.clone());
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting saga orchestrator API");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Build the gateway the saga steps call through
    let config = Config::from_env();
    let gateway =
        HttpServiceGateway::new(config.gateway_timeout).expect("failed to build HTTP gateway");

    // 4. Pick the saga log backend and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let log = PostgresSagaLogStore::new(pool);
            log.run_migrations().await.expect("migrations failed");
            serve(log, gateway, config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping the saga log in memory");
            serve(InMemorySagaLogStore::new(), gateway, config, metrics_handle).await;
        }
    }
}
