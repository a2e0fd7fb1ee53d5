//! Readiness view over the remote services the sagas call.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use saga::{ServiceGateway, check_services};
use saga_log::SagaLogStore;
use serde::Serialize;

use crate::routes::sagas::AppState;

#[derive(Serialize)]
pub struct ServiceStatusEntry {
    pub healthy: bool,
    pub detail: String,
}

#[derive(Serialize)]
pub struct ServicesStatusResponse {
    pub services: BTreeMap<&'static str, ServiceStatusEntry>,
    pub healthy: bool,
}

/// GET /services/status — probes every configured remote service.
#[tracing::instrument(skip(state))]
pub async fn status<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
) -> Json<ServicesStatusResponse>
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let probes = check_services(&state.gateway, &state.endpoints, &state.probe_policy).await;

    let healthy = probes.iter().all(|p| p.healthy);
    let services = probes
        .into_iter()
        .map(|p| {
            (
                p.name,
                ServiceStatusEntry {
                    healthy: p.healthy,
                    detail: p.detail,
                },
            )
        })
        .collect();

    Json(ServicesStatusResponse { services, healthy })
}
