//! Health probes for the remote services the sagas depend on.

use common::RetryPolicy;
use serde::Serialize;

use crate::gateway::{ServiceGateway, ServiceGatewayExt};
use crate::registry::ServiceEndpoints;

/// Health of one remote service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: &'static str,
    pub healthy: bool,
    pub detail: String,
}

/// Probes every service's `/health` endpoint with retried reads.
///
/// Probe failures are reported, never propagated; an unreachable service is
/// a result, not an error.
pub async fn check_services<G: ServiceGateway>(
    gateway: &G,
    endpoints: &ServiceEndpoints,
    policy: &RetryPolicy,
) -> Vec<ServiceHealth> {
    let targets = [
        ("content", endpoints.content_url.as_str()),
        ("affiliate", endpoints.affiliate_url.as_str()),
        ("collaboration", endpoints.collaboration_url.as_str()),
        ("monitoring", endpoints.monitoring_url.as_str()),
    ];

    let mut results = Vec::with_capacity(targets.len());
    for (name, base_url) in targets {
        let url = format!("{base_url}/health");
        let health = match gateway.get_with_retry(&url, policy).await {
            Ok(_) => ServiceHealth {
                name,
                healthy: true,
                detail: "ok".to_string(),
            },
            Err(e) => {
                tracing::warn!(service = name, error = %e, "service health probe failed");
                ServiceHealth {
                    name,
                    healthy: false,
                    detail: e.to_string(),
                }
            }
        };
        results.push(health);
    }
    results
}
