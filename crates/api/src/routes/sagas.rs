//! Saga lifecycle endpoints: start, status, list, statistics, compensate.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{RetryPolicy, SagaId};
use saga::{SagaOrchestrator, ServiceEndpoints, ServiceGateway};
use saga_log::{SagaFilter, SagaLogStore, SagaStatus, SagaTransaction};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, G>
where
    S: SagaLogStore + Clone,
    G: ServiceGateway + Clone,
{
    pub orchestrator: SagaOrchestrator<S, G>,
    pub log: S,
    pub gateway: G,
    pub endpoints: ServiceEndpoints,
    pub probe_policy: RetryPolicy,
}

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub saga_type: Option<String>,
    pub status: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaStartedResponse {
    pub saga_id: String,
    pub saga_type: String,
    pub status: String,
    pub message: String,
    pub tracking_url: String,
}

#[derive(Serialize)]
pub struct StepResponse {
    pub step_name: String,
    pub status: String,
    pub timestamp: String,
    pub payload: serde_json::Value,
    pub error_message: Option<String>,
}

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub saga_type: String,
    pub status: String,
    pub steps: Vec<StepResponse>,
    pub correlation_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct SagaSummaryResponse {
    pub saga_id: String,
    pub saga_type: String,
    pub status: String,
    pub step_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct SagaListResponse {
    pub sagas: Vec<SagaSummaryResponse>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct SagaStatisticsResponse {
    pub total_sagas: i64,
    pub by_status: std::collections::HashMap<String, i64>,
    pub by_type: std::collections::HashMap<String, i64>,
    pub generated_at: String,
}

#[derive(Serialize)]
pub struct CompensateResponse {
    pub saga_id: String,
    pub compensated_steps: Vec<String>,
}

// -- Handlers --

/// POST /sagas/:saga_type — start a saga and execute it in the background.
#[tracing::instrument(skip(state, input))]
pub async fn start<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(saga_type): Path<String>,
    Json(input): Json<serde_json::Value>,
) -> Result<(axum::http::StatusCode, Json<SagaStartedResponse>), ApiError>
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let saga = state.orchestrator.start(&saga_type, &input).await?;
    let saga_id = saga.id;

    // The client gets a 202 immediately; the steps run on their own task and
    // land in the log as they go.
    let runner = state.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.orchestrator.execute(saga_id).await {
            tracing::error!(%saga_id, error = %e, "saga execution failed");
        }
    });

    let response = SagaStartedResponse {
        saga_id: saga_id.to_string(),
        saga_type: saga.saga_type,
        status: saga.status.to_string(),
        message: "Saga accepted for execution".to_string(),
        tracking_url: format!("/sagas/{saga_id}/status"),
    };

    Ok((axum::http::StatusCode::ACCEPTED, Json(response)))
}

/// GET /sagas/:id/status — full log view of one saga.
#[tracing::instrument(skip(state))]
pub async fn status<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError>
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let saga_id = parse_saga_id(&id)?;
    let saga = state
        .log
        .get(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;

    Ok(Json(status_response(saga)))
}

/// GET /sagas — list sagas, newest first, with optional filters.
#[tracing::instrument(skip(state))]
pub async fn list<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SagaListResponse>, ApiError>
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let status = match &query.status {
        Some(value) => Some(
            SagaStatus::parse(value)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown status: {value}")))?,
        ),
        None => None,
    };

    let mut filter = SagaFilter::new().limit(
        query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(MAX_LIST_LIMIT),
    );
    if let Some(saga_type) = &query.saga_type {
        filter = filter.saga_type(saga_type);
    }
    if let Some(status) = status {
        filter = filter.status(status);
    }

    let sagas = state.log.list(filter).await?;
    let summaries: Vec<SagaSummaryResponse> = sagas
        .into_iter()
        .map(|saga| SagaSummaryResponse {
            saga_id: saga.id.to_string(),
            saga_type: saga.saga_type,
            status: saga.status.to_string(),
            step_count: saga.steps.len(),
            created_at: saga.created_at.to_rfc3339(),
            updated_at: saga.updated_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(SagaListResponse {
        total: summaries.len(),
        sagas: summaries,
    }))
}

/// GET /sagas/statistics — aggregate counts over the whole log.
#[tracing::instrument(skip(state))]
pub async fn statistics<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
) -> Result<Json<SagaStatisticsResponse>, ApiError>
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let stats = state.log.statistics().await?;

    Ok(Json(SagaStatisticsResponse {
        total_sagas: stats.total,
        by_status: stats.by_status,
        by_type: stats.by_type,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }))
}

/// POST /sagas/:id/compensate — undo completed steps of a stuck saga.
#[tracing::instrument(skip(state))]
pub async fn compensate<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<CompensateResponse>, ApiError>
where
    S: SagaLogStore + Clone + Send + Sync + 'static,
    G: ServiceGateway + Clone + Send + Sync + 'static,
{
    let saga_id = parse_saga_id(&id)?;
    let compensated_steps = state.orchestrator.force_compensate(saga_id).await?;

    Ok(Json(CompensateResponse {
        saga_id: saga_id.to_string(),
        compensated_steps,
    }))
}

fn status_response(saga: SagaTransaction) -> SagaStatusResponse {
    let steps: Vec<StepResponse> = saga
        .steps
        .into_iter()
        .map(|step| StepResponse {
            step_name: step.name,
            status: step.status.to_string(),
            timestamp: step.timestamp.to_rfc3339(),
            payload: step.payload,
            error_message: step.error_message,
        })
        .collect();

    SagaStatusResponse {
        saga_id: saga.id.to_string(),
        saga_type: saga.saga_type,
        status: saga.status.to_string(),
        steps,
        correlation_id: saga.correlation_id.to_string(),
        created_at: saga.created_at.to_rfc3339(),
        updated_at: saga.updated_at.to_rfc3339(),
    }
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga id: {e}")))?;
    Ok(SagaId::from_uuid(uuid))
}
